//! Tracker configuration.
//!
//! The tracker itself only needs the enabled path prefixes and the heartbeat
//! interval; the remaining fields configure the HTTP delivery layer.
//!
//! Precedence: defaults < config file (`~/.config/activity-tracker/config.json`)
//! < environment (`TRACKER_BASE_URL`, `TRACKER_HEARTBEAT_SECS`).

use fs_err as fs;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, TrackerError};

pub const DEFAULT_ENABLED_PREFIXES: [&str; 3] =
    ["/business_dashboard", "/super_dashboard", "/user_dashboard"];
pub const DEFAULT_HEARTBEAT_SECS: u64 = 30;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000/api/analytics/";

const BASE_URL_ENV: &str = "TRACKER_BASE_URL";
const HEARTBEAT_ENV: &str = "TRACKER_HEARTBEAT_SECS";
const CONFIG_DIR: &str = "activity-tracker";
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub base_url: String,
    pub enabled_path_prefixes: Vec<String>,
    pub heartbeat_interval_secs: u64,
    pub request_timeout_ms: u64,
    /// Run the `GET me` warm-up probe before starting a session.
    pub probe_identity: bool,
    /// Cookie header sent with every request (e.g. `sessionid=...`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_cookie: Option<String>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            enabled_path_prefixes: DEFAULT_ENABLED_PREFIXES
                .iter()
                .map(|prefix| prefix.to_string())
                .collect(),
            heartbeat_interval_secs: DEFAULT_HEARTBEAT_SECS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            probe_identity: true,
            session_cookie: None,
        }
    }
}

impl TrackerConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_interval_secs == 0 {
            return Err(TrackerError::ConfigInvalid(
                "heartbeat_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.enabled_path_prefixes.is_empty() {
            return Err(TrackerError::ConfigInvalid(
                "enabled_path_prefixes must not be empty".to_string(),
            ));
        }
        if let Some(prefix) = self
            .enabled_path_prefixes
            .iter()
            .find(|prefix| !prefix.starts_with('/'))
        {
            return Err(TrackerError::ConfigInvalid(format!(
                "enabled path prefix must start with '/': {}",
                prefix
            )));
        }
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(TrackerError::ConfigInvalid(format!(
                "base_url must be an http(s) URL: {}",
                self.base_url
            )));
        }
        Ok(())
    }

    /// Loads the config file at `path`, falling back to defaults when it is missing.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(TrackerConfig::default())
            }
            Err(err) => {
                return Err(TrackerError::Io {
                    context: format!("reading {}", path.display()),
                    source: err,
                })
            }
        };

        if content.trim().is_empty() {
            return Ok(TrackerConfig::default());
        }

        serde_json::from_str(&content).map_err(|err| TrackerError::ConfigMalformed {
            path: path.to_path_buf(),
            details: err.to_string(),
        })
    }

    /// Loads the default config file, then applies environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = match default_config_path() {
            Some(path) => TrackerConfig::load_from(&path)?,
            None => TrackerConfig::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) {
        if let Ok(value) = env::var(BASE_URL_ENV) {
            if !value.trim().is_empty() {
                self.base_url = value.trim().to_string();
            }
        }
        if let Ok(value) = env::var(HEARTBEAT_ENV) {
            match value.trim().parse::<u64>() {
                Ok(secs) => self.heartbeat_interval_secs = secs,
                Err(err) => {
                    tracing::warn!(value = %value, error = %err, "Ignoring invalid {}", HEARTBEAT_ENV);
                }
            }
        }
    }
}

/// Returns the path to the tracker configuration file.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
}

/// Returns the default directory for file-backed tab stores.
pub fn default_store_dir() -> Option<PathBuf> {
    dirs::data_local_dir().map(|dir| dir.join(CONFIG_DIR).join("tabs"))
}
