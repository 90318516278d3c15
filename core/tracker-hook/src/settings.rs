//! Resolves the effective configuration and tab store for a command.
//!
//! Precedence: defaults < config file < environment < command-line flags.

use std::path::PathBuf;

use tracker_core::{default_store_dir, FileStore, TrackerConfig};

#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub config_path: Option<PathBuf>,
    pub base_url: Option<String>,
    pub heartbeat_secs: Option<u64>,
    pub cookie: Option<String>,
    pub no_probe: bool,
    pub store_dir: Option<PathBuf>,
    pub tab: String,
}

pub fn resolve_config(overrides: &Overrides) -> Result<TrackerConfig, String> {
    let mut config = match &overrides.config_path {
        Some(path) => TrackerConfig::load_from(path)?,
        None => match tracker_core::default_config_path() {
            Some(path) => TrackerConfig::load_from(&path)?,
            None => TrackerConfig::default(),
        },
    };
    config.apply_env();

    if let Some(base_url) = &overrides.base_url {
        config.base_url = base_url.clone();
    }
    if let Some(secs) = overrides.heartbeat_secs {
        config.heartbeat_interval_secs = secs;
    }
    if let Some(cookie) = &overrides.cookie {
        config.session_cookie = Some(cookie.clone());
    }
    if overrides.no_probe {
        config.probe_identity = false;
    }

    config.validate()?;
    Ok(config)
}

pub fn open_store(overrides: &Overrides) -> Result<FileStore, String> {
    let dir = match &overrides.store_dir {
        Some(dir) => dir.clone(),
        None => default_store_dir().ok_or("Cannot determine local data directory")?,
    };
    Ok(FileStore::open(&dir, &overrides.tab)?)
}
