//! Tab-scoped key/value persistence.
//!
//! The tracker never touches ambient storage directly; hosts inject a
//! [`TabScopedStore`] whose lifetime matches one browsing tab. Values are plain
//! strings keyed by the fixed names in [`keys`].
//!
//! # File Format
//!
//! [`FileStore`] keeps one JSON object per tab scope:
//!
//! ```json
//! {
//!   "version": 1,
//!   "values": { "tracker.tab_id": "01J...", "tracker.session_id": "42" }
//! }
//! ```
//!
//! Empty or corrupt files load as an empty store. Writes go through a temp
//! file + rename so a crash mid-write never leaves a partial file.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use fs_err as fs;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::{Result, TrackerError};

/// Fixed key names for tracker state.
pub mod keys {
    pub const TAB_ID: &str = "tracker.tab_id";
    pub const SESSION_ID: &str = "tracker.session_id";
    pub const SESSION_KILLED: &str = "tracker.session_killed";
}

const STORE_VERSION: u32 = 1;

/// Capability for tab-scoped storage (get/set/remove by key).
pub trait TabScopedStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// Process-local store, for tests and hosts without durable tab storage.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TabScopedStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values
            .lock()
            .map_err(|_| TrackerError::StoreUnavailable("memory store poisoned".to_string()))?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.values
            .lock()
            .map_err(|_| TrackerError::StoreUnavailable("memory store poisoned".to_string()))?
            .remove(key);
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    values: HashMap<String, String>,
}

impl Default for StoreFile {
    fn default() -> Self {
        StoreFile {
            version: STORE_VERSION,
            values: HashMap::new(),
        }
    }
}

/// File-backed store: one JSON file per tab scope, written through on every change.
#[derive(Debug)]
pub struct FileStore {
    file_path: PathBuf,
    values: Mutex<HashMap<String, String>>,
}

impl FileStore {
    /// Opens (or lazily creates) the store for `scope` under `dir`.
    pub fn open(dir: &Path, scope: &str) -> Result<Self> {
        let scope = sanitize_scope(scope);
        if scope.is_empty() {
            return Err(TrackerError::StoreUnavailable(
                "tab scope name must not be empty".to_string(),
            ));
        }
        let file_path = dir.join(format!("{}.json", scope));
        let values = load_values(&file_path);
        Ok(Self {
            file_path,
            values: Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    /// Deletes the backing file, the equivalent of the tab's storage being cleared.
    pub fn clear(&self) -> Result<()> {
        self.lock_values().clear();
        match fs::remove_file(&self.file_path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(TrackerError::Io {
                context: "clearing tab store".to_string(),
                source: err,
            }),
        }
    }

    fn lock_values(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn save(&self, values: &HashMap<String, String>) -> Result<()> {
        let store_file = StoreFile {
            version: STORE_VERSION,
            values: values.clone(),
        };
        let content =
            serde_json::to_string_pretty(&store_file).map_err(|source| TrackerError::Json {
                context: "serializing tab store".to_string(),
                source,
            })?;

        let parent_dir = self.file_path.parent().ok_or_else(|| {
            TrackerError::StoreUnavailable("store path has no parent directory".to_string())
        })?;
        fs::create_dir_all(parent_dir).map_err(|source| TrackerError::Io {
            context: "creating tab store directory".to_string(),
            source,
        })?;

        let io_err = |context: &str| {
            let context = context.to_string();
            move |source: std::io::Error| TrackerError::Io { context, source }
        };
        let mut temp_file =
            NamedTempFile::new_in(parent_dir).map_err(io_err("creating temp store file"))?;
        temp_file
            .write_all(content.as_bytes())
            .map_err(io_err("writing temp store file"))?;
        temp_file.flush().map_err(io_err("flushing temp store file"))?;
        temp_file
            .persist(&self.file_path)
            .map_err(|err| TrackerError::Io {
                context: "committing tab store".to_string(),
                source: err.error,
            })?;
        Ok(())
    }
}

impl TabScopedStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.lock_values().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self.lock_values();
        if values.get(key).map(String::as_str) == Some(value) {
            return Ok(());
        }
        values.insert(key.to_string(), value.to_string());
        self.save(&values)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut values = self.lock_values();
        if values.remove(key).is_none() {
            return Ok(());
        }
        self.save(&values)
    }
}

fn load_values(file_path: &Path) -> HashMap<String, String> {
    let content = match fs::read_to_string(file_path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return HashMap::new(),
        Err(err) => {
            tracing::warn!(path = %file_path.display(), error = %err, "Failed to read tab store, starting empty");
            return HashMap::new();
        }
    };

    if content.trim().is_empty() {
        return HashMap::new();
    }

    match serde_json::from_str::<StoreFile>(&content) {
        Ok(store_file) if store_file.version == STORE_VERSION => store_file.values,
        Ok(store_file) => {
            tracing::warn!(
                version = store_file.version,
                expected = STORE_VERSION,
                "Unsupported tab store version, starting empty"
            );
            HashMap::new()
        }
        Err(err) => {
            tracing::warn!(path = %file_path.display(), error = %err, "Corrupt tab store, starting empty");
            HashMap::new()
        }
    }
}

fn sanitize_scope(scope: &str) -> String {
    scope
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
