//! Logging setup for tracker-hook.
//!
//! Stdout carries command output, so logs go to a daily rolling file under the
//! local data directory (or stderr when no such directory exists).

use fs_err as fs;
use std::env;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

const DEBUG_ENV: &str = "TRACKER_DEBUG_LOG";
const LOG_DIR_ENV: &str = "TRACKER_LOG_DIR";
const LOG_FILE_PREFIX: &str = "tracker-hook.log";

/// Installs the global subscriber. Keep the returned guard alive until exit so
/// buffered lines are flushed.
pub fn init() -> Option<WorkerGuard> {
    let filter = if debug_enabled() {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let Some(dir) = log_dir().filter(|dir| fs::create_dir_all(dir).is_ok()) else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
        return None;
    };

    let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init();
    Some(guard)
}

fn debug_enabled() -> bool {
    env::var(DEBUG_ENV)
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false)
}

fn log_dir() -> Option<PathBuf> {
    if let Ok(dir) = env::var(LOG_DIR_ENV) {
        if !dir.trim().is_empty() {
            return Some(PathBuf::from(dir));
        }
    }
    dirs::data_local_dir().map(|dir| dir.join("activity-tracker").join("logs"))
}
