//! Host events accepted on the `run` input stream, one JSON object per line.
//!
//! ```text
//! {"event":"navigate","path":"/business_dashboard/menu","title":"Menu"}
//! {"event":"visibility","state":"hidden"}
//! {"event":"unload"}
//! {"event":"logout"}
//! {"event":"login"}
//! {"event":"sleep","ms":250}
//! {"event":"flush","timeout_ms":2000}
//! ```
//!
//! Blank lines and lines starting with `#` are ignored.

use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracker_core::{ActivityTracker, Route, Visibility};

const DEFAULT_FLUSH_MS: u64 = 2000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HostEvent {
    Navigate {
        path: String,
        #[serde(default)]
        title: String,
    },
    Visibility {
        state: Visibility,
    },
    Unload,
    Logout,
    Login,
    /// Lets the heartbeat tick between scripted events.
    Sleep {
        ms: u64,
    },
    Flush {
        #[serde(default = "default_flush_ms")]
        timeout_ms: u64,
    },
}

fn default_flush_ms() -> u64 {
    DEFAULT_FLUSH_MS
}

/// Parses one input line. `Ok(None)` for blank and comment lines.
pub fn parse_line(line: &str) -> Result<Option<HostEvent>, String> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }
    serde_json::from_str(trimmed)
        .map(Some)
        .map_err(|e| format!("Failed to parse host event: {}", e))
}

pub fn apply(tracker: &ActivityTracker, event: HostEvent) {
    match event {
        HostEvent::Navigate { path, title } => tracker.on_route_change(Route::new(path, title)),
        HostEvent::Visibility { state } => tracker.on_visibility_change(state),
        HostEvent::Unload => tracker.on_unload(),
        HostEvent::Logout => tracker.logout(),
        HostEvent::Login => tracker.on_login(),
        HostEvent::Sleep { ms } => thread::sleep(Duration::from_millis(ms)),
        HostEvent::Flush { timeout_ms } => {
            if !tracker.flush_beacons(Duration::from_millis(timeout_ms)) {
                tracing::warn!(timeout_ms, "Beacons still in flight after flush");
            }
        }
    }
}
