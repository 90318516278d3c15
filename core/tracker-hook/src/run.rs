//! `run`: drives one tracker from a stream of host events.
//!
//! Reads newline-delimited [`HostEvent`]s from stdin (or `--input`), applies
//! them in order, then flushes pending beacons and prints a JSON summary of the
//! final tracker state on stdout.

use fs_err as fs;
use serde::Serialize;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracker_core::{ActivityTracker, Delivery};

use crate::events::{self, HostEvent};
use crate::settings::{self, Overrides};

const EXIT_FLUSH_MS: u64 = 2000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub tab_id: String,
    pub session_id: Option<String>,
    pub page_view_id: Option<String>,
    pub state: &'static str,
    pub events_applied: usize,
    pub lines_skipped: usize,
    pub beacons_flushed: bool,
}

pub fn run(overrides: &Overrides, input: Option<&Path>, strict: bool) -> Result<(), String> {
    let config = settings::resolve_config(overrides)?;
    let store = settings::open_store(overrides)?;
    let delivery = Delivery::over_http(&config)?;
    tracing::info!(
        base_url = %config.base_url,
        heartbeat_secs = config.heartbeat_interval_secs,
        tab = %overrides.tab,
        store = %store.path().display(),
        "tracker-hook run starting"
    );

    let tracker = ActivityTracker::new(&config, Arc::new(store), delivery);
    tracker.init();

    let summary = match input {
        Some(path) => {
            let file = fs::File::open(path).map_err(|e| format!("Failed to open input: {}", e))?;
            drive(&tracker, BufReader::new(file), strict)?
        }
        None => drive(&tracker, io::stdin().lock(), strict)?,
    };

    let line = serde_json::to_string(&summary)
        .map_err(|e| format!("Failed to serialize summary: {}", e))?;
    println!("{}", line);
    Ok(())
}

/// Applies every event from `reader`, then disposes the tracker.
///
/// Malformed lines are skipped with a warning, or abort the run when `strict`.
pub fn drive<R: BufRead>(
    tracker: &ActivityTracker,
    reader: R,
    strict: bool,
) -> Result<RunSummary, String> {
    let mut events_applied = 0;
    let mut lines_skipped = 0;

    for (index, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| format!("Failed to read input: {}", e))?;
        let event: HostEvent = match events::parse_line(&line) {
            Ok(Some(event)) => event,
            Ok(None) => continue,
            Err(e) if strict => return Err(format!("line {}: {}", index + 1, e)),
            Err(e) => {
                tracing::warn!(line = index + 1, error = %e, "Skipping host event");
                lines_skipped += 1;
                continue;
            }
        };
        tracing::debug!(line = index + 1, event = ?event, "Applying host event");
        events::apply(tracker, event);
        events_applied += 1;
    }

    let beacons_flushed = tracker.flush_beacons(Duration::from_millis(EXIT_FLUSH_MS));
    let summary = RunSummary {
        tab_id: tracker.tab_id(),
        session_id: tracker.session_id().map(|id| id.to_string()),
        page_view_id: tracker.page_view_id().map(|id| id.to_string()),
        state: tracker.state().as_str(),
        events_applied,
        lines_skipped,
        beacons_flushed,
    };
    tracker.dispose();
    Ok(summary)
}
