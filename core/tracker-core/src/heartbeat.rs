//! Liveness ticker for an open, visible session.
//!
//! One background thread per running heartbeat. `start` always stops the
//! previous ticker before spawning a new one, so at most one is alive per
//! scheduler. Stopping never waits for an in-flight request: the thread
//! finishes that tick, sees the stop signal and exits without ticking again.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

use activity_tracker_protocol::{HeartbeatRequest, SessionId};

use crate::api::{report_failure, TrackerApi};

struct Ticker {
    stop_tx: Sender<()>,
    session_id: SessionId,
}

pub struct HeartbeatScheduler {
    interval: Duration,
    active: Option<Ticker>,
}

impl HeartbeatScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            active: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.active.as_ref().map(|ticker| &ticker.session_id)
    }

    pub fn start(&mut self, api: &TrackerApi, session_id: &SessionId) {
        self.stop();

        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let api = api.clone();
        let request = HeartbeatRequest {
            session_id: session_id.clone(),
        };
        let interval = self.interval;

        let spawned = thread::Builder::new()
            .name("tracker-heartbeat".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        if let Err(err) = api.heartbeat(&request) {
                            report_failure("heartbeat", &err);
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            });

        match spawned {
            Ok(_) => {
                tracing::debug!(session_id = %session_id, interval_ms = interval.as_millis() as u64, "Heartbeat started");
                self.active = Some(Ticker {
                    stop_tx,
                    session_id: session_id.clone(),
                });
            }
            Err(err) => {
                tracing::warn!(error = %err, "Failed to spawn heartbeat thread");
            }
        }
    }

    /// Idempotent.
    pub fn stop(&mut self) {
        if let Some(ticker) = self.active.take() {
            let _ = ticker.stop_tx.send(());
            tracing::debug!(session_id = %ticker.session_id, "Heartbeat stopped");
        }
    }
}

impl Drop for HeartbeatScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
