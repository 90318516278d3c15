//! In-process channel that records every tracking call.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use activity_tracker_protocol::Endpoint;
use serde_json::{json, Value};

use crate::delivery::{BeaconChannel, Delivery, RequestChannel};
use crate::error::DeliveryError;

#[derive(Debug, Clone)]
pub struct Call {
    pub endpoint: Endpoint,
    pub body: Value,
    pub best_effort: bool,
}

#[derive(Default)]
struct Inner {
    calls: Vec<Call>,
    responses: HashMap<Endpoint, Value>,
    failures: HashMap<Endpoint, u16>,
    next_id: u64,
    delay: Duration,
}

/// Implements both channels. Session and page-view starts get fresh ids
/// (`s-1`, `pv-2`, ...) unless a response is scripted.
#[derive(Clone, Default)]
pub struct RecordingChannel {
    inner: Arc<Mutex<Inner>>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivery(&self) -> Delivery {
        Delivery::new(Arc::new(self.clone()), Arc::new(self.clone()))
    }

    pub fn respond(&self, endpoint: Endpoint, value: Value) {
        self.inner.lock().unwrap().responses.insert(endpoint, value);
    }

    /// Makes every normal request to `endpoint` fail with `status`.
    pub fn fail(&self, endpoint: Endpoint, status: u16) {
        self.inner.lock().unwrap().failures.insert(endpoint, status);
    }

    pub fn recover(&self, endpoint: Endpoint) {
        self.inner.lock().unwrap().failures.remove(&endpoint);
    }

    /// Holds every normal request for `delay` after recording it.
    pub fn set_delay(&self, delay: Duration) {
        self.inner.lock().unwrap().delay = delay;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn calls_to(&self, endpoint: Endpoint) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| call.endpoint == endpoint)
            .collect()
    }

    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.calls().into_iter().map(|call| call.endpoint).collect()
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap().calls.clear();
    }

    /// Polls until `endpoint` has been called at least `count` times.
    pub fn wait_for(&self, endpoint: Endpoint, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.calls_to(endpoint).len() >= count {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }
}

impl Inner {
    fn answer(&mut self, endpoint: Endpoint) -> Result<Value, DeliveryError> {
        if let Some(status) = self.failures.get(&endpoint).copied() {
            return Err(if status == 401 {
                DeliveryError::Unauthorized { endpoint }
            } else {
                DeliveryError::Status { endpoint, status }
            });
        }

        if let Some(value) = self.responses.get(&endpoint) {
            return Ok(value.clone());
        }

        self.next_id += 1;
        let id = self.next_id;
        Ok(match endpoint {
            Endpoint::SessionStart => json!({ "session_id": format!("s-{}", id) }),
            Endpoint::PageViewStart => json!({ "page_view_id": format!("pv-{}", id) }),
            Endpoint::Me => json!({ "id": 1, "username": "tester" }),
            _ => Value::Null,
        })
    }
}

impl RequestChannel for RecordingChannel {
    fn request(&self, endpoint: Endpoint, body: Option<Value>) -> Result<Value, DeliveryError> {
        let (result, delay) = {
            let mut inner = self.inner.lock().unwrap();
            inner.calls.push(Call {
                endpoint,
                body: body.unwrap_or(Value::Null),
                best_effort: false,
            });
            (inner.answer(endpoint), inner.delay)
        };
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        result
    }
}

impl BeaconChannel for RecordingChannel {
    fn send_beacon(&self, endpoint: Endpoint, body: Value) {
        self.inner.lock().unwrap().calls.push(Call {
            endpoint,
            body,
            best_effort: true,
        });
    }
}
