//! Network delivery for tracking calls.
//!
//! Two channels, chosen by the call site:
//!
//! - [`RequestChannel`]: ordinary request/response. The caller waits for the
//!   result and gets a classified [`DeliveryError`] on failure.
//! - [`BeaconChannel`]: one-way, non-blocking send used while the page is being
//!   hidden or torn down. There is no result; a send is never retried.
//!
//! [`HttpChannel`] and [`ThreadBeacon`] are the production implementations.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use activity_tracker_protocol::{Endpoint, HttpMethod};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, COOKIE};
use reqwest::{StatusCode, Url};
use serde_json::Value;

use crate::config::TrackerConfig;
use crate::error::{DeliveryError, TrackerError};

const DRAIN_POLL_MS: u64 = 10;

pub trait RequestChannel: Send + Sync {
    /// Sends `body` to `endpoint` and returns the decoded JSON response
    /// (`Value::Null` for an empty 2xx body).
    fn request(&self, endpoint: Endpoint, body: Option<Value>) -> Result<Value, DeliveryError>;
}

pub trait BeaconChannel: Send + Sync {
    /// Queues a fire-and-forget send and returns immediately.
    fn send_beacon(&self, endpoint: Endpoint, body: Value);

    /// Waits up to `timeout` for queued sends to leave the process.
    /// Returns false if some were still in flight.
    fn drain(&self, _timeout: Duration) -> bool {
        true
    }
}

/// The pair of channels the tracker delivers through.
#[derive(Clone)]
pub struct Delivery {
    pub request: Arc<dyn RequestChannel>,
    pub beacon: Arc<dyn BeaconChannel>,
}

impl Delivery {
    pub fn new(request: Arc<dyn RequestChannel>, beacon: Arc<dyn BeaconChannel>) -> Self {
        Self { request, beacon }
    }

    /// HTTP delivery for both modes, sharing one client (and its cookie jar).
    pub fn over_http(config: &TrackerConfig) -> Result<Self, TrackerError> {
        let http: Arc<dyn RequestChannel> = Arc::new(HttpChannel::new(config)?);
        let beacon = ThreadBeacon::new(Arc::clone(&http));
        Ok(Self::new(http, Arc::new(beacon)))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// HTTP
// ═══════════════════════════════════════════════════════════════════════════════

/// Blocking JSON-over-HTTP channel with a cookie store for session auth.
#[derive(Clone)]
pub struct HttpChannel {
    client: Client,
    base: Url,
}

impl HttpChannel {
    pub fn new(config: &TrackerConfig) -> Result<Self, TrackerError> {
        let mut headers = HeaderMap::new();
        if let Some(cookie) = config.session_cookie.as_deref() {
            let value = HeaderValue::from_str(cookie)
                .map_err(|err| TrackerError::ConfigInvalid(format!("session_cookie: {}", err)))?;
            headers.insert(COOKIE, value);
        }

        let client = Client::builder()
            .timeout(config.request_timeout())
            .cookie_store(true)
            .default_headers(headers)
            .build()
            .map_err(|err| TrackerError::Client(err.to_string()))?;

        Ok(Self {
            client,
            base: parse_base_url(&config.base_url)?,
        })
    }

    pub fn endpoint_url(&self, endpoint: Endpoint) -> Result<Url, DeliveryError> {
        self.base
            .join(endpoint.path())
            .map_err(|err| DeliveryError::Encode {
                endpoint,
                message: format!("invalid endpoint URL: {}", err),
            })
    }
}

impl RequestChannel for HttpChannel {
    fn request(&self, endpoint: Endpoint, body: Option<Value>) -> Result<Value, DeliveryError> {
        let url = self.endpoint_url(endpoint)?;
        let builder = match endpoint.method() {
            HttpMethod::Get => self.client.get(url),
            HttpMethod::Post => self
                .client
                .post(url)
                .json(&body.unwrap_or_else(|| Value::Object(Default::default()))),
        };

        let response = builder.send().map_err(|err| DeliveryError::Network {
            endpoint,
            message: err.to_string(),
        })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(DeliveryError::Unauthorized { endpoint });
        }
        if !status.is_success() {
            return Err(DeliveryError::Status {
                endpoint,
                status: status.as_u16(),
            });
        }

        let bytes = response.bytes().map_err(|err| DeliveryError::Network {
            endpoint,
            message: format!("failed to read body: {}", err),
        })?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }

        serde_json::from_slice(&bytes).map_err(|err| DeliveryError::InvalidResponse {
            endpoint,
            message: err.to_string(),
        })
    }
}

/// Parses the base URL, making sure relative endpoint paths join beneath it.
fn parse_base_url(raw: &str) -> Result<Url, TrackerError> {
    let trimmed = raw.trim();
    let with_slash = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{}/", trimmed)
    };
    Url::parse(&with_slash)
        .map_err(|err| TrackerError::ConfigInvalid(format!("base_url {}: {}", raw, err)))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Best-effort
// ═══════════════════════════════════════════════════════════════════════════════

/// Best-effort channel: each send runs on a detached thread.
///
/// The caller never waits and never learns the outcome. Hosts that are about to
/// exit can call [`BeaconChannel::drain`] to give queued sends a bounded window.
#[derive(Clone)]
pub struct ThreadBeacon {
    channel: Arc<dyn RequestChannel>,
    in_flight: Arc<AtomicUsize>,
}

impl ThreadBeacon {
    pub fn new(channel: Arc<dyn RequestChannel>) -> Self {
        Self {
            channel,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

struct InFlightGuard(Arc<AtomicUsize>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl BeaconChannel for ThreadBeacon {
    fn send_beacon(&self, endpoint: Endpoint, body: Value) {
        let channel = Arc::clone(&self.channel);
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let guard = InFlightGuard(Arc::clone(&self.in_flight));

        let spawned = thread::Builder::new()
            .name("tracker-beacon".to_string())
            .spawn(move || {
                let _guard = guard;
                if let Err(err) = channel.request(endpoint, Some(body)) {
                    tracing::debug!(endpoint = %endpoint, error = %err, "Beacon send failed");
                }
            });

        if let Err(err) = spawned {
            // The closure (and its guard) is dropped with the error, restoring the count.
            tracing::warn!(endpoint = %endpoint, error = %err, "Failed to spawn beacon thread");
        }
    }

    fn drain(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.in_flight() > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(DRAIN_POLL_MS));
        }
        true
    }
}
