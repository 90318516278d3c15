//! Error types for tracker-core.
//!
//! Tracking operations never hand errors to the host application: failures are
//! logged and swallowed inside the tracker. These types exist for the layers
//! underneath (configuration, storage, delivery) so each failure is classified
//! before it is dropped.

use std::path::PathBuf;

use activity_tracker_protocol::Endpoint;

// ═══════════════════════════════════════════════════════════════════════════════
// Delivery Errors
// ═══════════════════════════════════════════════════════════════════════════════

/// Failure of a normal-mode request.
///
/// Best-effort sends never produce one of these; their outcome is unobservable.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Unauthorized response from {endpoint}")]
    Unauthorized { endpoint: Endpoint },

    #[error("HTTP {status} from {endpoint}")]
    Status { endpoint: Endpoint, status: u16 },

    #[error("Network error calling {endpoint}: {message}")]
    Network { endpoint: Endpoint, message: String },

    #[error("Invalid response from {endpoint}: {message}")]
    InvalidResponse { endpoint: Endpoint, message: String },

    #[error("Failed to encode request for {endpoint}: {message}")]
    Encode { endpoint: Endpoint, message: String },
}

impl DeliveryError {
    /// 401s are treated as a transient authentication hiccup, never as a failure.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, DeliveryError::Unauthorized { .. })
    }

    pub fn endpoint(&self) -> Endpoint {
        match self {
            DeliveryError::Unauthorized { endpoint }
            | DeliveryError::Status { endpoint, .. }
            | DeliveryError::Network { endpoint, .. }
            | DeliveryError::InvalidResponse { endpoint, .. }
            | DeliveryError::Encode { endpoint, .. } => *endpoint,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tracker Errors
// ═══════════════════════════════════════════════════════════════════════════════

/// Errors from configuration loading and the tab-scoped store.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("HTTP client setup failed: {0}")]
    Client(String),
}

/// Convenience type alias for Results using TrackerError.
pub type Result<T> = std::result::Result<T, TrackerError>;

impl From<TrackerError> for String {
    fn from(err: TrackerError) -> String {
        err.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_is_classified() {
        let err = DeliveryError::Unauthorized {
            endpoint: Endpoint::SessionHeartbeat,
        };
        assert!(err.is_unauthorized());
        assert_eq!(err.endpoint(), Endpoint::SessionHeartbeat);

        let err = DeliveryError::Status {
            endpoint: Endpoint::SessionStart,
            status: 500,
        };
        assert!(!err.is_unauthorized());
        assert_eq!(err.to_string(), "HTTP 500 from session/start");
    }
}
