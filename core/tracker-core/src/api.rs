//! Typed calls for the tracking endpoints.
//!
//! Requests are validated against the protocol rules before they leave the
//! process; an invalid request is reported as [`DeliveryError::Encode`] for
//! normal sends and dropped (with a warning) for beacons.

use activity_tracker_protocol::{
    Endpoint, HeartbeatRequest, PageViewEndRequest, PageViewStartRequest, PageViewStartResponse,
    SessionEndRequest, SessionStartRequest, SessionStartResponse,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::delivery::Delivery;
use crate::error::DeliveryError;

#[derive(Clone)]
pub struct TrackerApi {
    delivery: Delivery,
}

impl TrackerApi {
    pub fn new(delivery: Delivery) -> Self {
        Self { delivery }
    }

    pub fn delivery(&self) -> &Delivery {
        &self.delivery
    }

    /// Warm-up probe; callers ignore every outcome.
    pub fn probe_identity(&self) -> Result<Value, DeliveryError> {
        self.delivery.request.request(Endpoint::Me, None)
    }

    pub fn start_session(
        &self,
        request: &SessionStartRequest,
    ) -> Result<SessionStartResponse, DeliveryError> {
        check(Endpoint::SessionStart, request.validate())?;
        let response = self.send(Endpoint::SessionStart, request)?;
        decode(Endpoint::SessionStart, response)
    }

    pub fn heartbeat(&self, request: &HeartbeatRequest) -> Result<(), DeliveryError> {
        check(Endpoint::SessionHeartbeat, request.validate())?;
        self.send(Endpoint::SessionHeartbeat, request).map(|_| ())
    }

    pub fn end_session(&self, request: &SessionEndRequest) -> Result<(), DeliveryError> {
        check(Endpoint::SessionEnd, request.validate())?;
        self.send(Endpoint::SessionEnd, request).map(|_| ())
    }

    pub fn end_session_beacon(&self, request: &SessionEndRequest) {
        if check(Endpoint::SessionEnd, request.validate()).is_ok() {
            self.beacon(Endpoint::SessionEnd, request);
        }
    }

    pub fn start_page_view(
        &self,
        request: &PageViewStartRequest,
    ) -> Result<PageViewStartResponse, DeliveryError> {
        check(Endpoint::PageViewStart, request.validate())?;
        let response = self.send(Endpoint::PageViewStart, request)?;
        decode(Endpoint::PageViewStart, response)
    }

    pub fn end_page_view(&self, request: &PageViewEndRequest) -> Result<(), DeliveryError> {
        check(Endpoint::PageViewEnd, request.validate())?;
        self.send(Endpoint::PageViewEnd, request).map(|_| ())
    }

    pub fn end_page_view_beacon(&self, request: &PageViewEndRequest) {
        if check(Endpoint::PageViewEnd, request.validate()).is_ok() {
            self.beacon(Endpoint::PageViewEnd, request);
        }
    }

    fn send<T: Serialize>(&self, endpoint: Endpoint, body: &T) -> Result<Value, DeliveryError> {
        let body = encode(endpoint, body)?;
        self.delivery.request.request(endpoint, Some(body))
    }

    fn beacon<T: Serialize>(&self, endpoint: Endpoint, body: &T) {
        match encode(endpoint, body) {
            Ok(body) => self.delivery.beacon.send_beacon(endpoint, body),
            Err(err) => tracing::warn!(error = %err, "Dropping beacon"),
        }
    }
}

/// Logs a swallowed normal-mode failure. 401s are expected noise and stay at debug.
pub(crate) fn report_failure(action: &str, err: &DeliveryError) {
    if err.is_unauthorized() {
        tracing::debug!(action, endpoint = %err.endpoint(), "Ignoring unauthorized tracking response");
    } else {
        tracing::warn!(action, error = %err, "Tracking call failed");
    }
}

fn check(
    endpoint: Endpoint,
    result: Result<(), activity_tracker_protocol::ErrorInfo>,
) -> Result<(), DeliveryError> {
    result.map_err(|info| {
        tracing::warn!(endpoint = %endpoint, code = %info.code, message = %info.message, "Invalid tracking request");
        DeliveryError::Encode {
            endpoint,
            message: info.to_string(),
        }
    })
}

fn encode<T: Serialize>(endpoint: Endpoint, body: &T) -> Result<Value, DeliveryError> {
    serde_json::to_value(body).map_err(|err| DeliveryError::Encode {
        endpoint,
        message: err.to_string(),
    })
}

fn decode<T: DeserializeOwned>(endpoint: Endpoint, value: Value) -> Result<T, DeliveryError> {
    serde_json::from_value(value).map_err(|err| DeliveryError::InvalidResponse {
        endpoint,
        message: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingChannel;
    use activity_tracker_protocol::RemoteId;
    use serde_json::json;

    #[test]
    fn start_session_decodes_numeric_id() {
        let channel = RecordingChannel::new();
        channel.respond(Endpoint::SessionStart, json!({"session_id": 11}));
        let api = TrackerApi::new(channel.delivery());

        let response = api
            .start_session(&SessionStartRequest {
                tab_id: "tab-1".to_string(),
                parent_path: "/business_dashboard".to_string(),
            })
            .unwrap();
        assert_eq!(response.session_id, RemoteId::Number(11));
    }

    #[test]
    fn missing_id_in_response_is_invalid() {
        let channel = RecordingChannel::new();
        channel.respond(Endpoint::PageViewStart, json!({"ok": true}));
        let api = TrackerApi::new(channel.delivery());

        let err = api
            .start_page_view(&PageViewStartRequest {
                session_id: RemoteId::from("s-1"),
                path: "/business_dashboard".to_string(),
                title: "Home".to_string(),
            })
            .unwrap_err();
        assert!(matches!(err, DeliveryError::InvalidResponse { .. }));
    }

    #[test]
    fn invalid_request_never_reaches_the_wire() {
        let channel = RecordingChannel::new();
        let api = TrackerApi::new(channel.delivery());

        let err = api
            .end_page_view(&PageViewEndRequest {
                page_view_id: RemoteId::from("pv-1"),
                left_at: Some("later".to_string()),
            })
            .unwrap_err();
        assert!(matches!(err, DeliveryError::Encode { .. }));

        api.end_page_view_beacon(&PageViewEndRequest {
            page_view_id: RemoteId::from(""),
            left_at: None,
        });
        assert!(channel.calls().is_empty());
    }

    #[test]
    fn beacon_sends_use_best_effort_mode() {
        let channel = RecordingChannel::new();
        let api = TrackerApi::new(channel.delivery());

        api.end_session_beacon(&SessionEndRequest {
            session_id: RemoteId::from("s-1"),
            reason: activity_tracker_protocol::EndReason::Unload,
        });

        let calls = channel.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].best_effort);
        assert_eq!(calls[0].body["reason"], "unload");
    }
}
