//! Session lifecycle for one tab.
//!
//! The manager is the only writer of the session id. The id is cached in memory
//! and mirrored to the tab-scoped store so a reload in the same tab reuses it.
//!
//! ## Ending a session
//!
//! ```text
//! navigate_away → awaited request, id cleared whatever the outcome
//! unload        → beacon, in-memory id dropped, stored id kept for a reload
//! logout        → beacon, in-memory and stored id cleared
//! ```

use std::sync::Arc;

use activity_tracker_protocol::{EndReason, SessionEndRequest, SessionId, SessionStartRequest};

use crate::api::{report_failure, TrackerApi};
use crate::store::{keys, TabScopedStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnsureOutcome {
    /// A session id was already cached; nothing was sent.
    Existing(SessionId),
    Created(SessionId),
    /// Session start failed; the tracker stays without a session.
    Unavailable,
}

impl EnsureOutcome {
    pub fn session_id(&self) -> Option<&SessionId> {
        match self {
            EnsureOutcome::Existing(id) | EnsureOutcome::Created(id) => Some(id),
            EnsureOutcome::Unavailable => None,
        }
    }
}

pub struct SessionManager {
    store: Arc<dyn TabScopedStore>,
    current: Option<SessionId>,
}

impl SessionManager {
    /// Restores a session id persisted by an earlier page load in this tab.
    pub fn restore(store: Arc<dyn TabScopedStore>) -> Self {
        let current = store
            .get(keys::SESSION_ID)
            .and_then(|raw| SessionId::from_stored(&raw));
        if let Some(id) = &current {
            tracing::debug!(session_id = %id, "Restored tracking session");
        }
        Self { store, current }
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.current.as_ref()
    }

    pub fn ensure_session(
        &mut self,
        api: &TrackerApi,
        tab_id: &str,
        parent_path: &str,
        probe_identity: bool,
    ) -> EnsureOutcome {
        if let Some(id) = &self.current {
            return EnsureOutcome::Existing(id.clone());
        }

        if probe_identity {
            if let Err(err) = api.probe_identity() {
                tracing::debug!(error = %err, "Identity probe failed, continuing");
            }
        }

        let request = SessionStartRequest {
            tab_id: tab_id.to_string(),
            parent_path: parent_path.to_string(),
        };
        match api.start_session(&request) {
            Ok(response) if !response.session_id.is_blank() => {
                let id = response.session_id;
                if let Err(err) = self.store.set(keys::SESSION_ID, &id.to_stored()) {
                    tracing::warn!(error = %err, "Failed to persist session id");
                }
                tracing::info!(session_id = %id, tab_id, parent_path, "Tracking session started");
                self.current = Some(id.clone());
                EnsureOutcome::Created(id)
            }
            Ok(_) => {
                tracing::warn!(parent_path, "Session start returned a blank id");
                EnsureOutcome::Unavailable
            }
            Err(err) => {
                report_failure("session start", &err);
                EnsureOutcome::Unavailable
            }
        }
    }

    /// Ends the cached session, if any. Never fails.
    pub fn end_session(&mut self, api: &TrackerApi, reason: EndReason) {
        let Some(session_id) = self.current.take() else {
            return;
        };
        let request = SessionEndRequest {
            session_id: session_id.clone(),
            reason,
        };

        match reason {
            EndReason::NavigateAway => {
                if let Err(err) = api.end_session(&request) {
                    report_failure("session end", &err);
                }
                self.clear_persisted();
            }
            EndReason::Unload => {
                api.end_session_beacon(&request);
            }
            EndReason::Logout => {
                api.end_session_beacon(&request);
                self.clear_persisted();
            }
        }
        tracing::info!(session_id = %session_id, reason = %reason, "Tracking session ended");
    }

    /// Drops the session without a request and clears the stored id.
    pub fn forget(&mut self) {
        if let Some(id) = self.current.take() {
            tracing::debug!(session_id = %id, "Tracking session forgotten");
        }
        self.clear_persisted();
    }

    fn clear_persisted(&self) {
        if let Err(err) = self.store.remove(keys::SESSION_ID) {
            tracing::warn!(error = %err, "Failed to clear persisted session id");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::testing::RecordingChannel;
    use activity_tracker_protocol::{Endpoint, RemoteId};

    fn setup() -> (RecordingChannel, TrackerApi, Arc<MemoryStore>) {
        let channel = RecordingChannel::new();
        let api = TrackerApi::new(channel.delivery());
        (channel, api, Arc::new(MemoryStore::new()))
    }

    #[test]
    fn creates_once_and_persists() {
        let (channel, api, store) = setup();
        let mut sessions = SessionManager::restore(store.clone());

        let first = sessions.ensure_session(&api, "tab-1", "/business_dashboard", false);
        assert!(matches!(first, EnsureOutcome::Created(_)));
        let second = sessions.ensure_session(&api, "tab-1", "/business_dashboard", false);
        assert!(matches!(second, EnsureOutcome::Existing(_)));

        assert_eq!(channel.calls_to(Endpoint::SessionStart).len(), 1);
        let body = &channel.calls_to(Endpoint::SessionStart)[0].body;
        assert_eq!(body["tab_id"], "tab-1");
        assert_eq!(body["parent_path"], "/business_dashboard");
        assert!(store.get(keys::SESSION_ID).is_some());
    }

    #[test]
    fn restore_reuses_persisted_id() {
        let (channel, api, store) = setup();
        store
            .set(keys::SESSION_ID, &RemoteId::Number(9).to_stored())
            .unwrap();

        let mut sessions = SessionManager::restore(store);
        assert_eq!(sessions.session_id(), Some(&RemoteId::Number(9)));
        let outcome = sessions.ensure_session(&api, "tab-1", "/user_dashboard", true);
        assert_eq!(outcome, EnsureOutcome::Existing(RemoteId::Number(9)));
        assert!(channel.calls().is_empty());
    }

    #[test]
    fn probe_failure_does_not_block_start() {
        let (channel, api, store) = setup();
        channel.fail(Endpoint::Me, 401);
        let mut sessions = SessionManager::restore(store);

        let outcome = sessions.ensure_session(&api, "tab-1", "/super_dashboard", true);
        assert!(matches!(outcome, EnsureOutcome::Created(_)));
        assert_eq!(
            channel.endpoints(),
            vec![Endpoint::Me, Endpoint::SessionStart]
        );
    }

    #[test]
    fn failed_start_leaves_no_session() {
        let (channel, api, store) = setup();
        channel.fail(Endpoint::SessionStart, 500);
        let mut sessions = SessionManager::restore(store.clone());

        let outcome = sessions.ensure_session(&api, "tab-1", "/super_dashboard", false);
        assert_eq!(outcome, EnsureOutcome::Unavailable);
        assert!(sessions.session_id().is_none());
        assert!(store.get(keys::SESSION_ID).is_none());
    }

    #[test]
    fn navigate_away_clears_even_when_end_fails() {
        let (channel, api, store) = setup();
        let mut sessions = SessionManager::restore(store.clone());
        sessions.ensure_session(&api, "tab-1", "/business_dashboard", false);
        channel.fail(Endpoint::SessionEnd, 502);

        sessions.end_session(&api, EndReason::NavigateAway);
        assert!(sessions.session_id().is_none());
        assert!(store.get(keys::SESSION_ID).is_none());

        let end = channel.calls_to(Endpoint::SessionEnd);
        assert_eq!(end.len(), 1);
        assert!(!end[0].best_effort);
        assert_eq!(end[0].body["reason"], "navigate_away");
    }

    #[test]
    fn unload_uses_beacon_and_keeps_stored_id() {
        let (channel, api, store) = setup();
        let mut sessions = SessionManager::restore(store.clone());
        sessions.ensure_session(&api, "tab-1", "/business_dashboard", false);

        sessions.end_session(&api, EndReason::Unload);
        assert!(sessions.session_id().is_none());
        assert!(store.get(keys::SESSION_ID).is_some());

        let end = channel.calls_to(Endpoint::SessionEnd);
        assert!(end[0].best_effort);
        assert_eq!(end[0].body["reason"], "unload");
    }

    #[test]
    fn logout_uses_beacon_and_clears_stored_id() {
        let (channel, api, store) = setup();
        let mut sessions = SessionManager::restore(store.clone());
        sessions.ensure_session(&api, "tab-1", "/business_dashboard", false);

        sessions.end_session(&api, EndReason::Logout);
        assert!(store.get(keys::SESSION_ID).is_none());
        let end = channel.calls_to(Endpoint::SessionEnd);
        assert!(end[0].best_effort);
        assert_eq!(end[0].body["reason"], "logout");
    }

    #[test]
    fn forget_clears_without_a_request() {
        let (channel, api, store) = setup();
        let mut sessions = SessionManager::restore(store.clone());
        sessions.ensure_session(&api, "tab-1", "/business_dashboard", false);
        channel.clear();

        sessions.forget();
        assert!(sessions.session_id().is_none());
        assert!(store.get(keys::SESSION_ID).is_none());
        assert!(channel.calls().is_empty());
    }

    #[test]
    fn end_without_session_is_a_no_op() {
        let (channel, api, store) = setup();
        let mut sessions = SessionManager::restore(store);
        sessions.end_session(&api, EndReason::NavigateAway);
        assert!(channel.calls().is_empty());
    }
}
