//! Page views within an open session.
//!
//! At most one page view is open at a time: starting a new one always closes
//! the previous one first. The open id is cleared as soon as the close has been
//! dispatched, whether or not the backend acknowledged it.

use activity_tracker_protocol::{
    clamp_title, PageViewEndRequest, PageViewId, PageViewStartRequest, SessionId,
};
use chrono::{DateTime, SecondsFormat, Utc};

use crate::api::{report_failure, TrackerApi};
use crate::paths::Route;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenPageView {
    pub id: PageViewId,
    pub path: String,
    pub opened_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct PageViewTracker {
    current: Option<OpenPageView>,
}

impl PageViewTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&OpenPageView> {
        self.current.as_ref()
    }

    pub fn is_open_for(&self, path: &str) -> bool {
        self.current
            .as_ref()
            .map(|open| open.path == path)
            .unwrap_or(false)
    }

    /// Closes any open page view (awaited), then opens one for `route`.
    pub fn start_page_view(&mut self, api: &TrackerApi, session_id: &SessionId, route: &Route) {
        self.end_page_view(api, None);

        let request = PageViewStartRequest {
            session_id: session_id.clone(),
            path: route.path().to_string(),
            title: clamp_title(route.title()),
        };
        match api.start_page_view(&request) {
            Ok(response) if !response.page_view_id.is_blank() => {
                tracing::debug!(
                    page_view_id = %response.page_view_id,
                    path = route.path(),
                    "Page view started"
                );
                self.current = Some(OpenPageView {
                    id: response.page_view_id,
                    path: route.path().to_string(),
                    opened_at: Utc::now(),
                });
            }
            Ok(_) => tracing::warn!(path = route.path(), "Page view start returned a blank id"),
            Err(err) => report_failure("page view start", &err),
        }
    }

    /// Closes the open page view, if any.
    ///
    /// With `left_at` (hide/unload) the close goes out as a beacon; without it
    /// the request is sent normally and awaited.
    pub fn end_page_view(&mut self, api: &TrackerApi, left_at: Option<DateTime<Utc>>) {
        let Some(open) = self.current.take() else {
            return;
        };

        match left_at {
            Some(left_at) => {
                let request = PageViewEndRequest {
                    page_view_id: open.id.clone(),
                    left_at: Some(format_timestamp(left_at)),
                };
                api.end_page_view_beacon(&request);
            }
            None => {
                let request = PageViewEndRequest {
                    page_view_id: open.id.clone(),
                    left_at: None,
                };
                if let Err(err) = api.end_page_view(&request) {
                    report_failure("page view end", &err);
                }
            }
        }
        tracing::debug!(
            page_view_id = %open.id,
            path = %open.path,
            open_ms = (Utc::now() - open.opened_at).num_milliseconds(),
            "Page view ended"
        );
    }

    /// Forgets the open page view without a request; the backend closes it
    /// together with its session.
    pub fn discard(&mut self) {
        self.current = None;
    }
}

/// Millisecond-precision UTC timestamp, e.g. `2026-01-31T12:00:00.000Z`.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}
