//! Wire types and validation for the activity tracking endpoints.
//!
//! This crate is shared by the tracker and its hosts/test backends to prevent
//! schema drift. The backend remains the authority on validation, but clients
//! reuse the same types to construct valid requests.

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const MAX_PATH_BYTES: usize = 2048;
pub const MAX_TITLE_CHARS: usize = 512;
pub const MAX_ID_BYTES: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
}

/// The backend endpoints consumed by the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    SessionStart,
    SessionHeartbeat,
    SessionEnd,
    PageViewStart,
    PageViewEnd,
    Me,
}

impl Endpoint {
    pub const ALL: [Endpoint; 6] = [
        Endpoint::SessionStart,
        Endpoint::SessionHeartbeat,
        Endpoint::SessionEnd,
        Endpoint::PageViewStart,
        Endpoint::PageViewEnd,
        Endpoint::Me,
    ];

    /// Path relative to the tracker base URL.
    pub fn path(self) -> &'static str {
        match self {
            Endpoint::SessionStart => "session/start",
            Endpoint::SessionHeartbeat => "session/heartbeat",
            Endpoint::SessionEnd => "session/end",
            Endpoint::PageViewStart => "pageview/start",
            Endpoint::PageViewEnd => "pageview/end",
            Endpoint::Me => "me",
        }
    }

    pub fn method(self) -> HttpMethod {
        match self {
            Endpoint::Me => HttpMethod::Get,
            _ => HttpMethod::Post,
        }
    }

    pub fn from_path(path: &str) -> Option<Endpoint> {
        let trimmed = path.trim_matches('/');
        Endpoint::ALL.into_iter().find(|endpoint| {
            trimmed == endpoint.path() || trimmed.ends_with(&format!("/{}", endpoint.path()))
        })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// Backend-assigned identifier.
///
/// Backends hand out either integer or string ids. The original JSON shape is
/// preserved so the id is echoed back exactly as it was received.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RemoteId {
    Number(i64),
    Text(String),
}

pub type SessionId = RemoteId;
pub type PageViewId = RemoteId;

impl RemoteId {
    /// Encodes the id for a string-valued store, keeping its JSON shape.
    pub fn to_stored(&self) -> String {
        match self {
            RemoteId::Number(value) => value.to_string(),
            RemoteId::Text(value) => {
                serde_json::to_string(value).unwrap_or_else(|_| format!("\"{}\"", value))
            }
        }
    }

    /// Decodes a value written by [`RemoteId::to_stored`]. Bare strings from
    /// older writers are accepted as text ids.
    pub fn from_stored(raw: &str) -> Option<RemoteId> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        match serde_json::from_str::<RemoteId>(trimmed) {
            Ok(id) if !id.is_blank() => Some(id),
            Ok(_) => None,
            Err(_) => Some(RemoteId::Text(trimmed.to_string())),
        }
    }

    pub fn is_blank(&self) -> bool {
        match self {
            RemoteId::Number(_) => false,
            RemoteId::Text(value) => value.trim().is_empty(),
        }
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteId::Number(value) => write!(f, "{}", value),
            RemoteId::Text(value) => f.write_str(value),
        }
    }
}

impl From<&str> for RemoteId {
    fn from(value: &str) -> Self {
        RemoteId::Text(value.to_string())
    }
}

impl From<i64> for RemoteId {
    fn from(value: i64) -> Self {
        RemoteId::Number(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    NavigateAway,
    Unload,
    Logout,
}

impl EndReason {
    pub fn as_str(self) -> &'static str {
        match self {
            EndReason::NavigateAway => "navigate_away",
            EndReason::Unload => "unload",
            EndReason::Logout => "logout",
        }
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SessionStartRequest {
    pub tab_id: String,
    pub parent_path: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct SessionStartResponse {
    pub session_id: SessionId,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct HeartbeatRequest {
    pub session_id: SessionId,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SessionEndRequest {
    pub session_id: SessionId,
    pub reason: EndReason,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PageViewStartRequest {
    pub session_id: SessionId,
    pub path: String,
    pub title: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PageViewStartResponse {
    pub page_view_id: PageViewId,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PageViewEndRequest {
    pub page_view_id: PageViewId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left_at: Option<String>,
}

impl SessionStartRequest {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        require_string(&self.tab_id, "tab_id")?;
        if self.tab_id.len() > MAX_ID_BYTES {
            return Err(ErrorInfo::new(
                "invalid_tab_id",
                format!("tab_id must be {} bytes or fewer", MAX_ID_BYTES),
            ));
        }
        require_route(&self.parent_path, "parent_path")
    }
}

impl HeartbeatRequest {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        require_id(&self.session_id, "session_id")
    }
}

impl SessionEndRequest {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        require_id(&self.session_id, "session_id")
    }
}

impl PageViewStartRequest {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        require_id(&self.session_id, "session_id")?;
        require_route(&self.path, "path")?;
        if self.title.chars().count() > MAX_TITLE_CHARS {
            return Err(ErrorInfo::new(
                "invalid_title",
                format!("title must be {} characters or fewer", MAX_TITLE_CHARS),
            ));
        }
        Ok(())
    }
}

impl PageViewEndRequest {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        require_id(&self.page_view_id, "page_view_id")?;
        if let Some(left_at) = &self.left_at {
            if DateTime::parse_from_rfc3339(left_at).is_err() {
                return Err(ErrorInfo::new(
                    "invalid_timestamp",
                    "left_at must be RFC3339",
                ));
            }
        }
        Ok(())
    }
}

/// Trims a document title to the length the backend accepts.
pub fn clamp_title(title: &str) -> String {
    let trimmed = title.trim();
    if trimmed.chars().count() <= MAX_TITLE_CHARS {
        return trimmed.to_string();
    }
    trimmed.chars().take(MAX_TITLE_CHARS).collect()
}

fn require_string(value: &str, field: &str) -> Result<(), ErrorInfo> {
    if value.trim().is_empty() {
        return Err(ErrorInfo::new(
            "missing_field",
            format!("{} is required", field),
        ));
    }
    Ok(())
}

fn require_id(value: &RemoteId, field: &str) -> Result<(), ErrorInfo> {
    if value.is_blank() {
        return Err(ErrorInfo::new(
            "missing_field",
            format!("{} is required", field),
        ));
    }
    Ok(())
}

fn require_route(value: &str, field: &str) -> Result<(), ErrorInfo> {
    require_string(value, field)?;
    if !value.starts_with('/') {
        return Err(ErrorInfo::new(
            "invalid_path",
            format!("{} must start with '/'", field),
        ));
    }
    if value.len() > MAX_PATH_BYTES {
        return Err(ErrorInfo::new(
            "invalid_path",
            format!("{} must be {} bytes or fewer", field, MAX_PATH_BYTES),
        ));
    }
    Ok(())
}
