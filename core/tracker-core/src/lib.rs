//! # tracker-core
//!
//! Client-side activity tracking for a multi-area web application: one
//! tracking session per tab while the user is inside an enabled area, page
//! views for each route within it, and a periodic heartbeat while visible.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime dependency. Heartbeats and beacons run
//!   on plain background threads.
//! - **Never disrupts the host**: Every tracking failure is logged and
//!   swallowed. No public tracker method returns an error.
//! - **Tab-scoped state**: Tab id, session id and the logout guard live in a
//!   [`TabScopedStore`] so a reload in the same tab picks them up again.
//! - **Never blocks the caller**: Notifications are queued to one worker thread
//!   that applies them in order. Unload beacons straight from the caller's
//!   thread.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tracker_core::{ActivityTracker, Delivery, MemoryStore, Route, TrackerConfig};
//!
//! let config = TrackerConfig::load()?;
//! let tracker = ActivityTracker::new(
//!     &config,
//!     Arc::new(MemoryStore::new()),
//!     Delivery::over_http(&config)?,
//! );
//! tracker.init();
//! tracker.on_route_change(Route::new("/business_dashboard/menu", "Menu"));
//! ```

pub mod api;
pub mod config;
pub mod delivery;
pub mod error;
pub mod heartbeat;
pub mod pageview;
pub mod paths;
pub mod session;
pub mod store;
pub mod tab;
pub mod tracker;

#[cfg(test)]
mod testing;

pub use api::TrackerApi;
pub use config::*;
pub use delivery::{BeaconChannel, Delivery, HttpChannel, RequestChannel, ThreadBeacon};
pub use error::{DeliveryError, Result, TrackerError};
pub use heartbeat::HeartbeatScheduler;
pub use pageview::{format_timestamp, OpenPageView, PageViewTracker};
pub use paths::{EnabledPaths, Route};
pub use session::{EnsureOutcome, SessionManager};
pub use store::{keys, FileStore, MemoryStore, TabScopedStore};
pub use tab::TabIdProvider;
pub use tracker::{ActivityTracker, TrackerState, Visibility};
