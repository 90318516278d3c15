//! The per-tab activity tracker.
//!
//! Hosts create one [`ActivityTracker`] at the application root, call
//! [`ActivityTracker::init`], and forward three kinds of notifications: route
//! changes, visibility changes and unload. Logout/login are explicit calls.
//!
//! ## State Machine
//!
//! ```text
//! NoSession               --enter enabled path-->   SessionOpenNoPageView    (ensure session, heartbeat)
//! SessionOpenNoPageView   --route settles-->        SessionOpenPageViewOpen  (start page view)
//! SessionOpenPageViewOpen --navigate (enabled)-->   SessionOpenPageViewOpen  (end page view, start page view)
//! SessionOpenPageViewOpen --hidden-->               SessionOpenNoPageView    (beacon end page view, stop heartbeat)
//! SessionOpenNoPageView   --visible-->              SessionOpenPageViewOpen  (heartbeat, start page view)
//! SessionOpen*            --navigate (disabled)-->  NoSession                (end page view, end session)
//! any                     --unload-->               terminal                 (beacon end page view + session)
//! any                     --logout-->               NoSession                (beacon end session, guard engaged)
//! ```
//!
//! ## Threading
//!
//! Notifications are queued to one `tracker-worker` thread, which applies them
//! in order and owns every blocking request. The public methods only enqueue,
//! so the host thread never waits on the network.
//!
//! Unload does not queue. It runs on the caller's thread: it stops the
//! heartbeat and beacons the ids the worker last published, even while a
//! transition is still in flight. The worker then drops its remaining queue and
//! beacons anything that transition opened after the fact.
//!
//! No method returns an error or panics on a failed tracking call.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use activity_tracker_protocol::{
    EndReason, PageViewEndRequest, PageViewId, SessionEndRequest, SessionId,
};
use chrono::Utc;

use crate::api::TrackerApi;
use crate::config::TrackerConfig;
use crate::delivery::Delivery;
use crate::heartbeat::HeartbeatScheduler;
use crate::pageview::{format_timestamp, PageViewTracker};
use crate::paths::{EnabledPaths, Route};
use crate::session::{EnsureOutcome, SessionManager};
use crate::store::{keys, TabScopedStore};
use crate::tab::TabIdProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    NoSession,
    SessionOpenNoPageView,
    SessionOpenPageViewOpen,
}

impl TrackerState {
    pub fn as_str(self) -> &'static str {
        match self {
            TrackerState::NoSession => "no_session",
            TrackerState::SessionOpenNoPageView => "session_open",
            TrackerState::SessionOpenPageViewOpen => "page_view_open",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Visible,
    Hidden,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Active,
    Unloaded,
    Disposed,
}

enum Command {
    Route(Route),
    Visibility(Visibility),
    Logout,
    Login,
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Route(_) => "route change",
            Command::Visibility(_) => "visibility change",
            Command::Logout => "logout",
            Command::Login => "login",
        }
    }
}

/// What the host can observe. Written by the worker after each step and by
/// unload/dispose on the caller's thread.
#[derive(Debug, Clone)]
struct Status {
    lifecycle: Lifecycle,
    session_id: Option<SessionId>,
    page_view_id: Option<PageViewId>,
    visibility: Visibility,
    logout_guard: bool,
    /// Session and page view already closed by the unload beacons.
    unload_closed: (Option<SessionId>, Option<PageViewId>),
}

struct Shared {
    api: TrackerApi,
    tab: TabIdProvider,
    store: Arc<dyn TabScopedStore>,
    heartbeat: Mutex<HeartbeatScheduler>,
    status: Mutex<Status>,
    queued: Mutex<usize>,
    idle: Condvar,
}

struct Setup {
    enabled: EnabledPaths,
    probe_identity: bool,
}

pub struct ActivityTracker {
    shared: Arc<Shared>,
    setup: Mutex<Option<Setup>>,
    commands: Mutex<Option<Sender<Command>>>,
}

impl ActivityTracker {
    pub fn new(config: &TrackerConfig, store: Arc<dyn TabScopedStore>, delivery: Delivery) -> Self {
        let shared = Shared {
            api: TrackerApi::new(delivery),
            tab: TabIdProvider::new(Arc::clone(&store)),
            store,
            heartbeat: Mutex::new(HeartbeatScheduler::new(config.heartbeat_interval())),
            status: Mutex::new(Status {
                lifecycle: Lifecycle::Created,
                session_id: None,
                page_view_id: None,
                visibility: Visibility::Visible,
                logout_guard: false,
                unload_closed: (None, None),
            }),
            queued: Mutex::new(0),
            idle: Condvar::new(),
        };
        Self {
            shared: Arc::new(shared),
            setup: Mutex::new(Some(Setup {
                enabled: EnabledPaths::new(&config.enabled_path_prefixes),
                probe_identity: config.probe_identity,
            })),
            commands: Mutex::new(None),
        }
    }

    /// Restores persisted identifiers and starts the worker. Only the first
    /// call has an effect.
    pub fn init(&self) {
        let Some(setup) = lock(&self.setup).take() else {
            tracing::debug!("Activity tracker already initialized");
            return;
        };
        let sessions = SessionManager::restore(Arc::clone(&self.shared.store));
        let logout_guard = self.shared.store.get(keys::SESSION_KILLED).is_some();

        let worker = Worker {
            enabled: setup.enabled,
            probe_identity: setup.probe_identity,
            shared: Arc::clone(&self.shared),
            sessions,
            page_views: PageViewTracker::new(),
            visibility: Visibility::Visible,
            route: None,
        };
        let restored = worker.sessions.session_id().cloned();

        let (tx, rx) = mpsc::channel();
        let spawned = thread::Builder::new()
            .name("tracker-worker".to_string())
            .spawn(move || worker.run(rx));
        if let Err(err) = spawned {
            tracing::warn!(error = %err, "Failed to spawn tracker worker");
            self.shared.status().lifecycle = Lifecycle::Disposed;
            return;
        }

        let mut commands = lock(&self.commands);
        {
            let mut status = self.shared.status();
            if status.lifecycle != Lifecycle::Created {
                return;
            }
            status.lifecycle = Lifecycle::Active;
            status.session_id = restored.clone();
            status.logout_guard = logout_guard;
        }
        *commands = Some(tx);
        tracing::info!(
            tab_id = self.shared.tab.tab_id(),
            restored_session = ?restored.map(|id| id.to_string()),
            logout_guard,
            "Activity tracker initialized"
        );
    }

    /// Stops the heartbeat and ignores every later notification. Sends nothing;
    /// queued notifications are dropped.
    pub fn dispose(&self) {
        {
            let mut status = self.shared.status();
            if matches!(status.lifecycle, Lifecycle::Unloaded | Lifecycle::Disposed) {
                return;
            }
            status.lifecycle = Lifecycle::Disposed;
        }
        self.shared.heartbeat().stop();
        lock(&self.commands).take();
        tracing::debug!("Activity tracker disposed");
    }

    pub fn on_route_change(&self, route: Route) {
        self.submit(Command::Route(route));
    }

    pub fn on_visibility_change(&self, visibility: Visibility) {
        self.submit(Command::Visibility(visibility));
    }

    /// Page teardown: everything goes out as beacons and the tracker stops.
    ///
    /// Never waits for the worker. The ids are the latest the worker
    /// published; the persisted session id is kept for a reload.
    pub fn on_unload(&self) {
        let (session_id, page_view_id) = {
            let mut status = self.shared.status();
            if status.lifecycle != Lifecycle::Active {
                tracing::debug!(event = "unload", lifecycle = ?status.lifecycle, "Ignoring tracker notification");
                return;
            }
            status.lifecycle = Lifecycle::Unloaded;
            let session_id = status.session_id.take();
            let page_view_id = status.page_view_id.take();
            status.unload_closed = (session_id.clone(), page_view_id.clone());
            (session_id, page_view_id)
        };
        self.shared.heartbeat().stop();
        lock(&self.commands).take();

        let api = &self.shared.api;
        if let Some(page_view_id) = page_view_id {
            api.end_page_view_beacon(&PageViewEndRequest {
                page_view_id,
                left_at: Some(format_timestamp(Utc::now())),
            });
        }
        if let Some(session_id) = session_id {
            api.end_session_beacon(&SessionEndRequest {
                session_id: session_id.clone(),
                reason: EndReason::Unload,
            });
            tracing::info!(session_id = %session_id, reason = %EndReason::Unload, "Tracking session ended");
        }
        tracing::debug!("Activity tracker unloaded");
    }

    /// Ends the session for an explicit logout and blocks session creation
    /// until [`ActivityTracker::on_login`] or a navigation outside the
    /// tracked areas.
    pub fn logout(&self) {
        self.submit(Command::Logout);
    }

    /// Releases the logout guard. Tracking resumes with the next navigation.
    pub fn on_login(&self) {
        self.submit(Command::Login);
    }

    /// Blocks until every queued notification has been applied, or until
    /// `timeout` passes. Returns whether the queue drained.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut queued = lock(&self.shared.queued);
        while *queued > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            queued = self
                .shared
                .idle
                .wait_timeout(queued, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }

    /// Waits for queued notifications, then gives beacons the rest of
    /// `timeout` to leave the process.
    pub fn flush_beacons(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let settled = self.wait_idle(timeout);
        let drained = self
            .shared
            .api
            .delivery()
            .beacon
            .drain(deadline.saturating_duration_since(Instant::now()));
        settled && drained
    }

    pub fn state(&self) -> TrackerState {
        let status = self.shared.status();
        match (&status.session_id, &status.page_view_id) {
            (None, _) => TrackerState::NoSession,
            (Some(_), None) => TrackerState::SessionOpenNoPageView,
            (Some(_), Some(_)) => TrackerState::SessionOpenPageViewOpen,
        }
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.shared.status().session_id.clone()
    }

    pub fn page_view_id(&self) -> Option<PageViewId> {
        self.shared.status().page_view_id.clone()
    }

    pub fn tab_id(&self) -> String {
        self.shared.tab.tab_id().to_string()
    }

    pub fn heartbeat_active(&self) -> bool {
        self.shared.heartbeat().is_running()
    }

    pub fn visibility(&self) -> Visibility {
        self.shared.status().visibility
    }

    pub fn logout_guard_engaged(&self) -> bool {
        self.shared.status().logout_guard
    }

    fn submit(&self, command: Command) {
        let commands = lock(&self.commands);
        match commands.as_ref() {
            Some(tx) if self.shared.lifecycle() == Lifecycle::Active => {
                self.shared.enqueued();
                if tx.send(command).is_err() {
                    self.shared.completed();
                }
            }
            _ => tracing::debug!(
                event = command.name(),
                lifecycle = ?self.shared.lifecycle(),
                "Ignoring tracker notification"
            ),
        }
    }
}

impl Drop for ActivityTracker {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn status(&self) -> MutexGuard<'_, Status> {
        lock(&self.status)
    }

    fn heartbeat(&self) -> MutexGuard<'_, HeartbeatScheduler> {
        lock(&self.heartbeat)
    }

    fn lifecycle(&self) -> Lifecycle {
        self.status().lifecycle
    }

    fn logout_guard(&self) -> bool {
        self.status().logout_guard
    }

    fn enqueued(&self) {
        *lock(&self.queued) += 1;
    }

    fn completed(&self) {
        let mut queued = lock(&self.queued);
        *queued = queued.saturating_sub(1);
        if *queued == 0 {
            self.idle.notify_all();
        }
    }

    /// (Re)starts the ticker for `session_id` unless the tracker has stopped.
    ///
    /// The lifecycle is checked under the heartbeat lock, so a ticker can never
    /// outlive an unload or dispose that raced with it.
    fn start_heartbeat(&self, session_id: &SessionId, restart: bool) {
        let mut heartbeat = self.heartbeat();
        if self.lifecycle() != Lifecycle::Active {
            return;
        }
        if restart || heartbeat.session_id() != Some(session_id) {
            heartbeat.start(&self.api, session_id);
        }
    }

    fn set_logout_guard(&self, engaged: bool) {
        {
            let mut status = self.status();
            if status.logout_guard == engaged {
                return;
            }
            status.logout_guard = engaged;
        }
        let persisted = if engaged {
            self.store.set(keys::SESSION_KILLED, "1")
        } else {
            self.store.remove(keys::SESSION_KILLED)
        };
        if let Err(err) = persisted {
            tracing::warn!(error = %err, engaged, "Failed to persist logout guard");
        }
        if engaged {
            tracing::info!("Logout guard engaged");
        } else {
            tracing::info!("Logout guard released");
        }
    }
}

/// Transition state, owned by the worker thread.
struct Worker {
    enabled: EnabledPaths,
    probe_identity: bool,
    shared: Arc<Shared>,
    sessions: SessionManager,
    page_views: PageViewTracker,
    visibility: Visibility,
    route: Option<Route>,
}

impl Worker {
    fn run(mut self, commands: Receiver<Command>) {
        while let Ok(command) = commands.recv() {
            match self.shared.lifecycle() {
                Lifecycle::Active => {
                    self.apply(command);
                    self.publish();
                }
                lifecycle => self.skip(command, lifecycle),
            }
            if self.shared.lifecycle() == Lifecycle::Unloaded {
                self.close_after_unload();
            }
            self.shared.completed();
        }
        tracing::debug!("Tracker worker stopped");
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::Route(route) => self.handle_route(route),
            Command::Visibility(visibility) => self.handle_visibility(visibility),
            Command::Logout => self.handle_logout(),
            Command::Login => self.shared.set_logout_guard(false),
        }
    }

    /// After unload or dispose only the local effects of logout/login apply.
    fn skip(&mut self, command: Command, lifecycle: Lifecycle) {
        match command {
            Command::Logout => {
                self.sessions.forget();
                self.shared.set_logout_guard(true);
            }
            Command::Login => self.shared.set_logout_guard(false),
            other => {
                tracing::debug!(event = other.name(), lifecycle = ?lifecycle, "Dropping queued notification");
            }
        }
    }

    fn publish(&self) {
        let mut status = self.shared.status();
        if status.lifecycle != Lifecycle::Active {
            return;
        }
        status.session_id = self.sessions.session_id().cloned();
        status.page_view_id = self.page_views.current().map(|open| open.id.clone());
        status.visibility = self.visibility;
    }

    fn halted(&self) -> bool {
        self.shared.lifecycle() != Lifecycle::Active
    }

    fn handle_route(&mut self, route: Route) {
        let matched = self
            .enabled
            .matched_prefix(route.pathname())
            .map(str::to_string);
        self.route = Some(route.clone());

        if self.shared.logout_guard() {
            match matched {
                Some(_) => {
                    tracing::debug!(path = route.path(), "Skipping tracking after logout");
                }
                None => self.shared.set_logout_guard(false),
            }
            return;
        }

        match matched {
            Some(parent_path) => self.track_route(&route, &parent_path),
            None => self.leave_tracked_area(),
        }
    }

    fn handle_visibility(&mut self, visibility: Visibility) {
        if self.visibility == visibility {
            return;
        }
        self.visibility = visibility;

        match visibility {
            Visibility::Hidden => {
                self.shared.heartbeat().stop();
                let api = self.shared.api.clone();
                self.page_views.end_page_view(&api, Some(Utc::now()));
            }
            Visibility::Visible => {
                if self.shared.logout_guard() {
                    return;
                }
                let Some(route) = self.route.clone() else {
                    return;
                };
                if let Some(parent_path) = self
                    .enabled
                    .matched_prefix(route.pathname())
                    .map(str::to_string)
                {
                    self.track_route(&route, &parent_path);
                }
            }
        }
    }

    fn handle_logout(&mut self) {
        self.shared.heartbeat().stop();
        self.page_views.discard();
        let api = self.shared.api.clone();
        self.sessions.end_session(&api, EndReason::Logout);
        self.shared.set_logout_guard(true);
    }

    /// Route within an enabled area: make sure a session exists, then keep the
    /// heartbeat and page view in line with visibility.
    fn track_route(&mut self, route: &Route, parent_path: &str) {
        let api = self.shared.api.clone();
        let outcome = self.sessions.ensure_session(
            &api,
            self.shared.tab.tab_id(),
            parent_path,
            self.probe_identity,
        );
        self.publish();
        let Some(session_id) = outcome.session_id().cloned() else {
            return;
        };

        if self.visibility == Visibility::Hidden {
            return;
        }

        self.shared
            .start_heartbeat(&session_id, matches!(outcome, EnsureOutcome::Created(_)));

        if self.page_views.is_open_for(route.path()) {
            return;
        }
        self.page_views.end_page_view(&api, None);
        self.publish();
        if self.halted() {
            return;
        }
        self.page_views.start_page_view(&api, &session_id, route);
    }

    fn leave_tracked_area(&mut self) {
        self.shared.heartbeat().stop();
        if self.sessions.session_id().is_none() {
            return;
        }
        let api = self.shared.api.clone();
        self.page_views.end_page_view(&api, None);
        self.publish();
        if self.halted() {
            return;
        }
        self.sessions.end_session(&api, EndReason::NavigateAway);
    }

    /// Beacons whatever an in-flight transition opened after the unload
    /// beacons went out.
    fn close_after_unload(&mut self) {
        let (closed_session, closed_page_view) = self.shared.status().unload_closed.clone();
        let api = self.shared.api.clone();

        let open_page_view = self.page_views.current().map(|open| open.id.clone());
        match open_page_view {
            Some(id) if Some(&id) == closed_page_view.as_ref() => self.page_views.discard(),
            Some(_) => self.page_views.end_page_view(&api, Some(Utc::now())),
            None => {}
        }

        let session = self.sessions.session_id().cloned();
        if session.is_some() && session != closed_session {
            self.sessions.end_session(&api, EndReason::Unload);
        }
    }
}
