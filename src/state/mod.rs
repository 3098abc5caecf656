pub mod quiz;
pub mod session;
pub mod state_machine;

use std::sync::Arc;

use dashmap::DashMap;
use time::OffsetDateTime;
use uuid::Uuid;
use tokio::{
    sync::{Mutex, RwLock, watch},
    task::JoinHandle,
};

use crate::{
    config::AppConfig,
    dao::{
        repository::{RecordRepository, UserRepository},
        tree::TreeStore,
    },
    error::ServiceError,
    playback::PlaybackProvider,
};

use self::{quiz::QuizSession, session::Session};

pub type SharedState = Arc<AppState>;
pub type SessionRepository = RecordRepository<Session>;
pub type QuizRepository = RecordRepository<QuizSession>;

/// Handle to a background task that can be asked to stop.
pub struct TaskHandle {
    id: Uuid,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl TaskHandle {
    pub fn new(id: Uuid, stop: watch::Sender<bool>, task: JoinHandle<()>) -> Self {
        Self { id, stop, task }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Signal the task to stop at its next check point.
    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Central application state: store handle, collaborators and host-local coordination.
pub struct AppState {
    store: RwLock<Option<Arc<dyn TreeStore>>>,
    playback: Arc<dyn PlaybackProvider>,
    config: Arc<AppConfig>,
    monitors: DashMap<String, TaskHandle>,
    advance_gates: DashMap<String, Arc<Mutex<()>>>,
    degraded: watch::Sender<bool>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a store is installed.
    pub fn new(config: AppConfig, playback: Arc<dyn PlaybackProvider>) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        Arc::new(Self {
            store: RwLock::new(None),
            playback,
            config: Arc::new(config),
            monitors: DashMap::new(),
            advance_gates: DashMap::new(),
            degraded: degraded_tx,
        })
    }

    /// Obtain a handle to the current store, if one is installed.
    pub async fn store(&self) -> Option<Arc<dyn TreeStore>> {
        let guard = self.store.read().await;
        guard.as_ref().cloned()
    }

    /// Current store, or [`ServiceError::Degraded`] while none is usable.
    pub async fn require_store(&self) -> Result<Arc<dyn TreeStore>, ServiceError> {
        if self.is_degraded() {
            return Err(ServiceError::Degraded);
        }
        self.store().await.ok_or(ServiceError::Degraded)
    }

    /// Install a new store implementation and leave degraded mode.
    pub async fn install_store(&self, store: Arc<dyn TreeStore>) {
        {
            let mut guard = self.store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false);
    }

    /// Remove the current store and enter degraded mode.
    pub async fn clear_store(&self) {
        {
            let mut guard = self.store.write().await;
            guard.take();
        }
        self.update_degraded(true);
    }

    /// Current degraded flag.
    pub fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Update the degraded flag, notifying watchers only when it changes.
    pub fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                return false;
            }
            *current = value;
            true
        });
    }

    pub async fn sessions(&self) -> Result<SessionRepository, ServiceError> {
        Ok(RecordRepository::new(self.require_store().await?))
    }

    pub async fn quizzes(&self) -> Result<QuizRepository, ServiceError> {
        Ok(RecordRepository::new(self.require_store().await?))
    }

    pub async fn users(&self) -> Result<UserRepository, ServiceError> {
        Ok(UserRepository::new(self.require_store().await?))
    }

    pub fn playback(&self) -> Arc<dyn PlaybackProvider> {
        self.playback.clone()
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Gate serialising queue advances of one session within this process.
    pub fn advance_gate(&self, session_id: &str) -> Arc<Mutex<()>> {
        self.advance_gates
            .entry(session_id.to_string())
            .or_default()
            .clone()
    }

    /// Register the playback monitor of a session, stopping any previous one.
    pub fn register_monitor(&self, session_id: &str, handle: TaskHandle) {
        let id = handle.id();
        if let Some(previous) = self.monitors.insert(session_id.to_string(), handle) {
            previous.stop();
        }
        // The task may have exited before it was registered.
        self.monitors
            .remove_if(session_id, |_, handle| handle.id() == id && handle.is_finished());
    }

    /// Drop the bookkeeping of a monitor that exited on its own.
    ///
    /// A newer monitor registered for the same session is left untouched.
    pub fn forget_monitor(&self, session_id: &str, id: Uuid) {
        if self
            .monitors
            .remove_if(session_id, |_, handle| handle.id() == id)
            .is_some()
        {
            self.advance_gates.remove(session_id);
        }
    }

    /// Whether a live monitor is registered for the session.
    pub fn has_monitor(&self, session_id: &str) -> bool {
        self.monitors
            .get(session_id)
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop and forget the session's monitor and advance gate.
    pub fn release_session(&self, session_id: &str) {
        if let Some((_, handle)) = self.monitors.remove(session_id) {
            handle.stop();
        }
        self.advance_gates.remove(session_id);
    }

    #[cfg(test)]
    pub fn tracks_session(&self, session_id: &str) -> bool {
        self.monitors.contains_key(session_id) || self.advance_gates.contains_key(session_id)
    }
}

/// Current time as unix milliseconds.
pub fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}
