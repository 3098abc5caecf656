//! Fixtures shared by the service tests.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use futures::future::BoxFuture;
use serde_json::{Value, json};

use crate::{
    config::AppConfig,
    dao::{
        storage::{StorageError, StorageResult},
        tree::{
            SnapshotStream, TransactionFn, TransactionOutcome, TreePath, TreeStore,
            memory::InMemoryTreeStore,
        },
    },
    dto::user::Caller,
    playback::simulated::SimulatedPlaybackProvider,
    state::{AppState, SharedState},
};

pub const DEVICE: &str = "speaker";

pub struct TestContext {
    pub state: SharedState,
    pub playback: SimulatedPlaybackProvider,
    pub host: Caller,
    pub guest: Caller,
}

pub fn test_config() -> AppConfig {
    AppConfig {
        removal_delay: Duration::from_secs(2),
        ending_buffer: Duration::from_secs(10),
        ..AppConfig::default()
    }
}

/// State over a fresh in-memory store with a linked host.
pub async fn context() -> TestContext {
    context_with_store(Arc::new(InMemoryTreeStore::default())).await
}

pub async fn context_with_store(store: Arc<dyn TreeStore>) -> TestContext {
    let playback = SimulatedPlaybackProvider::new(
        vec![(DEVICE.into(), "Speaker".into())],
        Duration::from_secs(30),
    );
    let state = AppState::new(test_config(), Arc::new(playback.clone()));
    state.install_store(store).await;

    state
        .users()
        .await
        .unwrap()
        .set_provider_link("host", json!({"accessToken": "token", "expiresAt": i64::MAX}))
        .await
        .unwrap();

    TestContext {
        state,
        playback,
        host: Caller::new("host").with_display_name("Host"),
        guest: Caller::new("guest").with_display_name("Guest"),
    }
}

/// Point the session at [`DEVICE`] without starting a playback monitor.
pub async fn set_device(ctx: &TestContext, session_id: &str) {
    ctx.state
        .sessions()
        .await
        .unwrap()
        .update_fields(
            session_id,
            vec![
                (TreePath::parse("deviceId").unwrap(), Value::from(DEVICE)),
                (TreePath::parse("deviceName").unwrap(), Value::from("Speaker")),
            ],
        )
        .await
        .unwrap();
}

/// In-memory store whose atomic updates never manage to commit.
///
/// With [`ContendedStore::on_key`], only the first `times` transactions on paths containing
/// that key conflict. [`ContendedStore::with_failing_removals`] makes removals under a top-level
/// key fail.
#[derive(Clone, Default)]
pub struct ContendedStore {
    inner: InMemoryTreeStore,
    contention: Contention,
    failing_removals: Option<&'static str>,
}

#[derive(Clone, Default)]
enum Contention {
    #[default]
    Always,
    OnKey {
        key: &'static str,
        remaining: Arc<AtomicUsize>,
    },
    Never,
}

impl ContendedStore {
    pub fn on_key(key: &'static str, times: usize) -> Self {
        Self {
            contention: Contention::OnKey {
                key,
                remaining: Arc::new(AtomicUsize::new(times)),
            },
            ..Self::default()
        }
    }

    /// Store that commits every transaction.
    pub fn uncontended() -> Self {
        Self {
            contention: Contention::Never,
            ..Self::default()
        }
    }

    pub fn with_failing_removals(mut self, root: &'static str) -> Self {
        self.failing_removals = Some(root);
        self
    }
}

impl TreeStore for ContendedStore {
    fn get(&self, path: TreePath) -> BoxFuture<'static, StorageResult<Option<Value>>> {
        self.inner.get(path)
    }

    fn set(&self, path: TreePath, value: Value) -> BoxFuture<'static, StorageResult<()>> {
        self.inner.set(path, value)
    }

    fn update(
        &self,
        path: TreePath,
        changes: Vec<(TreePath, Value)>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        self.inner.update(path, changes)
    }

    fn remove(&self, path: TreePath) -> BoxFuture<'static, StorageResult<()>> {
        if let Some(root) = self.failing_removals
            && path.segments().first().is_some_and(|segment| segment == root)
        {
            let path = path.to_string();
            return Box::pin(async move {
                Err(StorageError::InvalidValue {
                    path,
                    reason: "removal rejected".into(),
                })
            });
        }
        self.inner.remove(path)
    }

    fn transaction(
        &self,
        path: TreePath,
        step: TransactionFn,
    ) -> BoxFuture<'static, StorageResult<TransactionOutcome>> {
        let contended = match &self.contention {
            Contention::Always => true,
            Contention::OnKey { key, remaining } => {
                path.segments().iter().any(|segment| segment == key)
                    && remaining
                        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                        .is_ok()
            }
            Contention::Never => false,
        };
        if contended {
            Box::pin(async { Ok(TransactionOutcome::Conflicted) })
        } else {
            self.inner.transaction(path, step)
        }
    }

    fn subscribe(&self, path: TreePath) -> SnapshotStream {
        self.inner.subscribe(path)
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        self.inner.health_check()
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        self.inner.try_reconnect()
    }
}
