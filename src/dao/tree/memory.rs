//! Process-local tree store used for development, tests and single-node deployments.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::{RwLock, broadcast, broadcast::error::RecvError};
use tracing::debug;

use crate::dao::storage::StorageResult;

use super::{
    SnapshotStream, TransactionFn, TransactionOutcome, TransactionStep, TreePath, TreeStore,
    value::{normalize, value_at, write_at},
};

/// Default number of attempts a transaction gets before reporting a conflict.
pub const DEFAULT_MAX_RETRIES: usize = 25;

const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// JSON tree held in memory behind an async lock.
#[derive(Clone)]
pub struct InMemoryTreeStore {
    inner: Arc<Inner>,
}

struct Inner {
    root: RwLock<Value>,
    changes: broadcast::Sender<TreePath>,
    max_retries: usize,
}

impl Default for InMemoryTreeStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}

impl InMemoryTreeStore {
    /// Create an empty store whose transactions retry at most `max_retries` times.
    pub fn new(max_retries: usize) -> Self {
        let (changes, _rx) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                root: RwLock::new(Value::Null),
                changes,
                max_retries: max_retries.max(1),
            }),
        }
    }

    async fn read(&self, path: &TreePath) -> Option<Value> {
        let root = self.inner.root.read().await;
        value_at(&root, path.segments()).cloned()
    }

    async fn write(&self, path: &TreePath, value: Option<Value>) -> StorageResult<()> {
        {
            let mut root = self.inner.root.write().await;
            write_at(&mut root, path.segments(), value)?;
        }
        self.notify(path.clone());
        Ok(())
    }

    fn notify(&self, path: TreePath) {
        let _ = self.inner.changes.send(path);
    }
}

impl TreeStore for InMemoryTreeStore {
    fn get(&self, path: TreePath) -> BoxFuture<'static, StorageResult<Option<Value>>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.read(&path).await) })
    }

    fn set(&self, path: TreePath, value: Value) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.write(&path, Some(value)).await })
    }

    fn update(
        &self,
        path: TreePath,
        changes: Vec<(TreePath, Value)>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            {
                let mut root = store.inner.root.write().await;
                // Apply on a scratch copy so a rejected entry leaves the tree untouched.
                let mut scratch = root.clone();
                for (relative, value) in changes {
                    write_at(&mut scratch, path.join(&relative).segments(), Some(value))?;
                }
                *root = scratch;
            }
            store.notify(path);
            Ok(())
        })
    }

    fn remove(&self, path: TreePath) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.write(&path, None).await })
    }

    fn transaction(
        &self,
        path: TreePath,
        mut step: TransactionFn,
    ) -> BoxFuture<'static, StorageResult<TransactionOutcome>> {
        let store = self.clone();
        Box::pin(async move {
            for attempt in 0..store.inner.max_retries {
                let seen = store.read(&path).await;
                let decision = step(seen.as_ref());

                let next = match decision {
                    TransactionStep::Abort => return Ok(TransactionOutcome::Aborted(seen)),
                    TransactionStep::Set(value) => normalize(value),
                    TransactionStep::Remove => None,
                };

                let mut root = store.inner.root.write().await;
                if value_at(&root, path.segments()) != seen.as_ref() {
                    debug!(path = %path, attempt, "transaction lost a race; retrying");
                    continue;
                }
                write_at(&mut root, path.segments(), next.clone())?;
                drop(root);

                store.notify(path);
                return Ok(TransactionOutcome::Committed(next));
            }

            Ok(TransactionOutcome::Conflicted)
        })
    }

    fn subscribe(&self, path: TreePath) -> SnapshotStream {
        let store = self.clone();
        Box::pin(async_stream::stream! {
            let mut changes = store.inner.changes.subscribe();
            let mut last = store.read(&path).await;
            yield Ok(last.clone());

            loop {
                match changes.recv().await {
                    Ok(changed) if !changed.overlaps(&path) => continue,
                    Ok(_) | Err(RecvError::Lagged(_)) => {
                        let current = store.read(&path).await;
                        if current != last {
                            last = current.clone();
                            yield Ok(current);
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use serde_json::json;

    use super::*;

    fn path(raw: &str) -> TreePath {
        TreePath::parse(raw).unwrap()
    }

    fn increment() -> TransactionFn {
        Box::new(|current| {
            let count = current.and_then(Value::as_i64).unwrap_or(0);
            TransactionStep::Set(json!(count + 1))
        })
    }

    #[tokio::test]
    async fn set_get_and_remove() {
        let store = InMemoryTreeStore::default();
        store
            .set(path("sessions/s1"), json!({"hostUserId": "h", "queue": {}}))
            .await
            .unwrap();

        assert_eq!(
            store.get(path("sessions/s1")).await.unwrap(),
            Some(json!({"hostUserId": "h"}))
        );

        store.remove(path("sessions/s1")).await.unwrap();
        assert_eq!(store.get(path("sessions")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn update_writes_every_entry() {
        let store = InMemoryTreeStore::default();
        store
            .update(
                path("sessions/s1"),
                vec![
                    (path("deviceId"), json!("d1")),
                    (path("deviceName"), json!("Kitchen")),
                    (path("participants/u1"), json!(true)),
                ],
            )
            .await
            .unwrap();

        assert_eq!(
            store.get(path("sessions/s1")).await.unwrap(),
            Some(json!({"deviceId": "d1", "deviceName": "Kitchen", "participants": {"u1": true}}))
        );
    }

    #[tokio::test]
    async fn transaction_abort_leaves_value() {
        let store = InMemoryTreeStore::default();
        store.set(path("flag"), json!(true)).await.unwrap();

        let outcome = store
            .transaction(
                path("flag"),
                Box::new(|current| match current {
                    Some(Value::Bool(true)) => TransactionStep::Abort,
                    _ => TransactionStep::Set(json!(true)),
                }),
            )
            .await
            .unwrap();

        assert_eq!(outcome, TransactionOutcome::Aborted(Some(json!(true))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_increments_are_not_lost() {
        let store = InMemoryTreeStore::new(1_000);
        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.transaction(path("counter"), increment()).await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().unwrap().is_committed());
        }

        assert_eq!(store.get(path("counter")).await.unwrap(), Some(json!(50)));
    }

    #[tokio::test]
    async fn subscribe_emits_initial_and_overlapping_changes() {
        let store = InMemoryTreeStore::default();
        store.set(path("sessions/s1/hostUserId"), json!("h")).await.unwrap();

        let mut stream = store.subscribe(path("sessions/s1"));
        assert_eq!(
            stream.next().await.unwrap().unwrap(),
            Some(json!({"hostUserId": "h"}))
        );

        store.set(path("sessions/s2/hostUserId"), json!("x")).await.unwrap();
        store.set(path("sessions/s1/isEnded"), json!(true)).await.unwrap();
        assert_eq!(
            stream.next().await.unwrap().unwrap(),
            Some(json!({"hostUserId": "h", "isEnded": true}))
        );

        store.remove(path("sessions")).await.unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap(), None);
    }
}
