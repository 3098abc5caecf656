//! Shared key-value tree every participant reads and writes.

#[cfg(feature = "couch-store")]
pub mod couchdb;
pub mod memory;
pub mod path;
pub mod value;

use futures::{future::BoxFuture, stream::BoxStream};
use serde_json::Value;

use crate::dao::storage::StorageResult;

pub use self::path::TreePath;

/// Decision returned by a transaction function for the value it was shown.
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionStep {
    /// Replace the node with this value (`null` removes it).
    Set(Value),
    /// Remove the node.
    Remove,
    /// Leave the node untouched and stop retrying.
    Abort,
}

/// Result of a single-path atomic update.
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionOutcome {
    /// The step was written; carries the node's new value.
    Committed(Option<Value>),
    /// The function aborted; carries the value it last saw.
    Aborted(Option<Value>),
    /// Concurrent writers kept changing the node until the retry limit ran out.
    Conflicted,
}

impl TransactionOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, TransactionOutcome::Committed(_))
    }
}

/// Pure function run (possibly several times) against the current value of a node.
pub type TransactionFn = Box<dyn FnMut(Option<&Value>) -> TransactionStep + Send>;

/// Stream of snapshots of a node; `None` means the node is absent.
pub type SnapshotStream = BoxStream<'static, StorageResult<Option<Value>>>;

/// Abstraction over the shared tree store.
///
/// Every write is last-writer-wins on its path. The only atomic primitive is
/// [`TreeStore::transaction`], which touches exactly one path.
pub trait TreeStore: Send + Sync {
    fn get(&self, path: TreePath) -> BoxFuture<'static, StorageResult<Option<Value>>>;
    fn set(&self, path: TreePath, value: Value) -> BoxFuture<'static, StorageResult<()>>;
    /// Write several descendants of `path` in one call. Each entry is relative to `path`.
    fn update(
        &self,
        path: TreePath,
        changes: Vec<(TreePath, Value)>,
    ) -> BoxFuture<'static, StorageResult<()>>;
    fn remove(&self, path: TreePath) -> BoxFuture<'static, StorageResult<()>>;
    fn transaction(
        &self,
        path: TreePath,
        step: TransactionFn,
    ) -> BoxFuture<'static, StorageResult<TransactionOutcome>>;
    /// Emit the current value, then every change observed at or below `path`.
    fn subscribe(&self, path: TreePath) -> SnapshotStream;
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
