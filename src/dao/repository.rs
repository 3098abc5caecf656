//! Typed access to the records kept in the tree (`sessions/{id}`, `quizzes/{id}`, `users/{id}`).
//!
//! Every operation on a record that no longer exists fails with [`RepositoryError::NotFound`];
//! callers interpret that as "the session has ended".

use std::{marker::PhantomData, sync::Arc};

use futures::{StreamExt, stream::BoxStream};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use thiserror::Error;

use crate::dao::{
    storage::StorageError,
    tree::{
        TransactionFn, TransactionOutcome, TreePath, TreeStore,
        path::push_id,
        value::value_at,
    },
};

/// Failures surfaced by the repositories.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("{collection} `{id}` not found")]
    NotFound {
        collection: &'static str,
        id: String,
    },
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("failed to decode {collection} `{id}`")]
    Decode {
        collection: &'static str,
        id: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Result alias for repository calls.
pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// A top-level record type stored under `{COLLECTION}/{id}`.
pub trait Record: Serialize + DeserializeOwned + Send + Sync + 'static {
    const COLLECTION: &'static str;
    /// Field every complete record carries. A node missing it is a fragment left behind by a
    /// write racing the record's removal and is treated as absent.
    const REQUIRED_FIELD: &'static str = "hostUserId";
}

/// Repository over one record collection.
pub struct RecordRepository<T> {
    store: Arc<dyn TreeStore>,
    _record: PhantomData<fn() -> T>,
}

impl<T> Clone for RecordRepository<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            _record: PhantomData,
        }
    }
}

impl<T: Record> RecordRepository<T> {
    pub fn new(store: Arc<dyn TreeStore>) -> Self {
        Self {
            store,
            _record: PhantomData,
        }
    }

    fn not_found(id: &str) -> RepositoryError {
        RepositoryError::NotFound {
            collection: T::COLLECTION,
            id: id.to_string(),
        }
    }

    fn record_path(id: &str) -> RepositoryResult<TreePath> {
        // An id that cannot be a key cannot name a stored record either.
        TreePath::from_keys(&[T::COLLECTION, id]).map_err(|_| Self::not_found(id))
    }

    fn decode(id: &str, value: Option<Value>) -> RepositoryResult<Option<T>> {
        let Some(value) = value else {
            return Ok(None);
        };
        if value.get(T::REQUIRED_FIELD).is_none() {
            return Ok(None);
        }
        serde_json::from_value(value)
            .map(Some)
            .map_err(|source| RepositoryError::Decode {
                collection: T::COLLECTION,
                id: id.to_string(),
                source,
            })
    }

    /// Store a new record under a fresh time-ordered id and return the id.
    pub async fn create(&self, record: &T) -> RepositoryResult<String> {
        let id = push_id();
        let value = serde_json::to_value(record).map_err(|source| RepositoryError::Decode {
            collection: T::COLLECTION,
            id: id.clone(),
            source,
        })?;
        self.store.set(Self::record_path(&id)?, value).await?;
        Ok(id)
    }

    pub async fn get(&self, id: &str) -> RepositoryResult<T> {
        let value = self.store.get(Self::record_path(id)?).await?;
        Self::decode(id, value)?.ok_or_else(|| Self::not_found(id))
    }

    /// Like [`RecordRepository::get`], mapping a missing record to `None`.
    pub async fn find(&self, id: &str) -> RepositoryResult<Option<T>> {
        match self.get(id).await {
            Ok(record) => Ok(Some(record)),
            Err(RepositoryError::NotFound { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn ensure_exists(&self, id: &str, path: &TreePath) -> RepositoryResult<()> {
        let required = path.child(T::REQUIRED_FIELD)?;
        match self.store.get(required).await? {
            Some(_) => Ok(()),
            None => Err(Self::not_found(id)),
        }
    }

    /// Merge several fields into an existing record in one write.
    ///
    /// The existence check and the write are separate calls: a removal landing between them
    /// can leave a fragment behind, which readers then treat as absent.
    pub async fn update_fields(
        &self,
        id: &str,
        fields: Vec<(TreePath, Value)>,
    ) -> RepositoryResult<()> {
        let path = Self::record_path(id)?;
        self.ensure_exists(id, &path).await?;
        self.store.update(path, fields).await?;
        Ok(())
    }

    pub async fn read_field(&self, id: &str, field: &TreePath) -> RepositoryResult<Option<Value>> {
        let path = Self::record_path(id)?;
        let value = self.store.get(path.clone()).await?;
        match value {
            Some(record) if record.get(T::REQUIRED_FIELD).is_some() => {
                Ok(value_at(&record, field.segments()).cloned())
            }
            _ => Err(Self::not_found(id)),
        }
    }

    /// Remove a field of an existing record without an existence check.
    pub async fn remove_field(&self, id: &str, field: &TreePath) -> RepositoryResult<()> {
        let path = Self::record_path(id)?.join(field);
        self.store.remove(path).await?;
        Ok(())
    }

    /// Single-path atomic update on `field` of an existing record.
    pub async fn atomic_update(
        &self,
        id: &str,
        field: &TreePath,
        step: TransactionFn,
    ) -> RepositoryResult<TransactionOutcome> {
        let path = Self::record_path(id)?;
        self.ensure_exists(id, &path).await?;
        Ok(self.store.transaction(path.join(field), step).await?)
    }

    pub async fn remove(&self, id: &str) -> RepositoryResult<()> {
        let path = Self::record_path(id)?;
        self.store.remove(path).await?;
        Ok(())
    }

    /// Stream decoded snapshots of a record; `None` once it is removed.
    pub fn subscribe(&self, id: &str) -> RepositoryResult<BoxStream<'static, RepositoryResult<Option<T>>>> {
        let path = Self::record_path(id)?;
        let id = id.to_string();
        let stream = self.store.subscribe(path).map(move |snapshot| {
            let value = snapshot?;
            Self::decode(&id, value)
        });
        Ok(stream.boxed())
    }
}

/// Back-references a user keeps to the record they currently host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostingSlot {
    Session,
    Quiz,
}

impl HostingSlot {
    fn key(self) -> &'static str {
        match self {
            HostingSlot::Session => "hostingSessionId",
            HostingSlot::Quiz => "hostingQuizId",
        }
    }
}

const USERS: &str = "users";
const PROVIDER_LINK: &str = "spotify";
const USERNAME: &str = "username";

/// Access to the per-user subtree `users/{id}`.
#[derive(Clone)]
pub struct UserRepository {
    store: Arc<dyn TreeStore>,
}

impl UserRepository {
    pub fn new(store: Arc<dyn TreeStore>) -> Self {
        Self { store }
    }

    fn user_field(user_id: &str, field: &str) -> RepositoryResult<TreePath> {
        Ok(TreePath::from_keys(&[USERS, user_id, field])?)
    }

    /// Raw provider link marker of a user, if linked.
    pub async fn provider_link(&self, user_id: &str) -> RepositoryResult<Option<Value>> {
        Ok(self
            .store
            .get(Self::user_field(user_id, PROVIDER_LINK)?)
            .await?)
    }

    pub async fn has_provider_link(&self, user_id: &str) -> RepositoryResult<bool> {
        Ok(self.provider_link(user_id).await?.is_some())
    }

    pub async fn set_provider_link(&self, user_id: &str, link: Value) -> RepositoryResult<()> {
        self.store
            .set(Self::user_field(user_id, PROVIDER_LINK)?, link)
            .await?;
        Ok(())
    }

    pub async fn username(&self, user_id: &str) -> RepositoryResult<Option<String>> {
        let value = self.store.get(Self::user_field(user_id, USERNAME)?).await?;
        Ok(value.and_then(|value| value.as_str().map(str::to_string)))
    }

    pub async fn set_username(&self, user_id: &str, username: &str) -> RepositoryResult<()> {
        self.store
            .set(Self::user_field(user_id, USERNAME)?, Value::from(username))
            .await?;
        Ok(())
    }

    /// Id of the record the user is hosting in `slot`, if any.
    pub async fn hosting(&self, user_id: &str, slot: HostingSlot) -> RepositoryResult<Option<String>> {
        let value = self.store.get(Self::user_field(user_id, slot.key())?).await?;
        Ok(value.and_then(|value| value.as_str().map(str::to_string)))
    }

    /// Point the back-reference at `id`, or clear it with `None`.
    pub async fn set_hosting(
        &self,
        user_id: &str,
        slot: HostingSlot,
        id: Option<&str>,
    ) -> RepositoryResult<()> {
        let path = Self::user_field(user_id, slot.key())?;
        match id {
            Some(id) => self.store.set(path, Value::from(id)).await?,
            None => self.store.remove(path).await?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use crate::dao::tree::{TransactionStep, memory::InMemoryTreeStore};

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Note {
        host_user_id: String,
        #[serde(default)]
        counter: u32,
    }

    impl Record for Note {
        const COLLECTION: &'static str = "notes";
    }

    fn repository() -> (RecordRepository<Note>, Arc<dyn TreeStore>) {
        let store: Arc<dyn TreeStore> = Arc::new(InMemoryTreeStore::default());
        (RecordRepository::new(store.clone()), store)
    }

    fn note() -> Note {
        Note {
            host_user_id: "host".into(),
            counter: 0,
        }
    }

    #[tokio::test]
    async fn create_then_get() {
        let (repo, _) = repository();
        let id = repo.create(&note()).await.unwrap();
        assert_eq!(repo.get(&id).await.unwrap(), note());
    }

    #[tokio::test]
    async fn missing_record_is_not_found_everywhere() {
        let (repo, _) = repository();
        let counter = TreePath::parse("counter").unwrap();

        assert!(matches!(repo.get("nope").await, Err(RepositoryError::NotFound { .. })));
        assert!(matches!(
            repo.update_fields("nope", vec![(counter.clone(), json!(1))]).await,
            Err(RepositoryError::NotFound { .. })
        ));
        assert!(matches!(
            repo.atomic_update("nope", &counter, Box::new(|_| TransactionStep::Remove)).await,
            Err(RepositoryError::NotFound { .. })
        ));
        assert!(matches!(repo.get("bad.id").await, Err(RepositoryError::NotFound { .. })));
    }

    #[tokio::test]
    async fn fragment_without_required_field_reads_as_absent() {
        let (repo, store) = repository();
        store
            .set(TreePath::parse("notes/ghost/counter").unwrap(), json!(3))
            .await
            .unwrap();

        assert!(matches!(repo.get("ghost").await, Err(RepositoryError::NotFound { .. })));
        assert_eq!(repo.find("ghost").await.unwrap(), None);
    }

    #[tokio::test]
    async fn atomic_update_runs_on_the_field() {
        let (repo, _) = repository();
        let id = repo.create(&note()).await.unwrap();
        let counter = TreePath::parse("counter").unwrap();

        let outcome = repo
            .atomic_update(
                &id,
                &counter,
                Box::new(|current| {
                    let value = current.and_then(Value::as_u64).unwrap_or(0);
                    TransactionStep::Set(json!(value + 1))
                }),
            )
            .await
            .unwrap();

        assert_eq!(outcome, TransactionOutcome::Committed(Some(json!(1))));
        assert_eq!(repo.get(&id).await.unwrap().counter, 1);
    }

    #[tokio::test]
    async fn subscribe_reports_removal() {
        let (repo, _) = repository();
        let id = repo.create(&note()).await.unwrap();
        let mut stream = repo.subscribe(&id).unwrap();

        assert_eq!(stream.next().await.unwrap().unwrap(), Some(note()));
        repo.remove(&id).await.unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap(), None);
    }

    #[tokio::test]
    async fn hosting_back_reference_round_trip() {
        let (_, store) = repository();
        let users = UserRepository::new(store);

        users.set_hosting("u1", HostingSlot::Quiz, Some("q1")).await.unwrap();
        assert_eq!(users.hosting("u1", HostingSlot::Quiz).await.unwrap().as_deref(), Some("q1"));
        assert_eq!(users.hosting("u1", HostingSlot::Session).await.unwrap(), None);

        users.set_hosting("u1", HostingSlot::Quiz, None).await.unwrap();
        assert_eq!(users.hosting("u1", HostingSlot::Quiz).await.unwrap(), None);
    }
}
