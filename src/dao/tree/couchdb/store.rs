use std::{sync::Arc, time::Duration};

use futures::future::BoxFuture;
use reqwest::{Client, Method, StatusCode, Url};
use serde_json::{Map, Value};
use tracing::debug;

use crate::dao::{
    storage::{StorageError, StorageResult},
    tree::{
        SnapshotStream, TransactionFn, TransactionOutcome, TransactionStep, TreePath, TreeStore,
        value::{normalize, value_at, write_at},
    },
};

use super::{
    config::CouchConfig,
    error::{CouchDaoError, CouchResult},
    models::{
        AllDocsResponse, END_SUFFIX, RecordDocument, collection_prefix, record_doc_id, record_id,
    },
};

/// Result of a revision-guarded write.
#[derive(Debug, PartialEq, Eq)]
enum WriteOutcome {
    Written,
    /// Another writer bumped the revision first.
    Conflict,
}

/// Result of a read-modify-write cycle on one record document.
enum MutateOutcome {
    Committed,
    Aborted,
    Conflicted,
}

/// Record location derived from a tree path: `{collection}/{id}/{rest..}`.
struct RecordLocation {
    doc_id: String,
    rest: Vec<String>,
}

#[derive(Clone)]
pub struct CouchTreeStore {
    client: Client,
    database_url: Arc<Url>,
    database: Arc<str>,
    auth: Option<(Arc<str>, Arc<str>)>,
    poll_interval: Duration,
    max_retries: usize,
}

impl CouchTreeStore {
    /// Establish a connection to CouchDB and ensure the database exists.
    pub async fn connect(config: CouchConfig) -> CouchResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|source| CouchDaoError::ClientBuilder { source })?;

        let raw_url = format!(
            "{}/{}",
            config.base_url.trim_end_matches('/'),
            config.database
        );
        let database_url = Url::parse(&raw_url)
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| CouchDaoError::UnsupportedPath {
                path: raw_url.clone(),
            })?;
        let auth = config
            .username
            .zip(config.password)
            .map(|(u, p)| (Arc::<str>::from(u), Arc::<str>::from(p)));

        let store = Self {
            client,
            database_url: Arc::new(database_url),
            database: Arc::from(config.database),
            auth,
            poll_interval: config.poll_interval,
            max_retries: config.max_retries.max(1),
        };

        store.ensure_database().await?;
        Ok(store)
    }

    fn document_url(&self, doc_id: &str) -> Url {
        let mut url = (*self.database_url).clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.push(doc_id);
        }
        url
    }

    fn request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, url);
        if let Some((ref user, ref pass)) = self.auth {
            builder.basic_auth(user.as_ref(), Some(pass.as_ref()))
        } else {
            builder
        }
    }

    async fn ensure_database(&self) -> CouchResult<()> {
        let database = self.database.to_string();
        let url = (*self.database_url).clone();

        let response = self
            .request(Method::GET, url.clone())
            .send()
            .await
            .map_err(|source| CouchDaoError::DatabaseQuery {
                database: database.clone(),
                source,
            })?;

        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => {
                let create = self
                    .request(Method::PUT, url)
                    .send()
                    .await
                    .map_err(|source| CouchDaoError::DatabaseCreate {
                        database: database.clone(),
                        source,
                    })?;
                if create.status().is_success() {
                    Ok(())
                } else {
                    Err(CouchDaoError::DatabaseStatus {
                        database,
                        status: create.status(),
                    })
                }
            }
            other => Err(CouchDaoError::DatabaseStatus {
                database,
                status: other,
            }),
        }
    }

    async fn get_document(&self, doc_id: &str) -> CouchResult<Option<RecordDocument>> {
        let response = self
            .request(Method::GET, self.document_url(doc_id))
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => response
                .json::<RecordDocument>()
                .await
                .map(Some)
                .map_err(|source| CouchDaoError::DecodeResponse {
                    path: doc_id.to_string(),
                    source,
                }),
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status: other,
            }),
        }
    }

    async fn put_document(&self, document: &RecordDocument) -> CouchResult<WriteOutcome> {
        let response = self
            .request(Method::PUT, self.document_url(&document.id))
            .json(document)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: document.id.clone(),
                source,
            })?;

        write_outcome(response.status(), &document.id, false)
    }

    async fn delete_document(&self, doc_id: &str, rev: &str) -> CouchResult<WriteOutcome> {
        let response = self
            .request(Method::DELETE, self.document_url(doc_id))
            .query(&[("rev", rev)])
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        write_outcome(response.status(), doc_id, true)
    }

    async fn list_documents(&self, prefix: &str) -> CouchResult<Vec<RecordDocument>> {
        const ALL_DOCS: &str = "_all_docs";
        let query = [
            ("include_docs", "true".to_string()),
            ("startkey", format!("\"{}\"", prefix)),
            ("endkey", format!("\"{}{}\"", prefix, END_SUFFIX)),
        ];

        let response = self
            .request(Method::GET, self.document_url(ALL_DOCS))
            .query(&query)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: ALL_DOCS.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(CouchDaoError::RequestStatus {
                path: ALL_DOCS.to_string(),
                status: response.status(),
            });
        }

        let payload = response.json::<AllDocsResponse>().await.map_err(|source| {
            CouchDaoError::DecodeResponse {
                path: ALL_DOCS.to_string(),
                source,
            }
        })?;

        Ok(payload.rows.into_iter().filter_map(|row| row.doc).collect())
    }

    /// Read a path. Collection paths are assembled from every document of the collection.
    async fn read(&self, path: &TreePath) -> StorageResult<Option<Value>> {
        match path.segments() {
            [] => Err(CouchDaoError::UnsupportedPath {
                path: path.to_string(),
            }
            .into()),
            [collection] => {
                let documents = self.list_documents(&collection_prefix(collection)).await?;
                let records: Map<String, Value> = documents
                    .into_iter()
                    .filter_map(|doc| {
                        let id = record_id(collection, &doc.id)?.to_string();
                        Some((id, doc.value))
                    })
                    .collect();
                Ok(normalize(Value::Object(records)))
            }
            _ => {
                let location = locate(path)?;
                let document = self.get_document(&location.doc_id).await?;
                Ok(document.and_then(|doc| value_at(&doc.value, &location.rest).cloned()))
            }
        }
    }

    /// Read-modify-write a record document, retrying whenever its revision moved underneath us.
    ///
    /// `apply` edits the whole record value in place and returns `false` to abort.
    async fn mutate_record<F>(&self, path: &TreePath, mut apply: F) -> StorageResult<MutateOutcome>
    where
        F: FnMut(&mut Value, &[String]) -> StorageResult<bool> + Send,
    {
        let location = locate(path)?;

        for attempt in 0..self.max_retries {
            let existing = self.get_document(&location.doc_id).await?;
            let mut record = existing
                .as_ref()
                .map(|doc| doc.value.clone())
                .unwrap_or(Value::Null);

            if !apply(&mut record, &location.rest)? {
                return Ok(MutateOutcome::Aborted);
            }

            let outcome = match (existing, record) {
                (None, Value::Null) => WriteOutcome::Written,
                (Some(doc), Value::Null) => match doc.rev {
                    Some(rev) => self.delete_document(&location.doc_id, &rev).await?,
                    None => WriteOutcome::Conflict,
                },
                (existing, value) => {
                    let document = RecordDocument {
                        id: location.doc_id.clone(),
                        rev: existing.and_then(|doc| doc.rev),
                        value,
                    };
                    self.put_document(&document).await?
                }
            };

            match outcome {
                WriteOutcome::Written => return Ok(MutateOutcome::Committed),
                WriteOutcome::Conflict => {
                    debug!(path = %path, attempt, "CouchDB revision conflict; retrying");
                }
            }
        }

        Ok(MutateOutcome::Conflicted)
    }

    async fn write(&self, path: &TreePath, changes: Vec<(TreePath, Option<Value>)>) -> StorageResult<()> {
        let outcome = self
            .mutate_record(path, |record, rest| {
                for (relative, value) in &changes {
                    let mut target = rest.to_vec();
                    target.extend(relative.segments().iter().cloned());
                    write_at(record, &target, value.clone())?;
                }
                Ok(true)
            })
            .await?;

        match outcome {
            MutateOutcome::Conflicted => Err(StorageError::Contended {
                path: path.to_string(),
            }),
            MutateOutcome::Committed | MutateOutcome::Aborted => Ok(()),
        }
    }
}

/// Map the status of a revision-guarded write.
///
/// A delete racing another delete sees 404, which counts as a conflict so the caller re-reads.
fn write_outcome(
    status: StatusCode,
    doc_id: &str,
    missing_is_conflict: bool,
) -> CouchResult<WriteOutcome> {
    match status {
        StatusCode::CONFLICT => Ok(WriteOutcome::Conflict),
        StatusCode::NOT_FOUND if missing_is_conflict => Ok(WriteOutcome::Conflict),
        status if status.is_success() => Ok(WriteOutcome::Written),
        status => Err(CouchDaoError::RequestStatus {
            path: doc_id.to_string(),
            status,
        }),
    }
}

fn locate(path: &TreePath) -> CouchResult<RecordLocation> {
    match path.segments() {
        [collection, id, rest @ ..] => Ok(RecordLocation {
            doc_id: record_doc_id(collection, id),
            rest: rest.to_vec(),
        }),
        _ => Err(CouchDaoError::UnsupportedPath {
            path: path.to_string(),
        }),
    }
}

impl TreeStore for CouchTreeStore {
    fn get(&self, path: TreePath) -> BoxFuture<'static, StorageResult<Option<Value>>> {
        let store = self.clone();
        Box::pin(async move { store.read(&path).await })
    }

    fn set(&self, path: TreePath, value: Value) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .write(&path, vec![(TreePath::root(), Some(value))])
                .await
        })
    }

    fn update(
        &self,
        path: TreePath,
        changes: Vec<(TreePath, Value)>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let changes = changes
                .into_iter()
                .map(|(relative, value)| (relative, Some(value)))
                .collect();
            store.write(&path, changes).await
        })
    }

    fn remove(&self, path: TreePath) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.write(&path, vec![(TreePath::root(), None)]).await })
    }

    fn transaction(
        &self,
        path: TreePath,
        mut step: TransactionFn,
    ) -> BoxFuture<'static, StorageResult<TransactionOutcome>> {
        let store = self.clone();
        Box::pin(async move {
            let mut seen: Option<Value> = None;
            let mut written: Option<Value> = None;

            let outcome = store
                .mutate_record(&path, |record, rest| {
                    seen = value_at(record, rest).cloned();
                    let next = match step(seen.as_ref()) {
                        TransactionStep::Abort => return Ok(false),
                        TransactionStep::Set(value) => normalize(value),
                        TransactionStep::Remove => None,
                    };
                    write_at(record, rest, next.clone())?;
                    written = next;
                    Ok(true)
                })
                .await?;

            Ok(match outcome {
                MutateOutcome::Committed => TransactionOutcome::Committed(written),
                MutateOutcome::Aborted => TransactionOutcome::Aborted(seen),
                MutateOutcome::Conflicted => TransactionOutcome::Conflicted,
            })
        })
    }

    fn subscribe(&self, path: TreePath) -> SnapshotStream {
        let store = self.clone();
        Box::pin(async_stream::stream! {
            let mut interval = tokio::time::interval(store.poll_interval);
            let mut last: Option<Option<Value>> = None;

            loop {
                interval.tick().await;
                match store.read(&path).await {
                    Ok(current) => {
                        if last.as_ref() != Some(&current) {
                            last = Some(current.clone());
                            yield Ok(current);
                        }
                    }
                    Err(err) => yield Err(err),
                }
            }
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let url = (*store.database_url).clone();
            let response = store
                .request(Method::GET, url.clone())
                .send()
                .await
                .map_err(|source| CouchDaoError::RequestSend {
                    path: url.to_string(),
                    source,
                })?;

            if response.status().is_success() {
                Ok(())
            } else {
                Err(CouchDaoError::RequestStatus {
                    path: url.to_string(),
                    status: response.status(),
                }
                .into())
            }
        })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ensure_database().await.map_err(Into::into) })
    }
}
