//! The public cache store for one collection.

use crate::config::{ReadOptions, StoreConfig, SyncOptions, WriteOptions};
use crate::engine::{PushResult, SyncEngine};
use crate::error::{SyncError, SyncResult};
use crate::lock::PushLocks;
use crate::transport::RemoteTransport;
use async_stream::stream;
use cachesync_protocol::{generate_local_id, Aggregation, Document, Query, SyncEntry};
use cachesync_storage::{Scope, StorageAdapter};
use futures::stream::{Stream, StreamExt};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, info};

/// One emission of a read.
#[derive(Debug)]
pub enum ReadEvent<T> {
    /// The local result, emitted first.
    Initial(T),
    /// The local result after reconciling with the backend.
    Refreshed(T),
    /// The read failed; nothing follows.
    Failed(SyncError),
}

impl<T> ReadEvent<T> {
    /// Returns the carried value, if any.
    pub fn value(&self) -> Option<&T> {
        match self {
            ReadEvent::Initial(value) | ReadEvent::Refreshed(value) => Some(value),
            ReadEvent::Failed(_) => None,
        }
    }

    /// Converts the event into a result.
    pub fn into_result(self) -> SyncResult<T> {
        match self {
            ReadEvent::Initial(value) | ReadEvent::Refreshed(value) => Ok(value),
            ReadEvent::Failed(err) => Err(err),
        }
    }
}

/// The stream returned by reads.
///
/// Yields at most two values followed by completion, or ends with a
/// single [`ReadEvent::Failed`].
pub type ReadStream<'a, T> = Pin<Box<dyn Stream<Item = ReadEvent<T>> + Send + 'a>>;

/// Drives a read to completion and returns its last value.
///
/// # Errors
///
/// Returns the error of a [`ReadEvent::Failed`] emission.
pub async fn settle<T>(mut stream: ReadStream<'_, T>) -> SyncResult<T> {
    let mut last = None;
    while let Some(event) = stream.next().await {
        last = Some(event.into_result()?);
    }
    last.ok_or_else(|| SyncError::Sync("read completed without a value".into()))
}

/// Outcome of [`CacheStore::sync`].
#[derive(Debug)]
pub struct SyncSummary {
    /// Per-entry push results.
    pub push: Vec<PushResult>,
    /// Number of documents received by the pull.
    pub pull: u64,
}

/// The offline-first store for one collection.
///
/// Reads answer from the local cache first and, with auto-sync, again
/// after reconciling with the backend. Writes land in the local cache and
/// the sync queue and, with auto-sync, are pushed immediately.
///
/// # Example
///
/// ```rust
/// use cachesync_engine::{settle, CacheStore, MemoryTransport, ReadOptions, StoreConfig, WriteOptions};
/// use cachesync_protocol::Document;
/// use cachesync_storage::InMemoryAdapter;
/// use serde_json::json;
/// use std::sync::Arc;
///
/// # tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap().block_on(async {
/// let store = CacheStore::new(
///     Arc::new(InMemoryAdapter::new()),
///     Arc::new(MemoryTransport::new()),
///     "books",
///     StoreConfig::default().with_auto_sync(false),
/// );
///
/// store.create(Document::new().with("title", json!("Dune")), WriteOptions::new()).await.unwrap();
/// assert_eq!(store.pending_sync_count(None).await.unwrap(), 1);
///
/// let docs = settle(store.find(None, ReadOptions::new())).await.unwrap();
/// assert_eq!(docs.len(), 1);
/// # });
/// ```
pub struct CacheStore {
    engine: SyncEngine,
    config: StoreConfig,
}

impl CacheStore {
    /// Creates a store for `collection` under the configured tag.
    pub fn new(
        adapter: Arc<dyn StorageAdapter>,
        transport: Arc<dyn RemoteTransport>,
        collection: impl Into<String>,
        config: StoreConfig,
    ) -> Self {
        let scope = Scope::new(collection, config.tag.clone());
        let engine = SyncEngine::new(adapter, transport, scope)
            .with_push_batch_size(config.push_batch_size);
        Self { engine, config }
    }

    /// Shares a push lock registry with other stores.
    #[must_use]
    pub fn with_push_locks(mut self, locks: PushLocks) -> Self {
        self.engine = self.engine.with_push_locks(locks);
        self
    }

    /// Returns the collection name.
    pub fn collection(&self) -> &str {
        self.engine.collection()
    }

    /// Returns the store configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Returns the underlying sync engine.
    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    /// Reads the documents matching `query`.
    pub fn find(&self, query: Option<Query>, options: ReadOptions) -> ReadStream<'_, Vec<Document>> {
        self.read(query.clone(), options, move |engine| {
            let query = query.clone();
            async move { engine.cache().find(query.as_ref()).await }
        })
    }

    /// Counts the documents matching `query`.
    pub fn count(&self, query: Option<Query>, options: ReadOptions) -> ReadStream<'_, u64> {
        self.read(query.clone(), options, move |engine| {
            let query = query.clone();
            async move { engine.cache().count(query.as_ref()).await }
        })
    }

    /// Runs an aggregation.
    pub fn group(&self, aggregation: Aggregation, options: ReadOptions) -> ReadStream<'_, Vec<Value>> {
        self.read(aggregation.query.clone(), options, move |engine| {
            let aggregation = aggregation.clone();
            async move { engine.cache().group(&aggregation).await }
        })
    }

    /// Reads one document.
    ///
    /// With auto-sync the document is refetched from the backend; if the
    /// backend no longer has it, the local copy is dropped and the refreshed
    /// value is `None`.
    pub fn find_by_id(&self, id: impl Into<String>, options: ReadOptions) -> ReadStream<'_, Option<Document>> {
        let id = id.into();
        let auto_sync = self.config.read_auto_sync(&options);
        let request = self.config.sync_options(&options).request();
        let engine = &self.engine;

        Box::pin(stream! {
            match engine.cache().find_by_id(&id).await {
                Ok(doc) => yield ReadEvent::Initial(doc),
                Err(err) => {
                    yield ReadEvent::Failed(err);
                    return;
                }
            }
            if !auto_sync {
                return;
            }
            if let Err(err) = self.ensure_no_pending().await {
                yield ReadEvent::Failed(err);
                return;
            }
            match engine.remote().find_by_id(&id, &request).await {
                Ok(response) => match engine.cache().save(response.data).await {
                    Ok(doc) => yield ReadEvent::Refreshed(Some(doc)),
                    Err(err) => yield ReadEvent::Failed(err),
                },
                Err(err) if err.is_not_found() => {
                    debug!(collection = %engine.collection(), id = %id, "entity gone remotely");
                    match engine.cache().remove_by_id(&id).await {
                        Ok(_) => yield ReadEvent::Refreshed(None),
                        Err(err) => yield ReadEvent::Failed(err),
                    }
                }
                Err(err) => yield ReadEvent::Failed(err),
            }
        })
    }

    /// Creates a document.
    ///
    /// A document without an id gets a local one and is flagged as local
    /// until its first push. With auto-sync the committed document is
    /// returned.
    pub async fn create(&self, doc: Document, options: WriteOptions) -> SyncResult<Document> {
        let mut doc = doc;
        if doc.id().is_none() {
            doc.set_id(generate_local_id());
            doc.mark_local();
        }
        let saved = self.engine.cache().save(doc).await?;
        self.engine
            .queue()
            .add_create_sync_event(std::slice::from_ref(&saved))
            .await?;
        self.after_save(saved, &options).await
    }

    /// Updates a document.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidArgument`] if the document has no id.
    pub async fn update(&self, doc: Document, options: WriteOptions) -> SyncResult<Document> {
        if doc.id().is_none() {
            return Err(SyncError::InvalidArgument(
                "cannot update a document without an id".into(),
            ));
        }
        let saved = self.engine.cache().save(doc).await?;
        self.engine
            .queue()
            .add_update_sync_event(std::slice::from_ref(&saved))
            .await?;
        self.after_save(saved, &options).await
    }

    /// Removes the documents matching `query`; `None` removes every
    /// document.
    ///
    /// Returns the number removed, less the deletes that failed to push.
    pub async fn remove(&self, query: Option<Query>, options: WriteOptions) -> SyncResult<u64> {
        let docs = self.engine.cache().find(query.as_ref()).await?;
        self.remove_documents(docs, &options).await
    }

    /// Removes one document.
    pub async fn remove_by_id(&self, id: &str, options: WriteOptions) -> SyncResult<u64> {
        let docs = self.engine.cache().find_by_id(id).await?.into_iter().collect();
        self.remove_documents(docs, &options).await
    }

    /// Pushes the queued mutations matching `query`.
    pub async fn push(&self, query: Option<Query>, options: WriteOptions) -> SyncResult<Vec<PushResult>> {
        let request = self.config.request_options(&options);
        self.engine.push(query.as_ref(), &request).await
    }

    /// Refreshes the local copy of `query` from the backend.
    ///
    /// # Errors
    ///
    /// Fails with [`SyncError::PendingSyncItems`] while mutations are
    /// queued for this collection.
    pub async fn pull(&self, query: Option<Query>, options: ReadOptions) -> SyncResult<u64> {
        self.ensure_no_pending().await?;
        let sync = self.config.sync_options(&options);
        self.engine.reconcile(query.as_ref(), &sync).await
    }

    /// Pushes every queued mutation, then pulls `query`.
    pub async fn sync(&self, query: Option<Query>, options: ReadOptions) -> SyncResult<SyncSummary> {
        let write = WriteOptions {
            auto_sync: None,
            timeout: options.timeout,
        };
        let push = self.push(None, write).await?;
        let pull = self.pull(query, options).await?;
        info!(
            collection = %self.collection(),
            pushed = push.len(),
            pulled = pull,
            "sync complete"
        );
        Ok(SyncSummary { push, pull })
    }

    /// Counts the queued mutations matching `query`.
    pub async fn pending_sync_count(&self, query: Option<Query>) -> SyncResult<u64> {
        self.engine.queue().count(query.as_ref()).await
    }

    /// Returns the queued mutations matching `query`.
    pub async fn pending_sync_entities(&self, query: Option<Query>) -> SyncResult<Vec<SyncEntry>> {
        self.engine.queue().find(query.as_ref()).await
    }

    /// Drops the queued mutations matching `query` without pushing them.
    pub async fn clear_sync(&self, query: Option<Query>) -> SyncResult<u64> {
        self.engine.queue().remove(query.as_ref()).await
    }

    /// Drops local documents without touching the backend.
    ///
    /// Without a query the whole collection goes, together with its sync
    /// queue and query cache. With a query, the matching documents and
    /// their queued mutations go, and the query cache is purged. Returns
    /// the number of documents removed.
    pub async fn clear(&self, query: Option<Query>) -> SyncResult<u64> {
        let Some(query) = query else {
            let removed = self.engine.cache().clear().await?;
            self.engine.queue().clear().await?;
            self.engine.query_cache().clear().await?;
            return Ok(removed);
        };

        let ids = document_ids(&self.engine.cache().find(Some(&query)).await?);
        if ids.is_empty() {
            return Ok(0);
        }
        let by_ids = Query::by_ids(ids);
        let removed = self.engine.cache().remove(Some(&by_ids)).await?;
        self.engine.queue().remove(Some(&by_ids)).await?;
        self.engine.query_cache().clear().await?;
        Ok(removed)
    }

    fn read<'a, T, F, Fut>(
        &'a self,
        query: Option<Query>,
        options: ReadOptions,
        load: F,
    ) -> ReadStream<'a, T>
    where
        T: Send + 'a,
        F: Fn(&'a SyncEngine) -> Fut + Send + 'a,
        Fut: Future<Output = SyncResult<T>> + Send + 'a,
    {
        let auto_sync = self.config.read_auto_sync(&options);
        let sync = self.config.sync_options(&options);
        let engine = &self.engine;

        Box::pin(stream! {
            match load(engine).await {
                Ok(value) => yield ReadEvent::Initial(value),
                Err(err) => {
                    yield ReadEvent::Failed(err);
                    return;
                }
            }
            if !auto_sync {
                return;
            }
            if let Err(err) = self.refresh(query.as_ref(), &sync).await {
                yield ReadEvent::Failed(err);
                return;
            }
            match load(engine).await {
                Ok(value) => yield ReadEvent::Refreshed(value),
                Err(err) => yield ReadEvent::Failed(err),
            }
        })
    }

    async fn refresh(&self, query: Option<&Query>, options: &SyncOptions) -> SyncResult<u64> {
        self.ensure_no_pending().await?;
        self.engine.reconcile(query, options).await
    }

    async fn ensure_no_pending(&self) -> SyncResult<()> {
        let count = self.engine.queue().count(None).await?;
        if count > 0 {
            return Err(SyncError::PendingSyncItems {
                collection: self.collection().to_string(),
                count,
            });
        }
        Ok(())
    }

    async fn after_save(&self, saved: Document, options: &WriteOptions) -> SyncResult<Document> {
        if !self.config.write_auto_sync(options) {
            return Ok(saved);
        }
        let id = saved
            .id()
            .map(str::to_string)
            .ok_or_else(|| SyncError::Sync("saved document has no id".into()))?;
        let request = self.config.request_options(options);
        let results = self.engine.push(Some(&Query::by_id(id.clone())), &request).await?;
        let result = results
            .into_iter()
            .find(|r| r.id == id)
            .ok_or_else(|| SyncError::Sync(format!("push produced no result for entity {id}")))?;
        match result.error {
            Some(err) => Err(err),
            None => result
                .entity
                .ok_or_else(|| SyncError::Sync(format!("push returned no entity for {id}"))),
        }
    }

    async fn remove_documents(&self, docs: Vec<Document>, options: &WriteOptions) -> SyncResult<u64> {
        let ids = document_ids(&docs);
        if ids.is_empty() {
            return Ok(0);
        }
        let by_ids = Query::by_ids(ids);
        let removed = self.engine.cache().remove(Some(&by_ids)).await?;
        self.engine.queue().add_delete_sync_event(&docs).await?;

        if !self.config.write_auto_sync(options) {
            return Ok(removed);
        }
        let request = self.config.request_options(options);
        let results = self.engine.push(Some(&by_ids), &request).await?;
        let failed = results.iter().filter(|r| !r.is_success()).count() as u64;
        Ok(removed.saturating_sub(failed))
    }
}

fn document_ids(docs: &[Document]) -> Vec<String> {
    docs.iter()
        .filter_map(|doc| doc.id().map(str::to_string))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTransport;
    use cachesync_storage::InMemoryAdapter;
    use serde_json::json;

    fn store(config: StoreConfig) -> (Arc<MemoryTransport>, CacheStore) {
        let transport = Arc::new(MemoryTransport::new());
        let store = CacheStore::new(
            Arc::new(InMemoryAdapter::new()),
            transport.clone(),
            "books",
            config,
        );
        (transport, store)
    }

    fn book(id: &str, title: &str) -> Document {
        Document::from_value(json!({"_id": id, "title": title})).unwrap()
    }

    async fn collect<T>(stream: ReadStream<'_, T>) -> Vec<ReadEvent<T>> {
        stream.collect().await
    }

    #[tokio::test]
    async fn find_emits_local_then_refreshed() {
        let (transport, store) = store(StoreConfig::default());
        transport.insert("books", vec![book("a", "Dune")]);

        let events = collect(store.find(None, ReadOptions::new())).await;
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], ReadEvent::Initial(docs) if docs.is_empty()));
        assert!(matches!(&events[1], ReadEvent::Refreshed(docs) if docs.len() == 1));
    }

    #[tokio::test]
    async fn find_without_auto_sync_stays_local() {
        let (transport, store) = store(StoreConfig::default().with_auto_sync(false));
        transport.insert("books", vec![book("a", "Dune")]);

        let events = collect(store.find(None, ReadOptions::new())).await;
        assert_eq!(events.len(), 1);
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn reads_are_blocked_by_pending_entries() {
        let (_, store) = store(StoreConfig::default());
        store
            .create(book("a", "Dune"), WriteOptions::new().auto_sync(false))
            .await
            .unwrap();

        let events = collect(store.count(None, ReadOptions::new())).await;
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], ReadEvent::Initial(1)));
        assert!(matches!(
            events[1],
            ReadEvent::Failed(SyncError::PendingSyncItems { count: 1, .. })
        ));

        let err = store.pull(None, ReadOptions::new()).await.unwrap_err();
        assert!(err.to_string().contains("1 entities"));
    }

    #[tokio::test]
    async fn invalid_query_fails_stream_immediately() {
        let (transport, store) = store(StoreConfig::default());
        let query = Query::from_filter(json!({"$nope": 1}).as_object().unwrap().clone());
        let events = collect(store.find(Some(query), ReadOptions::new())).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], ReadEvent::Failed(SyncError::Validation(_))));
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn create_with_auto_sync_returns_committed_entity() {
        let (transport, store) = store(StoreConfig::default());
        let created = store
            .create(Document::new().with("title", json!("Dune")), WriteOptions::new())
            .await
            .unwrap();

        let id = created.id().unwrap();
        assert!(!created.is_local());
        assert!(transport.document("books", id).is_some());
        assert_eq!(store.pending_sync_count(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn create_without_auto_sync_stays_queued() {
        let (transport, store) = store(StoreConfig::default().with_auto_sync(false));
        let created = store
            .create(Document::new().with("title", json!("Dune")), WriteOptions::new())
            .await
            .unwrap();

        assert!(created.is_local());
        assert_eq!(created.id().map(str::len), Some(24));
        let pending = store.pending_sync_entities(None).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(Some(pending[0].entity_id.as_str()), created.id());
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn update_requires_id() {
        let (_, store) = store(StoreConfig::default());
        let result = store
            .update(Document::new().with("title", json!("Dune")), WriteOptions::new())
            .await;
        assert!(matches!(result, Err(SyncError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn update_push_failure_surfaces() {
        let (transport, store) = store(StoreConfig::default());
        transport.fail_entity("a", 500, cachesync_protocol::ServerErrorBody::new("InternalError"));

        let result = store.update(book("a", "Dune"), WriteOptions::new()).await;
        assert!(matches!(result, Err(SyncError::Server { status: 500, .. })));
        assert_eq!(store.pending_sync_count(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn remove_counts_only_committed_deletes() {
        let (transport, store) = store(StoreConfig::default());
        transport.insert("books", vec![book("a", "Dune"), book("b", "Emma")]);
        store.pull(None, ReadOptions::new()).await.unwrap();
        transport.fail_entity("b", 500, cachesync_protocol::ServerErrorBody::new("InternalError"));

        let removed = store.remove(None, WriteOptions::new()).await.unwrap();
        assert_eq!(removed, 1);
        assert!(transport.document("books", "a").is_none());
        assert!(transport.document("books", "b").is_some());
        assert_eq!(store.pending_sync_count(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn remove_by_id_of_unknown_document() {
        let (transport, store) = store(StoreConfig::default());
        assert_eq!(store.remove_by_id("nope", WriteOptions::new()).await.unwrap(), 0);
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn find_by_id_refreshes_from_backend() {
        let (transport, store) = store(StoreConfig::default());
        transport.insert("books", vec![book("a", "Dune")]);

        let doc = settle(store.find_by_id("a", ReadOptions::new())).await.unwrap();
        assert_eq!(doc.and_then(|d| d.get("title").cloned()), Some(json!("Dune")));

        transport.delete("books", "a");
        let events = collect(store.find_by_id("a", ReadOptions::new())).await;
        assert!(matches!(&events[0], ReadEvent::Initial(Some(_))));
        assert!(matches!(&events[1], ReadEvent::Refreshed(None)));
        assert!(store.engine().cache().find_by_id("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn group_refreshes_then_aggregates() {
        let (transport, store) = store(StoreConfig::default());
        transport.insert(
            "books",
            vec![
                Document::from_value(json!({"_id": "a", "genre": "scifi"})).unwrap(),
                Document::from_value(json!({"_id": "b", "genre": "scifi"})).unwrap(),
            ],
        );
        let groups = settle(store.group(Aggregation::count().by("genre"), ReadOptions::new()))
            .await
            .unwrap();
        assert_eq!(groups, vec![json!({"genre": "scifi", "result": 2})]);
    }

    #[tokio::test]
    async fn sync_pushes_then_pulls() {
        let (transport, store) = store(StoreConfig::default().with_auto_sync(false));
        transport.insert("books", vec![book("remote", "Emma")]);
        store
            .create(Document::new().with("title", json!("Dune")), WriteOptions::new())
            .await
            .unwrap();

        let summary = store.sync(None, ReadOptions::new()).await.unwrap();
        assert_eq!(summary.push.len(), 1);
        assert!(summary.push[0].is_success());
        assert_eq!(summary.pull, 2);
        assert_eq!(store.engine().cache().count(None).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn clear_drops_local_state() {
        let (_, store) = store(StoreConfig::default().with_auto_sync(false));
        store.create(book("a", "Dune"), WriteOptions::new()).await.unwrap();
        store.create(book("b", "Emma"), WriteOptions::new()).await.unwrap();

        let removed = store
            .clear(Some(Query::new().equal_to("title", "Dune")))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.pending_sync_count(None).await.unwrap(), 1);

        assert_eq!(store.clear(None).await.unwrap(), 1);
        assert_eq!(store.pending_sync_count(None).await.unwrap(), 0);
        assert_eq!(store.clear_sync(None).await.unwrap(), 0);
    }
}
