//! Sync engine: moves data between the local cache and the remote store.

use crate::cache::{LocalCache, QueryCache, SyncQueue};
use crate::config::{RequestOptions, SyncOptions, DEFAULT_PUSH_BATCH_SIZE};
use crate::error::{SyncError, SyncResult};
use crate::lock::PushLocks;
use crate::remote::RemoteStore;
use crate::transport::RemoteTransport;
use cachesync_protocol::{Document, Query, SyncEntry, SyncOperation};
use cachesync_storage::{Scope, StorageAdapter};
use futures::future::join_all;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of pushing one sync entry.
#[derive(Debug)]
pub struct PushResult {
    /// Id of the document, as it was queued.
    pub id: String,
    /// Operation that was pushed.
    pub operation: SyncOperation,
    /// The committed document on success, the pre-push document on a
    /// failed create or update, `None` for deletes.
    pub entity: Option<Document>,
    /// Why the entry is still queued.
    pub error: Option<SyncError>,
}

impl PushResult {
    fn success(id: String, operation: SyncOperation, entity: Option<Document>) -> Self {
        Self {
            id,
            operation,
            entity,
            error: None,
        }
    }

    fn failure(
        id: String,
        operation: SyncOperation,
        entity: Option<Document>,
        error: SyncError,
    ) -> Self {
        Self {
            id,
            operation,
            entity,
            error: Some(error),
        }
    }

    /// Returns true if the entry was committed and dequeued.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Statistics about sync operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Number of push calls that ran to completion.
    pub pushes_completed: u64,
    /// Number of entries committed.
    pub entities_pushed: u64,
    /// Number of entries that failed and stayed queued.
    pub push_failures: u64,
    /// Number of successful reconciliations.
    pub pulls_completed: u64,
    /// Number of documents received from the backend.
    pub entities_pulled: u64,
    /// Number of delta-set requests answered by a full read instead.
    pub delta_set_fallbacks: u64,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Reconciles one collection's local cache with the remote store.
///
/// - `push` commits queued mutations in sequential batches, each batch
///   dispatched concurrently; one entry's failure never aborts the rest
/// - `pull` replaces (no query) or merges (with a query) remote documents
/// - `delta_set` applies only what changed since the last read of a query
/// - `auto_paginate` fetches the collection in concurrent pages
///
/// At most one push runs per collection; a second one fails immediately
/// with [`SyncError::PushInProgress`].
pub struct SyncEngine {
    collection: String,
    cache: LocalCache,
    queue: SyncQueue,
    query_cache: QueryCache,
    remote: RemoteStore,
    locks: PushLocks,
    push_batch_size: usize,
    stats: RwLock<SyncStats>,
}

impl SyncEngine {
    /// Creates an engine for the collection in `scope`.
    pub fn new(
        adapter: Arc<dyn StorageAdapter>,
        transport: Arc<dyn RemoteTransport>,
        scope: Scope,
    ) -> Self {
        Self {
            collection: scope.collection.clone(),
            queue: SyncQueue::new(Arc::clone(&adapter), &scope),
            query_cache: QueryCache::new(Arc::clone(&adapter), &scope),
            remote: RemoteStore::new(scope.collection.clone(), transport),
            cache: LocalCache::new(adapter, scope),
            locks: PushLocks::new(),
            push_batch_size: DEFAULT_PUSH_BATCH_SIZE,
            stats: RwLock::new(SyncStats::default()),
        }
    }

    /// Shares a push lock registry with other engines.
    #[must_use]
    pub fn with_push_locks(mut self, locks: PushLocks) -> Self {
        self.locks = locks;
        self
    }

    /// Sets how many entries are pushed concurrently.
    #[must_use]
    pub fn with_push_batch_size(mut self, size: usize) -> Self {
        self.push_batch_size = size.max(1);
        self
    }

    /// Returns the collection name.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Returns the local cache.
    pub fn cache(&self) -> &LocalCache {
        &self.cache
    }

    /// Returns the sync queue.
    pub fn queue(&self) -> &SyncQueue {
        &self.queue
    }

    /// Returns the query cache.
    pub fn query_cache(&self) -> &QueryCache {
        &self.query_cache
    }

    /// Returns the remote store.
    pub fn remote(&self) -> &RemoteStore {
        &self.remote
    }

    /// Returns the push lock registry.
    pub fn push_locks(&self) -> &PushLocks {
        &self.locks
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Commits the queued entries matching `query`.
    ///
    /// Returns one result per entry, in queue order.
    ///
    /// # Errors
    ///
    /// Fails with [`SyncError::PushInProgress`] if a push is already running
    /// for this collection, or if the queue itself cannot be read.
    /// Per-entry failures are reported in the results instead.
    pub async fn push(
        &self,
        query: Option<&Query>,
        options: &RequestOptions,
    ) -> SyncResult<Vec<PushResult>> {
        let _guard = self
            .locks
            .try_acquire(&self.collection)
            .ok_or_else(|| SyncError::PushInProgress {
                collection: self.collection.clone(),
            })?;

        let entries = self.queue.find(query).await?;
        if entries.is_empty() {
            debug!(collection = %self.collection, "nothing to push");
            return Ok(Vec::new());
        }

        info!(
            collection = %self.collection,
            entries = entries.len(),
            "pushing sync entries"
        );

        let mut results = Vec::with_capacity(entries.len());
        for (index, batch) in entries.chunks(self.push_batch_size).enumerate() {
            debug!(
                collection = %self.collection,
                batch = index,
                size = batch.len(),
                "pushing batch"
            );
            let batch_results =
                join_all(batch.iter().map(|entry| self.push_entry(entry, options))).await;
            results.extend(batch_results);
        }

        let failed = results.iter().filter(|r| !r.is_success()).count() as u64;
        {
            let mut stats = self.stats.write();
            stats.pushes_completed += 1;
            stats.entities_pushed += results.len() as u64 - failed;
            stats.push_failures += failed;
            if let Some(err) = results.iter().rev().find_map(|r| r.error.as_ref()) {
                stats.last_error = Some(err.to_string());
            }
        }
        if failed > 0 {
            warn!(
                collection = %self.collection,
                failed,
                total = results.len(),
                "push finished with failures"
            );
        }
        Ok(results)
    }

    async fn push_entry(&self, entry: &SyncEntry, options: &RequestOptions) -> PushResult {
        match entry.operation() {
            SyncOperation::Delete => self.push_delete(entry, options).await,
            SyncOperation::Create | SyncOperation::Update => self.push_save(entry, options).await,
        }
    }

    async fn push_delete(&self, entry: &SyncEntry, options: &RequestOptions) -> PushResult {
        let id = entry.entity_id.clone();
        let outcome = match self.remote.remove_by_id(&id, options).await {
            Ok(_) => Ok(()),
            // Already gone remotely.
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err),
        };
        let outcome = match outcome {
            Ok(()) => self.queue.remove_by_id(&entry.id).await.map(|_| ()),
            Err(err) => Err(err),
        };

        match outcome {
            Ok(()) => PushResult::success(id, SyncOperation::Delete, None),
            Err(err) => {
                warn!(collection = %self.collection, id = %id, error = %err, "delete push failed");
                PushResult::failure(id, SyncOperation::Delete, None, err)
            }
        }
    }

    async fn push_save(&self, entry: &SyncEntry, options: &RequestOptions) -> PushResult {
        let id = entry.entity_id.clone();
        let operation = entry.operation();

        let doc = match self.cache.find_by_id(&id).await {
            Ok(Some(doc)) => doc,
            Ok(None) => {
                let err = SyncError::NotFound(format!(
                    "entity {id} is queued for {operation} but missing from the local cache"
                ));
                warn!(collection = %self.collection, id = %id, "queued entity missing locally");
                return PushResult::failure(id, operation, None, err);
            }
            Err(err) => return PushResult::failure(id, operation, None, err),
        };

        match self.commit_save(entry, doc.clone(), options).await {
            Ok(saved) => PushResult::success(id, operation, Some(saved)),
            Err(err) => {
                warn!(collection = %self.collection, id = %id, error = %err, "save push failed");
                PushResult::failure(id, operation, Some(doc), err)
            }
        }
    }

    async fn commit_save(
        &self,
        entry: &SyncEntry,
        doc: Document,
        options: &RequestOptions,
    ) -> SyncResult<Document> {
        let saved = if doc.is_local() {
            let mut body = doc;
            body.remove_id();
            body.clear_local();
            let created = self.remote.create(body, options).await?.data;
            self.cache.save(created.clone()).await?;
            if created.id() != Some(entry.entity_id.as_str()) {
                self.cache.remove_by_id(&entry.entity_id).await?;
            }
            created
        } else {
            let updated = self.remote.update(doc, options).await?.data;
            self.cache.save(updated.clone()).await?
        };
        self.queue.remove_by_id(&entry.id).await?;
        Ok(saved)
    }

    /// Fetches the documents matching `query` in one request.
    ///
    /// Without a query the local collection is replaced; with one, the
    /// results are merged. Returns the number of documents received.
    pub async fn pull(&self, query: Option<&Query>, options: &SyncOptions) -> SyncResult<u64> {
        validate(query)?;
        let (docs, request_start) = match self.remote.find(query, &options.request()).await {
            Ok(response) => {
                let request_start = response.request_start().map(str::to_string);
                (response.data, request_start)
            }
            Err(err) if err.is_not_found() => {
                debug!(collection = %self.collection, "remote collection not found; pulling nothing");
                (Vec::new(), None)
            }
            Err(err) => return Err(self.record_error(err)),
        };

        if query.is_none() {
            self.cache.clear().await?;
            self.query_cache.clear().await?;
        }
        let count = docs.len() as u64;
        self.cache.save_many(docs).await?;
        self.query_cache.save(query, request_start).await?;

        debug!(collection = %self.collection, count, "pulled");
        self.record_pull(count);
        Ok(count)
    }

    /// Applies the changes since the last read of `query`.
    ///
    /// Falls back to [`Self::auto_paginate`] or [`Self::pull`] when the
    /// query is paginated, has never been read, or the backend rejects the
    /// request as unconfigured or too old. Returns the number of changed
    /// documents received.
    pub async fn delta_set(&self, query: Option<&Query>, options: &SyncOptions) -> SyncResult<u64> {
        validate(query)?;
        if query.map(Query::is_paginated).unwrap_or(false) {
            return self.full_read(query, options).await;
        }

        let since = self
            .query_cache
            .find_for_query(query)
            .await?
            .and_then(|entry| entry.last_request);
        let Some(since) = since else {
            debug!(collection = %self.collection, "no previous read; running a full read");
            return self.full_read(query, options).await;
        };

        let response = match self.remote.delta_set(query, &since, &options.request()).await {
            Ok(response) => response,
            Err(err) if err.is_delta_set_fallback() => {
                warn!(
                    collection = %self.collection,
                    error = %err,
                    "delta-set unavailable; falling back to a full read"
                );
                self.stats.write().delta_set_fallbacks += 1;
                return self.full_read(query, options).await;
            }
            Err(err) => return Err(self.record_error(err)),
        };

        let request_start = response.request_start().map(str::to_string);
        let delta = response.data;
        if !delta.deleted.is_empty() {
            let ids = delta.deleted.into_iter().map(|d| d.id);
            self.cache.remove(Some(&Query::by_ids(ids))).await?;
        }
        let count = delta.changed.len() as u64;
        self.cache.save_many(delta.changed).await?;
        self.query_cache.save(query, request_start).await?;

        debug!(collection = %self.collection, changed = count, "applied delta-set");
        self.record_pull(count);
        Ok(count)
    }

    /// Replaces the local collection by fetching every page concurrently.
    ///
    /// Returns the total number of documents received.
    pub async fn auto_paginate(
        &self,
        query: Option<&Query>,
        options: &SyncOptions,
    ) -> SyncResult<u64> {
        validate(query)?;
        let request = options.request();

        self.cache.clear().await?;
        self.query_cache.clear().await?;
        let counted = self
            .remote
            .count(query, &request)
            .await
            .map_err(|err| self.record_error(err))?;
        let total = counted.data;

        let base = query.cloned().unwrap_or_default();
        let page_size = options.page_size.max(1);
        let step = usize::try_from(page_size).unwrap_or(usize::MAX);
        let pages: Vec<Query> = (0..total)
            .step_by(step)
            .map(|skip| base.page(skip, page_size))
            .collect();
        info!(
            collection = %self.collection,
            total,
            pages = pages.len(),
            "fetching pages"
        );

        let fetches = pages.iter().map(|page| {
            let request = &request;
            async move {
                let response = self.remote.find(Some(page), request).await?;
                let request_start = response.request_start().map(str::to_string);
                let saved = self.cache.save_many(response.data).await?;
                Ok::<_, SyncError>((saved.len() as u64, request_start))
            }
        });

        let mut received = 0;
        let mut last_request = counted.request_start().map(str::to_string);
        for outcome in join_all(fetches).await {
            let (count, request_start) = outcome.map_err(|err| self.record_error(err))?;
            received += count;
            if request_start.is_some() {
                last_request = request_start;
            }
        }
        self.query_cache.save(query, last_request).await?;

        self.record_pull(received);
        Ok(received)
    }

    /// Refreshes the local copy of `query` with the configured strategy.
    pub async fn reconcile(&self, query: Option<&Query>, options: &SyncOptions) -> SyncResult<u64> {
        if options.use_delta_set {
            self.delta_set(query, options).await
        } else {
            self.full_read(query, options).await
        }
    }

    async fn full_read(&self, query: Option<&Query>, options: &SyncOptions) -> SyncResult<u64> {
        if options.use_auto_pagination {
            self.auto_paginate(query, options).await
        } else {
            self.pull(query, options).await
        }
    }

    fn record_pull(&self, count: u64) {
        let mut stats = self.stats.write();
        stats.pulls_completed += 1;
        stats.entities_pulled += count;
    }

    fn record_error(&self, err: SyncError) -> SyncError {
        self.stats.write().last_error = Some(err.to_string());
        err
    }
}

fn validate(query: Option<&Query>) -> SyncResult<()> {
    if let Some(query) = query {
        query.validate()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTransport;
    use cachesync_protocol::ServerErrorBody;
    use cachesync_storage::InMemoryAdapter;
    use serde_json::json;

    struct Fixture {
        transport: Arc<MemoryTransport>,
        engine: SyncEngine,
    }

    fn fixture() -> Fixture {
        let transport = Arc::new(MemoryTransport::new());
        let engine = SyncEngine::new(
            Arc::new(InMemoryAdapter::new()),
            transport.clone(),
            Scope::untagged("books"),
        );
        Fixture { transport, engine }
    }

    fn book(id: &str, title: &str) -> Document {
        Document::from_value(json!({"_id": id, "title": title})).unwrap()
    }

    fn local_book(id: &str, title: &str) -> Document {
        let mut doc = book(id, title);
        doc.mark_local();
        doc
    }

    async fn stage(engine: &SyncEngine, op: SyncOperation, doc: Document) {
        engine.cache().save(doc.clone()).await.unwrap();
        engine.queue().add_sync_event(op, &[doc]).await.unwrap();
    }

    #[tokio::test]
    async fn push_empty_queue_is_noop() {
        let f = fixture();
        let results = f.engine.push(None, &RequestOptions::default()).await.unwrap();
        assert!(results.is_empty());
        assert_eq!(f.transport.request_count(), 0);
    }

    #[tokio::test]
    async fn push_local_create_rewrites_id() {
        let f = fixture();
        stage(&f.engine, SyncOperation::Create, local_book("local1", "Dune")).await;

        let results = f.engine.push(None, &RequestOptions::default()).await.unwrap();
        assert_eq!(results.len(), 1);
        let result = &results[0];
        assert!(result.is_success());
        assert_eq!(result.id, "local1");

        let committed = result.entity.as_ref().unwrap();
        let new_id = committed.id().unwrap();
        assert_ne!(new_id, "local1");
        assert!(!committed.is_local());
        assert!(f.engine.cache().find_by_id("local1").await.unwrap().is_none());
        assert!(f.engine.cache().find_by_id(new_id).await.unwrap().is_some());
        assert_eq!(f.engine.queue().count(None).await.unwrap(), 0);
        assert_eq!(f.transport.documents("books").len(), 1);
    }

    #[tokio::test]
    async fn push_create_with_real_id_updates() {
        let f = fixture();
        stage(&f.engine, SyncOperation::Create, book("b1", "Dune")).await;

        let results = f.engine.push(None, &RequestOptions::default()).await.unwrap();
        assert!(results[0].is_success());
        assert!(f.transport.document("books", "b1").is_some());
        let requests = f.transport.requests();
        assert_eq!(requests[0].method, crate::transport::Method::Put);
    }

    #[tokio::test]
    async fn push_update_of_local_document_creates() {
        let f = fixture();
        stage(&f.engine, SyncOperation::Update, local_book("local1", "Dune")).await;

        let results = f.engine.push(None, &RequestOptions::default()).await.unwrap();
        assert!(results[0].is_success());
        assert_eq!(results[0].operation, SyncOperation::Update);
        assert_eq!(f.transport.requests()[0].method, crate::transport::Method::Post);
    }

    #[tokio::test]
    async fn push_delete_of_missing_remote_succeeds() {
        let f = fixture();
        f.engine
            .queue()
            .add_delete_sync_event(&[book("gone", "x")])
            .await
            .unwrap();

        let results = f.engine.push(None, &RequestOptions::default()).await.unwrap();
        assert!(results[0].is_success());
        assert_eq!(results[0].operation, SyncOperation::Delete);
        assert_eq!(f.engine.queue().count(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn push_missing_local_document_stays_queued() {
        let f = fixture();
        f.engine
            .queue()
            .add_update_sync_event(&[book("b1", "Dune")])
            .await
            .unwrap();

        let results = f.engine.push(None, &RequestOptions::default()).await.unwrap();
        assert!(matches!(results[0].error, Some(SyncError::NotFound(_))));
        assert!(results[0].entity.is_none());
        assert_eq!(f.engine.queue().count(None).await.unwrap(), 1);
        assert_eq!(f.transport.request_count(), 0);
    }

    #[tokio::test]
    async fn push_failure_keeps_pre_push_document() {
        let f = fixture();
        f.transport
            .fail_entity("b1", 500, ServerErrorBody::new("InternalError"));
        stage(&f.engine, SyncOperation::Update, book("b1", "Dune")).await;

        let results = f.engine.push(None, &RequestOptions::default()).await.unwrap();
        let result = &results[0];
        assert!(matches!(result.error, Some(SyncError::Server { status: 500, .. })));
        assert_eq!(
            result.entity.as_ref().and_then(|d| d.get("title")),
            Some(&json!("Dune"))
        );
        assert_eq!(f.engine.queue().count(None).await.unwrap(), 1);

        let stats = f.engine.stats();
        assert_eq!(stats.push_failures, 1);
        assert!(stats.last_error.is_some());
    }

    #[tokio::test]
    async fn push_in_batches() {
        let f = fixture();
        let engine = f.engine.with_push_batch_size(2);
        for i in 0..5 {
            stage(&engine, SyncOperation::Update, book(&format!("b{i}"), "t")).await;
        }

        let results = engine.push(None, &RequestOptions::default()).await.unwrap();
        assert_eq!(results.len(), 5);
        assert!(results.iter().all(PushResult::is_success));
        assert_eq!(f.transport.documents("books").len(), 5);
        assert_eq!(engine.stats().entities_pushed, 5);
    }

    #[tokio::test]
    async fn push_is_rejected_while_locked() {
        let f = fixture();
        let locks = PushLocks::new();
        let engine = f.engine.with_push_locks(locks.clone());
        let _guard = locks.try_acquire("books").unwrap();

        let result = engine.push(None, &RequestOptions::default()).await;
        assert!(matches!(result, Err(SyncError::PushInProgress { .. })));
    }

    #[tokio::test]
    async fn pull_without_query_replaces_cache() {
        let f = fixture();
        f.engine.cache().save(book("stale", "Old")).await.unwrap();
        f.transport.insert("books", vec![book("a", "Dune"), book("b", "Emma")]);

        let count = f.engine.pull(None, &SyncOptions::default()).await.unwrap();
        assert_eq!(count, 2);
        assert!(f.engine.cache().find_by_id("stale").await.unwrap().is_none());

        let entry = f.engine.query_cache().find_for_query(None).await.unwrap().unwrap();
        assert!(entry.last_request.is_some());
    }

    #[tokio::test]
    async fn pull_with_query_merges() {
        let f = fixture();
        f.engine.cache().save(book("stale", "Old")).await.unwrap();
        f.transport.insert("books", vec![book("a", "Dune"), book("b", "Emma")]);

        let query = Query::new().equal_to("title", "Dune");
        let count = f.engine.pull(Some(&query), &SyncOptions::default()).await.unwrap();
        assert_eq!(count, 1);
        assert_eq!(f.engine.cache().count(None).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn pull_not_found_is_empty() {
        let f = fixture();
        f.transport.fail_once(
            |_| true,
            404,
            ServerErrorBody::new("CollectionNotFound"),
        );
        let count = f.engine.pull(None, &SyncOptions::default()).await.unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn pull_propagates_other_errors() {
        let f = fixture();
        f.transport.set_connected(false);
        let result = f.engine.pull(None, &SyncOptions::default()).await;
        assert!(matches!(result, Err(SyncError::Transport { .. })));
        assert!(f.engine.stats().last_error.is_some());
    }

    #[tokio::test]
    async fn delta_set_without_history_pulls() {
        let f = fixture();
        f.transport.enable_delta_set(true);
        f.transport.insert("books", vec![book("a", "Dune")]);

        let options = SyncOptions {
            use_delta_set: true,
            ..SyncOptions::default()
        };
        assert_eq!(f.engine.delta_set(None, &options).await.unwrap(), 1);
        let paths: Vec<String> = f.transport.requests().into_iter().map(|r| r.path).collect();
        assert_eq!(paths, vec!["/appdata/books".to_string()]);
    }

    #[tokio::test]
    async fn delta_set_falls_back_when_unconfigured() {
        let f = fixture();
        f.transport.insert("books", vec![book("a", "Dune")]);
        let options = SyncOptions {
            use_delta_set: true,
            ..SyncOptions::default()
        };
        f.engine.pull(None, &options).await.unwrap();

        f.transport.insert("books", vec![book("b", "Emma")]);
        assert_eq!(f.engine.delta_set(None, &options).await.unwrap(), 2);
        assert_eq!(f.engine.stats().delta_set_fallbacks, 1);
    }

    #[tokio::test]
    async fn delta_set_paginated_query_skips_delta() {
        let f = fixture();
        f.transport.enable_delta_set(true);
        f.transport.insert("books", vec![book("a", "Dune"), book("b", "Emma")]);

        let query = Query::new().limit(1);
        let options = SyncOptions::default();
        assert_eq!(f.engine.delta_set(Some(&query), &options).await.unwrap(), 1);
        assert!(f
            .transport
            .requests()
            .iter()
            .all(|r| !r.path.ends_with("_deltaset")));
        assert!(f.engine.query_cache().find_for_query(Some(&query)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn auto_paginate_fetches_every_page() {
        let f = fixture();
        let docs = (0..7).map(|i| book(&format!("b{i}"), "t")).collect();
        f.transport.insert("books", docs);
        f.engine.cache().save(book("stale", "Old")).await.unwrap();

        let options = SyncOptions {
            page_size: 3,
            ..SyncOptions::default()
        };
        assert_eq!(f.engine.auto_paginate(None, &options).await.unwrap(), 7);
        assert_eq!(f.engine.cache().count(None).await.unwrap(), 7);

        let skips: Vec<Option<String>> = f
            .transport
            .requests()
            .iter()
            .filter(|r| r.path == "/appdata/books")
            .map(|r| r.param("skip").map(str::to_string))
            .collect();
        assert_eq!(skips, vec![None, Some("3".into()), Some("6".into())]);
        assert!(f.engine.query_cache().find_for_query(None).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn auto_paginate_empty_collection() {
        let f = fixture();
        let options = SyncOptions {
            use_auto_pagination: true,
            ..SyncOptions::default()
        };
        assert_eq!(f.engine.reconcile(None, &options).await.unwrap(), 0);
        assert_eq!(f.transport.request_count(), 1);
        let entry = f.engine.query_cache().find_for_query(None).await.unwrap().unwrap();
        assert!(entry.last_request.is_some());
    }

    #[tokio::test]
    async fn collection_wipes_purge_query_cache() {
        let f = fixture();
        f.transport.insert("books", vec![book("a", "Dune"), book("b", "Emma")]);
        let dune = Query::new().equal_to("title", "Dune");
        let options = SyncOptions::default();

        f.engine.pull(None, &options).await.unwrap();
        f.engine.auto_paginate(Some(&dune), &options).await.unwrap();
        assert!(f.engine.query_cache().find_for_query(None).await.unwrap().is_none());
        assert!(f.engine.query_cache().find_for_query(Some(&dune)).await.unwrap().is_some());

        f.engine.pull(None, &options).await.unwrap();
        assert!(f.engine.query_cache().find_for_query(Some(&dune)).await.unwrap().is_none());
        assert!(f.engine.query_cache().find_for_query(None).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn invalid_query_fails_before_io() {
        let f = fixture();
        let query = Query::from_filter(json!({"$where": "1"}).as_object().unwrap().clone());
        let result = f.engine.pull(Some(&query), &SyncOptions::default()).await;
        assert!(matches!(result, Err(SyncError::Validation(_))));
        assert_eq!(f.transport.request_count(), 0);
    }
}
