use crate::cache::LocalCache;
use crate::error::{SyncError, SyncResult};
use cachesync_protocol::{Document, Query, SyncEntry, SyncOperation};
use cachesync_storage::{Scope, StorageAdapter};
use std::sync::Arc;
use tracing::debug;

/// Namespace prefix of the sync queue.
pub const SYNC_QUEUE_PREFIX: &str = "__sync_queue";

/// Pending mutations of one collection, at most one per document.
///
/// Entries are stored under the document id, so recording a new
/// mutation replaces whatever was pending for that document.
#[derive(Clone)]
pub struct SyncQueue {
    collection: String,
    queue: LocalCache,
}

impl SyncQueue {
    /// Creates the sync queue belonging to the collection in `scope`.
    pub fn new(adapter: Arc<dyn StorageAdapter>, scope: &Scope) -> Self {
        let namespace = scope.sibling(format!("{SYNC_QUEUE_PREFIX}.{}", scope.collection));
        Self {
            collection: scope.collection.clone(),
            queue: LocalCache::new(adapter, namespace),
        }
    }

    /// Records creations.
    pub async fn add_create_sync_event(&self, docs: &[Document]) -> SyncResult<Vec<SyncEntry>> {
        self.add_sync_event(SyncOperation::Create, docs).await
    }

    /// Records updates.
    pub async fn add_update_sync_event(&self, docs: &[Document]) -> SyncResult<Vec<SyncEntry>> {
        self.add_sync_event(SyncOperation::Update, docs).await
    }

    /// Records deletions.
    pub async fn add_delete_sync_event(&self, docs: &[Document]) -> SyncResult<Vec<SyncEntry>> {
        self.add_sync_event(SyncOperation::Delete, docs).await
    }

    /// Records `operation` for every document, replacing earlier entries.
    ///
    /// Deleting a document that only ever existed locally leaves no entry
    /// at all: its pending creation is dropped and nothing is sent to the
    /// backend. The document itself is left to the caller.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Sync`] if any document lacks an id; nothing is
    /// recorded in that case.
    pub async fn add_sync_event(
        &self,
        operation: SyncOperation,
        docs: &[Document],
    ) -> SyncResult<Vec<SyncEntry>> {
        let ids = docs
            .iter()
            .map(|doc| {
                doc.id().map(str::to_string).ok_or_else(|| {
                    SyncError::Sync(format!(
                        "cannot record a {operation} for a document without an id"
                    ))
                })
            })
            .collect::<SyncResult<Vec<String>>>()?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        self.queue.remove(Some(&Query::by_ids(ids.clone()))).await?;

        let mut entries = Vec::with_capacity(docs.len());
        let mut local_only = Vec::new();
        for (doc, id) in docs.iter().zip(ids) {
            if operation == SyncOperation::Delete && doc.is_local() {
                local_only.push(id);
            } else {
                entries.push(SyncEntry::new(self.collection.clone(), id, operation));
            }
        }

        if !local_only.is_empty() {
            debug!(
                collection = %self.collection,
                count = local_only.len(),
                "dropping never-synced documents without queueing deletes"
            );
        }

        let stored = entries
            .iter()
            .map(SyncEntry::to_document)
            .collect::<Result<Vec<_>, _>>()?;
        self.queue.save_many(stored).await?;
        Ok(entries)
    }

    /// Returns the entries matching `query`.
    pub async fn find(&self, query: Option<&Query>) -> SyncResult<Vec<SyncEntry>> {
        self.queue
            .find(query)
            .await?
            .iter()
            .map(|doc| SyncEntry::from_document(doc).map_err(SyncError::from))
            .collect()
    }

    /// Counts the entries matching `query`.
    pub async fn count(&self, query: Option<&Query>) -> SyncResult<u64> {
        self.queue.count(query).await
    }

    /// Returns the entry for one document.
    pub async fn find_by_id(&self, id: &str) -> SyncResult<Option<SyncEntry>> {
        match self.queue.find_by_id(id).await? {
            Some(doc) => Ok(Some(SyncEntry::from_document(&doc)?)),
            None => Ok(None),
        }
    }

    /// Removes the entry for one document.
    pub async fn remove_by_id(&self, id: &str) -> SyncResult<u64> {
        self.queue.remove_by_id(id).await
    }

    /// Removes the entries matching `query`; `None` removes all of them.
    pub async fn remove(&self, query: Option<&Query>) -> SyncResult<u64> {
        self.queue.remove(query).await
    }

    /// Removes every entry.
    pub async fn clear(&self) -> SyncResult<u64> {
        self.queue.clear().await
    }
}
