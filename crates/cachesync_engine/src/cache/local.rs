use crate::error::{SyncError, SyncResult};
use cachesync_protocol::{Aggregation, Document, Query};
use cachesync_storage::{Scope, StorageAdapter, StorageError};
use serde_json::Value;
use std::sync::Arc;

/// The local copy of one collection.
///
/// Queries and aggregations are validated before the adapter is touched.
#[derive(Clone)]
pub struct LocalCache {
    scope: Scope,
    adapter: Arc<dyn StorageAdapter>,
}

impl LocalCache {
    /// Creates a cache over `scope`.
    pub fn new(adapter: Arc<dyn StorageAdapter>, scope: Scope) -> Self {
        Self { scope, adapter }
    }

    /// Returns the storage scope.
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Returns the documents matching `query`.
    pub async fn find(&self, query: Option<&Query>) -> SyncResult<Vec<Document>> {
        validate(query)?;
        Ok(self.adapter.find(&self.scope, query).await?)
    }

    /// Counts the documents matching `query`, ignoring its pagination.
    pub async fn count(&self, query: Option<&Query>) -> SyncResult<u64> {
        validate(query)?;
        Ok(self.adapter.count(&self.scope, query).await?)
    }

    /// Runs an aggregation over the cached documents.
    pub async fn group(&self, aggregation: &Aggregation) -> SyncResult<Vec<Value>> {
        aggregation.validate()?;
        let docs = self
            .adapter
            .find(&self.scope, aggregation.query.as_ref())
            .await?;
        let unfiltered = Aggregation {
            query: None,
            ..aggregation.clone()
        };
        Ok(unfiltered.apply(docs)?)
    }

    /// Returns one document; absence is not an error.
    pub async fn find_by_id(&self, id: &str) -> SyncResult<Option<Document>> {
        Ok(self.adapter.find_by_id(&self.scope, id).await?)
    }

    /// Upserts one document.
    pub async fn save(&self, doc: Document) -> SyncResult<Document> {
        let saved = self.adapter.save(&self.scope, vec![doc]).await?;
        saved.into_iter().next().ok_or_else(|| {
            SyncError::Storage(StorageError::backend(format!(
                "adapter persisted nothing in {}",
                self.scope
            )))
        })
    }

    /// Upserts several documents.
    pub async fn save_many(&self, docs: Vec<Document>) -> SyncResult<Vec<Document>> {
        if docs.is_empty() {
            return Ok(docs);
        }
        Ok(self.adapter.save(&self.scope, docs).await?)
    }

    /// Removes one document, returning the number removed.
    pub async fn remove_by_id(&self, id: &str) -> SyncResult<u64> {
        Ok(self.adapter.remove_by_id(&self.scope, id).await?)
    }

    /// Removes the documents matching `query`; `None` removes everything.
    pub async fn remove(&self, query: Option<&Query>) -> SyncResult<u64> {
        validate(query)?;
        Ok(self.adapter.remove(&self.scope, query).await?)
    }

    /// Removes every document.
    pub async fn clear(&self) -> SyncResult<u64> {
        Ok(self.adapter.clear(&self.scope).await?)
    }
}

fn validate(query: Option<&Query>) -> SyncResult<()> {
    if let Some(query) = query {
        query.validate()?;
    }
    Ok(())
}
