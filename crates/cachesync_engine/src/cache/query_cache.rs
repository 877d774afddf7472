use crate::cache::LocalCache;
use crate::error::SyncResult;
use cachesync_protocol::{Query, QueryCacheEntry};
use cachesync_storage::{Scope, StorageAdapter};
use std::sync::Arc;

/// Namespace prefix of the query cache.
pub const QUERY_CACHE_PREFIX: &str = "__query_cache";

/// Remembers when each canonical query was last read from the backend.
///
/// The recorded server time is the `since` of the next delta-set request
/// for that query. Paginated queries are never recorded.
#[derive(Clone)]
pub struct QueryCache {
    collection: String,
    cache: LocalCache,
}

impl QueryCache {
    /// Creates the query cache belonging to the collection in `scope`.
    pub fn new(adapter: Arc<dyn StorageAdapter>, scope: &Scope) -> Self {
        let namespace = scope.sibling(format!("{QUERY_CACHE_PREFIX}.{}", scope.collection));
        Self {
            collection: scope.collection.clone(),
            cache: LocalCache::new(adapter, namespace),
        }
    }

    /// Returns the entry stored under `key`.
    pub async fn find_by_key(&self, key: &str) -> SyncResult<Option<QueryCacheEntry>> {
        match self.cache.find_by_id(key).await? {
            Some(doc) => Ok(Some(QueryCacheEntry::from_document(&doc)?)),
            None => Ok(None),
        }
    }

    /// Returns the entry for `query`; `None` is the match-everything query.
    pub async fn find_for_query(
        &self,
        query: Option<&Query>,
    ) -> SyncResult<Option<QueryCacheEntry>> {
        match cache_key(query) {
            Some(key) => self.find_by_key(&key).await,
            None => Ok(None),
        }
    }

    /// Records the server time of a read of `query`.
    ///
    /// Returns `None` without writing anything when the query is paginated.
    pub async fn save(
        &self,
        query: Option<&Query>,
        last_request: Option<String>,
    ) -> SyncResult<Option<QueryCacheEntry>> {
        let Some(key) = cache_key(query) else {
            return Ok(None);
        };
        let entry = QueryCacheEntry::new(self.collection.clone(), key, last_request);
        self.cache.save(entry.to_document()?).await?;
        Ok(Some(entry))
    }

    /// Removes every entry.
    pub async fn clear(&self) -> SyncResult<u64> {
        self.cache.clear().await
    }
}

fn cache_key(query: Option<&Query>) -> Option<String> {
    match query {
        Some(query) => query.cache_key(),
        None => Some(Query::default_cache_key()),
    }
}
