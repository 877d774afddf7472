//! In-memory storage adapter for testing.

use crate::adapter::{Scope, StorageAdapter};
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use cachesync_protocol::{Document, Query};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

type Table = BTreeMap<String, Document>;

/// An in-memory storage adapter.
///
/// This adapter keeps every scope in a map keyed by document id and is
/// suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral caches that don't need persistence
///
/// Unsorted reads return documents in id order.
///
/// # Thread Safety
///
/// This adapter is thread-safe and can be shared across tasks.
///
/// # Example
///
/// ```rust
/// use cachesync_storage::{InMemoryAdapter, Scope, StorageAdapter};
/// use cachesync_protocol::Document;
///
/// # tokio_test_block_on(async {
/// let adapter = InMemoryAdapter::new();
/// let scope = Scope::untagged("books");
/// adapter.save(&scope, vec![Document::new().with_id("b1")]).await.unwrap();
/// assert_eq!(adapter.count(&scope, None).await.unwrap(), 1);
/// # });
/// # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
/// # }
/// ```
#[derive(Debug, Default)]
pub struct InMemoryAdapter {
    tables: RwLock<HashMap<Scope, Table>>,
}

impl InMemoryAdapter {
    /// Creates a new empty adapter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of documents stored in `scope`.
    #[must_use]
    pub fn len(&self, scope: &Scope) -> usize {
        self.tables.read().get(scope).map(Table::len).unwrap_or(0)
    }

    /// Returns true if `scope` holds no documents.
    #[must_use]
    pub fn is_empty(&self, scope: &Scope) -> bool {
        self.len(scope) == 0
    }

    /// Returns every scope that currently holds documents.
    #[must_use]
    pub fn scopes(&self) -> Vec<Scope> {
        let mut scopes: Vec<Scope> = self
            .tables
            .read()
            .iter()
            .filter(|(_, table)| !table.is_empty())
            .map(|(scope, _)| scope.clone())
            .collect();
        scopes.sort();
        scopes
    }

    fn snapshot(&self, scope: &Scope) -> Vec<Document> {
        self.tables
            .read()
            .get(scope)
            .map(|table| table.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl StorageAdapter for InMemoryAdapter {
    async fn find(&self, scope: &Scope, query: Option<&Query>) -> StorageResult<Vec<Document>> {
        let docs = self.snapshot(scope);
        Ok(match query {
            Some(query) => query.process(docs),
            None => docs,
        })
    }

    async fn find_by_id(&self, scope: &Scope, id: &str) -> StorageResult<Option<Document>> {
        Ok(self
            .tables
            .read()
            .get(scope)
            .and_then(|table| table.get(id))
            .cloned())
    }

    async fn save(&self, scope: &Scope, docs: Vec<Document>) -> StorageResult<Vec<Document>> {
        if docs.iter().any(|d| d.id().is_none()) {
            return Err(StorageError::MissingId {
                scope: scope.to_string(),
            });
        }

        let mut tables = self.tables.write();
        let table = tables.entry(scope.clone()).or_default();
        for doc in &docs {
            if let Some(id) = doc.id() {
                table.insert(id.to_string(), doc.clone());
            }
        }
        Ok(docs)
    }

    async fn remove_by_id(&self, scope: &Scope, id: &str) -> StorageResult<u64> {
        let mut tables = self.tables.write();
        let removed = tables
            .get_mut(scope)
            .and_then(|table| table.remove(id))
            .is_some();
        Ok(u64::from(removed))
    }

    async fn remove(&self, scope: &Scope, query: Option<&Query>) -> StorageResult<u64> {
        let Some(query) = query else {
            return self.clear(scope).await;
        };

        let doomed: Vec<String> = query
            .process(self.snapshot(scope))
            .iter()
            .filter_map(|d| d.id().map(str::to_string))
            .collect();

        let mut tables = self.tables.write();
        let Some(table) = tables.get_mut(scope) else {
            return Ok(0);
        };
        let mut removed = 0;
        for id in doomed {
            if table.remove(&id).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn clear(&self, scope: &Scope) -> StorageResult<u64> {
        let removed = self
            .tables
            .write()
            .remove(scope)
            .map(|table| table.len() as u64)
            .unwrap_or(0);
        Ok(removed)
    }
}
