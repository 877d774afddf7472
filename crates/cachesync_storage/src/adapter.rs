//! Storage adapter trait definition.

use crate::error::StorageResult;
use async_trait::async_trait;
use cachesync_protocol::{Document, Query};
use std::fmt;

/// Tag used when the application does not partition its local data.
pub const DEFAULT_TAG: &str = "cachesync";

/// A `(collection, tag)` partition of local data.
///
/// Tags let several independent local datasets for the same collection
/// coexist, for example one per signed-in identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Scope {
    /// Collection name.
    pub collection: String,
    /// Namespace qualifier.
    pub tag: String,
}

impl Scope {
    /// Creates a scope under the given tag.
    pub fn new(collection: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            tag: tag.into(),
        }
    }

    /// Creates a scope under [`DEFAULT_TAG`].
    pub fn untagged(collection: impl Into<String>) -> Self {
        Self::new(collection, DEFAULT_TAG)
    }

    /// Returns a sibling scope with the same tag, e.g. for bookkeeping
    /// namespaces that must be cleared together with the data.
    #[must_use]
    pub fn sibling(&self, collection: impl Into<String>) -> Self {
        Self::new(collection, self.tag.clone())
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tag, self.collection)
    }
}

/// The physical store behind the local cache.
///
/// Adapters are **document stores** keyed by [`Scope`] and document id.
/// The engine is agnostic to the substrate (memory, SQLite, IndexedDB,
/// files); it only relies on this contract.
///
/// # Invariants
///
/// - `save` upserts by `_id`; every saved document must carry one
/// - `find_by_id` on an absent id returns `Ok(None)`, never an error
/// - each call is atomic with respect to other calls on the same scope;
///   there are no cross-call transactions
/// - adapters must be `Send + Sync`
///
/// # Implementors
///
/// - [`super::InMemoryAdapter`] - For testing and ephemeral caches
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Returns the documents of `scope` matching `query`.
    ///
    /// `None` returns every document.
    async fn find(&self, scope: &Scope, query: Option<&Query>) -> StorageResult<Vec<Document>>;

    /// Counts the documents of `scope` matching `query`, ignoring its
    /// pagination.
    async fn count(&self, scope: &Scope, query: Option<&Query>) -> StorageResult<u64> {
        let unpaginated = query.map(|q| Query {
            skip: 0,
            limit: None,
            ..q.clone()
        });
        Ok(self.find(scope, unpaginated.as_ref()).await?.len() as u64)
    }

    /// Returns the document with the given id.
    async fn find_by_id(&self, scope: &Scope, id: &str) -> StorageResult<Option<Document>>;

    /// Upserts documents by id, returning them as persisted.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::MissingId`] if any document lacks an
    /// id; in that case nothing is written.
    async fn save(&self, scope: &Scope, docs: Vec<Document>) -> StorageResult<Vec<Document>>;

    /// Removes one document, returning the number removed (0 or 1).
    async fn remove_by_id(&self, scope: &Scope, id: &str) -> StorageResult<u64>;

    /// Removes the documents matching `query`, returning the number removed.
    async fn remove(&self, scope: &Scope, query: Option<&Query>) -> StorageResult<u64>;

    /// Removes every document of `scope`, returning the number removed.
    async fn clear(&self, scope: &Scope) -> StorageResult<u64>;
}
