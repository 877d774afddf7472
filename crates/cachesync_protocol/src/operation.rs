//! Pending mutation records.

use crate::document::{Document, ID_FIELD};
use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a queued mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncOperation {
    /// Document was created locally.
    #[serde(rename = "POST")]
    Create,
    /// Document was updated locally.
    #[serde(rename = "PUT")]
    Update,
    /// Document was deleted locally.
    #[serde(rename = "DELETE")]
    Delete,
}

impl SyncOperation {
    /// Returns the HTTP-style verb stored in the queue.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOperation::Create => "POST",
            SyncOperation::Update => "PUT",
            SyncOperation::Delete => "DELETE",
        }
    }
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State block of a [`SyncEntry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    /// The queued operation.
    pub operation: SyncOperation,
}

/// A queued, not-yet-committed mutation for one document.
///
/// The entry's own `_id` is the document id, so a queue keyed by `_id`
/// holds at most one entry per document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncEntry {
    /// Queue key; equal to `entity_id`.
    #[serde(rename = "_id")]
    pub id: String,
    /// Id of the document this entry refers to.
    #[serde(rename = "entityId")]
    pub entity_id: String,
    /// Collection of the document.
    pub collection: String,
    /// Queued operation.
    pub state: SyncState,
}

impl SyncEntry {
    /// Creates an entry for `entity_id`.
    pub fn new(
        collection: impl Into<String>,
        entity_id: impl Into<String>,
        operation: SyncOperation,
    ) -> Self {
        let entity_id = entity_id.into();
        Self {
            id: entity_id.clone(),
            entity_id,
            collection: collection.into(),
            state: SyncState { operation },
        }
    }

    /// Returns the queued operation.
    pub fn operation(&self) -> SyncOperation {
        self.state.operation
    }

    /// Converts the entry into a storable document.
    pub fn to_document(&self) -> ProtocolResult<Document> {
        Document::from_serializable(self)
    }

    /// Reads an entry back from a stored document.
    pub fn from_document(doc: &Document) -> ProtocolResult<Self> {
        if doc.get(ID_FIELD).is_none() {
            return Err(ProtocolError::invalid_document("sync entry without _id"));
        }
        doc.to_deserializable()
    }
}
