//! Error types for storage operations.

use cachesync_protocol::ProtocolError;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A document without an `_id` was handed to the adapter.
    #[error("document in {scope} has no _id")]
    MissingId {
        /// Scope the document was written to.
        scope: String,
    },

    /// A stored record could not be converted.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The physical substrate failed.
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    /// Creates a backend error.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages() {
        assert_eq!(
            StorageError::backend("disk full").to_string(),
            "storage backend error: disk full"
        );
        let missing = StorageError::MissingId {
            scope: "cachesync/books".into(),
        };
        assert_eq!(missing.to_string(), "document in cachesync/books has no _id");
    }
}
