//! Error types for protocol values.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while building, validating or converting protocol values.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A query or aggregation is malformed.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// An aggregation cannot be evaluated over the given documents.
    #[error("invalid aggregation: {0}")]
    InvalidAggregation(String),

    /// A value does not have the shape of a document.
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    /// JSON conversion failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProtocolError {
    /// Creates an invalid-query error.
    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::InvalidQuery(message.into())
    }

    /// Creates an invalid-aggregation error.
    pub fn invalid_aggregation(message: impl Into<String>) -> Self {
        Self::InvalidAggregation(message.into())
    }

    /// Creates an invalid-document error.
    pub fn invalid_document(message: impl Into<String>) -> Self {
        Self::InvalidDocument(message.into())
    }

    /// Returns true if this error stems from a malformed query or aggregation.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ProtocolError::InvalidQuery(_) | ProtocolError::InvalidAggregation(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_classification() {
        assert!(ProtocolError::invalid_query("bad").is_validation());
        assert!(ProtocolError::invalid_aggregation("bad").is_validation());
        assert!(!ProtocolError::invalid_document("bad").is_validation());
    }

    #[test]
    fn error_display() {
        let err = ProtocolError::invalid_query("unknown operator $foo");
        assert_eq!(err.to_string(), "invalid query: unknown operator $foo");
    }
}
