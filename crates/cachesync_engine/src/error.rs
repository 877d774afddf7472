//! Error types for the sync engine.

use cachesync_protocol::{ProtocolError, RemoteErrorKind, ServerErrorBody};
use cachesync_storage::StorageError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during cache and sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Malformed query or aggregation; raised before any I/O.
    #[error("validation error: {0}")]
    Validation(String),

    /// A sync precondition was not met (e.g. a mutation without an id).
    #[error("sync error: {0}")]
    Sync(String),

    /// Another push is running for the same collection.
    #[error("push already in progress for collection {collection}")]
    PushInProgress {
        /// Collection name.
        collection: String,
    },

    /// A read would race ahead of the unflushed write queue.
    #[error(
        "there are {count} entities in collection {collection} that need to be pushed \
         to the backend; push them before reading from the backend"
    )]
    PendingSyncItems {
        /// Collection name.
        collection: String,
        /// Number of pending entries.
        count: u64,
    },

    /// An argument is unusable, e.g. updating a document without an id.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The remote entity or collection does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Delta-set is not enabled for the collection on the backend.
    #[error("delta-set is not configured: {0}")]
    MissingConfiguration(String),

    /// A request parameter, typically the delta-set `since`, is out of range.
    #[error("parameter value out of range: {0}")]
    ParameterValueOutOfRange(String),

    /// Any other error reported by the backend.
    #[error("server error {status} {name}: {description}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Backend error name.
        name: String,
        /// Backend description.
        description: String,
        /// Backend debug detail.
        debug: Option<String>,
    },

    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// Timeout.
    #[error("operation timed out")]
    Timeout,

    /// Local storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Malformed payload.
    #[error("protocol error: {0}")]
    Protocol(ProtocolError),
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Decodes a backend error response.
    ///
    /// This is the only place that inspects error payloads; everything
    /// downstream matches on the variant.
    pub fn from_server(status: u16, body: ServerErrorBody) -> Self {
        let description = body
            .description
            .clone()
            .unwrap_or_else(|| body.error.clone());
        match body.kind(status) {
            RemoteErrorKind::NotFound => Self::NotFound(description),
            RemoteErrorKind::MissingConfiguration => Self::MissingConfiguration(description),
            RemoteErrorKind::ParameterValueOutOfRange => {
                Self::ParameterValueOutOfRange(body.debug.unwrap_or(description))
            }
            RemoteErrorKind::BadRequest | RemoteErrorKind::Other => Self::Server {
                status,
                name: body.error,
                description,
                debug: body.debug,
            },
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout => true,
            SyncError::Server { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Returns true for remote not-found errors.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::NotFound(_))
    }

    /// Returns true if a delta-set request should fall back to a full read.
    pub fn is_delta_set_fallback(&self) -> bool {
        matches!(
            self,
            SyncError::MissingConfiguration(_) | SyncError::ParameterValueOutOfRange(_)
        )
    }
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        if err.is_validation() {
            SyncError::Validation(err.to_string())
        } else {
            SyncError::Protocol(err)
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Protocol(ProtocolError::Json(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::transport_retryable("connection lost").is_retryable());
        assert!(!SyncError::transport_fatal("invalid certificate").is_retryable());
        assert!(SyncError::Timeout.is_retryable());
        assert!(!SyncError::NotFound("x".into()).is_retryable());
        assert!(SyncError::from_server(503, ServerErrorBody::new("Unavailable")).is_retryable());
    }

    #[test]
    fn server_bodies_decode_to_variants() {
        let err = SyncError::from_server(404, ServerErrorBody::new("EntityNotFound"));
        assert!(err.is_not_found());

        let err = SyncError::from_server(403, ServerErrorBody::new("MissingConfiguration"));
        assert!(err.is_delta_set_fallback());

        let err = SyncError::from_server(
            400,
            ServerErrorBody::new("BadRequest")
                .with_debug("The 'since' timestamp must be within the past 7 days."),
        );
        assert!(matches!(err, SyncError::ParameterValueOutOfRange(ref d) if d.contains("7 days")));

        let err = SyncError::from_server(
            401,
            ServerErrorBody::new("InvalidCredentials").with_description("bad token"),
        );
        assert!(matches!(
            err,
            SyncError::Server { status: 401, ref description, .. } if description == "bad token"
        ));
        assert!(!err.is_delta_set_fallback());
    }

    #[test]
    fn protocol_validation_maps_to_validation() {
        let err: SyncError = ProtocolError::invalid_query("bad").into();
        assert!(matches!(err, SyncError::Validation(_)));

        let err: SyncError = ProtocolError::invalid_document("bad").into();
        assert!(matches!(err, SyncError::Protocol(_)));
    }

    #[test]
    fn error_display() {
        let err = SyncError::PendingSyncItems {
            collection: "books".into(),
            count: 3,
        };
        assert!(err.to_string().contains("3 entities"));
        assert!(err.to_string().contains("push"));

        let err = SyncError::PushInProgress {
            collection: "books".into(),
        };
        assert_eq!(err.to_string(), "push already in progress for collection books");
    }
}
