//! Wire messages exchanged with the remote service.

use crate::document::Document;
use crate::error::ProtocolResult;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Response header carrying the server-side request start time.
pub const REQUEST_START_HEADER: &str = "x-request-start";

/// Fragment the backend puts in the `debug` text of an expired delta-set
/// `since` timestamp.
const SINCE_OUT_OF_RANGE_HINT: &str = "must be within the past";

/// Formats a timestamp the way the backend reports it.
pub fn format_timestamp(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parses a backend timestamp.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// A query cache record: when a canonical query was last read remotely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryCacheEntry {
    /// Storage key; the serialized query.
    #[serde(rename = "_id")]
    pub key: String,
    /// Collection the query ran against.
    #[serde(rename = "collectionName")]
    pub collection_name: String,
    /// Serialized query.
    pub query: String,
    /// Server-reported start time of the last successful read.
    #[serde(rename = "lastRequest", default, skip_serializing_if = "Option::is_none")]
    pub last_request: Option<String>,
}

impl QueryCacheEntry {
    /// Creates an entry for a serialized query.
    pub fn new(
        collection_name: impl Into<String>,
        serialized_query: impl Into<String>,
        last_request: Option<String>,
    ) -> Self {
        let query = serialized_query.into();
        Self {
            key: query.clone(),
            collection_name: collection_name.into(),
            query,
            last_request,
        }
    }

    /// Converts the entry into a storable document.
    pub fn to_document(&self) -> ProtocolResult<Document> {
        Document::from_serializable(self)
    }

    /// Reads an entry back from a stored document.
    pub fn from_document(doc: &Document) -> ProtocolResult<Self> {
        doc.to_deserializable()
    }
}

/// A deleted-document marker in a delta-set response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedDocument {
    /// Id of the deleted document.
    #[serde(rename = "_id")]
    pub id: String,
}

/// Body of a delta-set response.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DeltaSet {
    /// Documents created or modified since the requested timestamp.
    #[serde(default)]
    pub changed: Vec<Document>,
    /// Documents deleted since the requested timestamp.
    #[serde(default)]
    pub deleted: Vec<DeletedDocument>,
}

/// Error body returned by the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ServerErrorBody {
    /// Error name, e.g. `EntityNotFound`.
    #[serde(default)]
    pub error: String,
    /// Human readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Debug detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug: Option<String>,
}

impl ServerErrorBody {
    /// Creates a body with the given error name.
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            description: None,
            debug: None,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the debug detail.
    #[must_use]
    pub fn with_debug(mut self, debug: impl Into<String>) -> Self {
        self.debug = Some(debug.into());
        self
    }

    /// Classifies the error.
    pub fn kind(&self, status: u16) -> RemoteErrorKind {
        match self.error.as_str() {
            "EntityNotFound" | "CollectionNotFound" | "AppNotFound" | "BlobNotFound" => {
                RemoteErrorKind::NotFound
            }
            "MissingConfiguration" => RemoteErrorKind::MissingConfiguration,
            "ParameterValueOutOfRange" => RemoteErrorKind::ParameterValueOutOfRange,
            "BadRequest" if self.mentions_since_window() => {
                RemoteErrorKind::ParameterValueOutOfRange
            }
            "BadRequest" => RemoteErrorKind::BadRequest,
            _ if status == 404 => RemoteErrorKind::NotFound,
            _ if status == 400 => RemoteErrorKind::BadRequest,
            _ => RemoteErrorKind::Other,
        }
    }

    fn mentions_since_window(&self) -> bool {
        self.debug
            .as_deref()
            .map(|d| d.contains(SINCE_OUT_OF_RANGE_HINT))
            .unwrap_or(false)
    }
}

/// Classification of a remote error body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    /// The entity or collection does not exist.
    NotFound,
    /// Delta-set is not enabled for the collection.
    MissingConfiguration,
    /// A parameter, typically the delta-set `since`, is out of range.
    ParameterValueOutOfRange,
    /// Any other malformed request.
    BadRequest,
    /// Everything else.
    Other,
}
