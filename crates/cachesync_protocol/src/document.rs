//! Documents and their metadata block.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field holding the document identifier.
pub const ID_FIELD: &str = "_id";
/// Field holding the metadata block.
pub const METADATA_FIELD: &str = "_kmd";
/// Field holding the access-control stub.
pub const ACL_FIELD: &str = "_acl";

/// Length of generated local identifiers, in hex characters.
const LOCAL_ID_LEN: usize = 24;

/// A JSON document with a unique `_id`.
///
/// Documents are arbitrary JSON objects. The engine only interprets three
/// reserved fields:
///
/// - `_id`: identity within a `(collection, tag)` scope
/// - `_kmd`: [`Metadata`] (last-modified time, creation time, `local` flag)
/// - `_acl`: [`Acl`] stub, carried through untouched
///
/// # Example
///
/// ```rust
/// use cachesync_protocol::Document;
/// use serde_json::json;
///
/// let doc = Document::from_value(json!({"_id": "b1", "title": "Dune"})).unwrap();
/// assert_eq!(doc.id(), Some("b1"));
/// assert!(!doc.is_local());
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(Map<String, Value>);

impl Document {
    /// Creates an empty document with no id.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a document from a JSON value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a JSON object.
    pub fn from_value(value: Value) -> ProtocolResult<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(ProtocolError::invalid_document(format!(
                "expected object, found {}",
                json_type_name(&other)
            ))),
        }
    }

    /// Serializes any value into a document.
    pub fn from_serializable<T: Serialize>(value: &T) -> ProtocolResult<Self> {
        Self::from_value(serde_json::to_value(value)?)
    }

    /// Deserializes this document into a typed value.
    pub fn to_deserializable<T: for<'de> Deserialize<'de>>(&self) -> ProtocolResult<T> {
        Ok(serde_json::from_value(Value::Object(self.0.clone()))?)
    }

    /// Returns the document as a JSON value.
    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Returns the underlying JSON map.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Returns the document id, if it has a string id.
    pub fn id(&self) -> Option<&str> {
        self.0.get(ID_FIELD).and_then(Value::as_str)
    }

    /// Sets the document id.
    pub fn set_id(&mut self, id: impl Into<String>) {
        self.0.insert(ID_FIELD.to_string(), Value::String(id.into()));
    }

    /// Builder-style variant of [`Document::set_id`].
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.set_id(id);
        self
    }

    /// Removes the id, returning it.
    pub fn remove_id(&mut self) -> Option<String> {
        match self.0.remove(ID_FIELD) {
            Some(Value::String(id)) => Some(id),
            _ => None,
        }
    }

    /// Returns a top-level field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Resolves a dotted field path such as `author.name`.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let first = parts.next()?;
        let mut current = self.0.get(first)?;
        for part in parts {
            current = current.as_object()?.get(part)?;
        }
        Some(current)
    }

    /// Inserts a top-level field, returning the previous value.
    pub fn insert(&mut self, field: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(field.into(), value)
    }

    /// Builder-style variant of [`Document::insert`].
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: Value) -> Self {
        self.insert(field, value);
        self
    }

    /// Removes a top-level field.
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    /// Returns the parsed metadata block, if present and well formed.
    pub fn metadata(&self) -> Option<Metadata> {
        self.0
            .get(METADATA_FIELD)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Replaces the metadata block.
    pub fn set_metadata(&mut self, metadata: &Metadata) {
        // Metadata only holds strings and a bool, serialization cannot fail.
        if let Ok(value) = serde_json::to_value(metadata) {
            self.0.insert(METADATA_FIELD.to_string(), value);
        }
    }

    /// Returns true if the document was created offline and never synced.
    pub fn is_local(&self) -> bool {
        self.metadata().map(|m| m.local).unwrap_or(false)
    }

    /// Flags the document as created offline.
    pub fn mark_local(&mut self) {
        let mut metadata = self.metadata().unwrap_or_default();
        metadata.local = true;
        self.set_metadata(&metadata);
    }

    /// Clears the `local` flag, dropping the metadata block if it becomes empty.
    pub fn clear_local(&mut self) {
        if let Some(mut metadata) = self.metadata() {
            metadata.local = false;
            if metadata.is_empty() {
                self.0.remove(METADATA_FIELD);
            } else {
                self.set_metadata(&metadata);
            }
        }
    }

    /// Returns the last-modified timestamp from the metadata block.
    pub fn last_modified(&self) -> Option<String> {
        self.metadata().and_then(|m| m.lmt)
    }

    /// Returns the access-control stub, if present.
    pub fn acl(&self) -> Option<Acl> {
        self.0
            .get(ACL_FIELD)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Replaces the access-control stub.
    pub fn set_acl(&mut self, acl: &Acl) {
        if let Ok(value) = serde_json::to_value(acl) {
            self.0.insert(ACL_FIELD.to_string(), value);
        }
    }
}

impl From<Map<String, Value>> for Document {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<Value> for Document {
    type Error = ProtocolError;

    fn try_from(value: Value) -> ProtocolResult<Self> {
        Self::from_value(value)
    }
}

impl From<Document> for Value {
    fn from(doc: Document) -> Self {
        doc.into_value()
    }
}

/// The `_kmd` metadata block of a document.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Metadata {
    /// Last-modified time as reported by the backend (RFC 3339).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lmt: Option<String>,
    /// Entity creation time as reported by the backend (RFC 3339).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ect: Option<String>,
    /// Created offline; the backend has never seen this id.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub local: bool,
}

impl Metadata {
    /// Returns true if no field is set.
    pub fn is_empty(&self) -> bool {
        self.lmt.is_none() && self.ect.is_none() && !self.local
    }
}

/// The `_acl` access-control stub of a document.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Acl {
    /// Id of the user that created the document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator: Option<String>,
    /// Globally readable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gr: Option<bool>,
    /// Globally writable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gw: Option<bool>,
}

/// Generates an identifier for a document created offline.
///
/// Local ids are 24 lowercase hex characters, the same shape the backend
/// assigns, so they can be used as keys everywhere a real id is expected.
pub fn generate_local_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(LOCAL_ID_LEN);
    id
}

/// Returns a short name for a JSON value's type.
pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_value_rejects_non_objects() {
        assert!(Document::from_value(json!([1, 2])).is_err());
        assert!(Document::from_value(json!("text")).is_err());
        assert!(Document::from_value(json!({})).is_ok());
    }

    #[test]
    fn id_accessors() {
        let mut doc = Document::new().with_id("abc");
        assert_eq!(doc.id(), Some("abc"));

        assert_eq!(doc.remove_id().as_deref(), Some("abc"));
        assert_eq!(doc.id(), None);
    }

    #[test]
    fn dotted_lookup() {
        let doc = Document::from_value(json!({
            "_id": "1",
            "author": {"name": "Herbert", "born": 1920}
        }))
        .unwrap();

        assert_eq!(doc.lookup("author.name"), Some(&json!("Herbert")));
        assert_eq!(doc.lookup("author.missing"), None);
        assert_eq!(doc.lookup("_id"), Some(&json!("1")));
    }

    #[test]
    fn local_flag_lifecycle() {
        let mut doc = Document::new().with_id("l1");
        assert!(!doc.is_local());

        doc.mark_local();
        assert!(doc.is_local());
        assert_eq!(doc.get(METADATA_FIELD), Some(&json!({"local": true})));

        doc.clear_local();
        assert!(!doc.is_local());
        assert!(doc.get(METADATA_FIELD).is_none());
    }

    #[test]
    fn clear_local_keeps_other_metadata() {
        let mut doc = Document::from_value(json!({
            "_id": "1",
            "_kmd": {"lmt": "2024-01-01T00:00:00.000Z", "local": true}
        }))
        .unwrap();

        doc.clear_local();
        assert_eq!(
            doc.last_modified().as_deref(),
            Some("2024-01-01T00:00:00.000Z")
        );
        assert!(!doc.is_local());
    }

    #[test]
    fn acl_roundtrip() {
        let mut doc = Document::new();
        doc.set_acl(&Acl {
            creator: Some("user-1".into()),
            ..Acl::default()
        });
        assert_eq!(doc.acl().unwrap().creator.as_deref(), Some("user-1"));
    }

    #[test]
    fn local_ids_have_backend_shape() {
        let id = generate_local_id();
        assert_eq!(id.len(), 24);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, generate_local_id());
    }
}
