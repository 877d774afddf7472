//! Transport layer abstraction for remote store requests.

use crate::error::SyncResult;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Path prefix of every collection endpoint.
pub const APPDATA_PREFIX: &str = "/appdata";

/// HTTP method of a remote request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// Read.
    Get,
    /// Create, or a read with a body (group).
    Post,
    /// Replace.
    Put,
    /// Remove.
    Delete,
}

impl Method {
    /// Returns the method name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A collection endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint<'a> {
    /// `/appdata/<collection>`
    Collection(&'a str),
    /// `/appdata/<collection>/<id>`
    Entity(&'a str, &'a str),
    /// `/appdata/<collection>/_count`
    Count(&'a str),
    /// `/appdata/<collection>/_group`
    Group(&'a str),
    /// `/appdata/<collection>/_deltaset`
    DeltaSet(&'a str),
}

impl<'a> Endpoint<'a> {
    /// Returns the request path.
    pub fn path(&self) -> String {
        match self {
            Endpoint::Collection(c) => format!("{APPDATA_PREFIX}/{c}"),
            Endpoint::Entity(c, id) => format!("{APPDATA_PREFIX}/{c}/{id}"),
            Endpoint::Count(c) => format!("{APPDATA_PREFIX}/{c}/_count"),
            Endpoint::Group(c) => format!("{APPDATA_PREFIX}/{c}/_group"),
            Endpoint::DeltaSet(c) => format!("{APPDATA_PREFIX}/{c}/_deltaset"),
        }
    }

    /// Parses a request path.
    pub fn parse(path: &'a str) -> Option<Self> {
        let rest = path.strip_prefix(APPDATA_PREFIX)?.strip_prefix('/')?;
        let mut parts = rest.splitn(2, '/');
        let collection = parts.next().filter(|c| !c.is_empty())?;
        match parts.next() {
            None | Some("") => Some(Endpoint::Collection(collection)),
            Some("_count") => Some(Endpoint::Count(collection)),
            Some("_group") => Some(Endpoint::Group(collection)),
            Some("_deltaset") => Some(Endpoint::DeltaSet(collection)),
            Some(id) if !id.contains('/') => Some(Endpoint::Entity(collection, id)),
            Some(_) => None,
        }
    }

    /// Returns the collection name.
    pub fn collection(&self) -> &'a str {
        match *self {
            Endpoint::Collection(c)
            | Endpoint::Entity(c, _)
            | Endpoint::Count(c)
            | Endpoint::Group(c)
            | Endpoint::DeltaSet(c) => c,
        }
    }

    /// Returns the entity id, for entity endpoints.
    pub fn entity_id(&self) -> Option<&'a str> {
        match *self {
            Endpoint::Entity(_, id) => Some(id),
            _ => None,
        }
    }
}

/// A request to the remote service.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRequest {
    /// HTTP method.
    pub method: Method,
    /// Request path, e.g. `/appdata/books/_count`.
    pub path: String,
    /// Query string parameters.
    pub params: Vec<(String, String)>,
    /// JSON body.
    pub body: Option<Value>,
    /// Request timeout; `None` leaves it to the transport.
    pub timeout: Option<Duration>,
}

impl RemoteRequest {
    /// Creates a request without parameters or body.
    pub fn new(method: Method, endpoint: Endpoint<'_>) -> Self {
        Self {
            method,
            path: endpoint.path(),
            params: Vec::new(),
            body: None,
            timeout: None,
        }
    }

    /// Appends query string parameters.
    #[must_use]
    pub fn with_params(mut self, params: impl IntoIterator<Item = (String, String)>) -> Self {
        self.params.extend(params);
        self
    }

    /// Sets the JSON body.
    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Sets the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the first parameter with the given name.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Returns the parsed endpoint.
    pub fn endpoint(&self) -> Option<Endpoint<'_>> {
        Endpoint::parse(&self.path)
    }
}

/// A raw response from the remote service.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    /// HTTP status code.
    pub status_code: u16,
    /// Response headers with lowercase names.
    pub headers: HashMap<String, String>,
    /// Decoded JSON body; `Null` when empty.
    pub data: Value,
}

impl RawResponse {
    /// Creates a response without headers.
    pub fn new(status_code: u16, data: Value) -> Self {
        Self {
            status_code,
            headers: HashMap::new(),
            data,
        }
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    /// Returns a header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Returns true for 2xx responses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// A transport carries remote store requests to the service.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (HTTP, in-process emulation for testing, etc.).
/// Error statuses are returned as responses; `Err` is reserved for
/// requests that never produced one.
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// Sends a request and returns the raw response.
    async fn send(&self, request: RemoteRequest) -> SyncResult<RawResponse>;
}

#[async_trait]
impl<T: RemoteTransport + ?Sized> RemoteTransport for Arc<T> {
    async fn send(&self, request: RemoteRequest) -> SyncResult<RawResponse> {
        (**self).send(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn endpoint_paths_roundtrip() {
        let endpoints = [
            Endpoint::Collection("books"),
            Endpoint::Entity("books", "b1"),
            Endpoint::Count("books"),
            Endpoint::Group("books"),
            Endpoint::DeltaSet("books"),
        ];
        for endpoint in endpoints {
            let path = endpoint.path();
            assert_eq!(Endpoint::parse(&path), Some(endpoint));
        }
    }

    #[test]
    fn endpoint_parse_rejects_foreign_paths() {
        assert_eq!(Endpoint::parse("/rpc/login"), None);
        assert_eq!(Endpoint::parse("/appdata/"), None);
        assert_eq!(Endpoint::parse("/appdata/books/a/b"), None);
        assert_eq!(
            Endpoint::parse("/appdata/books/"),
            Some(Endpoint::Collection("books"))
        );
    }

    #[test]
    fn request_builder() {
        let request = RemoteRequest::new(Method::Get, Endpoint::DeltaSet("books"))
            .with_params(vec![("since".to_string(), "2024".to_string())])
            .with_timeout(Some(Duration::from_secs(2)));
        assert_eq!(request.path, "/appdata/books/_deltaset");
        assert_eq!(request.param("since"), Some("2024"));
        assert_eq!(request.param("query"), None);
        assert_eq!(request.endpoint().map(|e| e.collection()), Some("books"));
    }

    #[test]
    fn response_headers_are_case_insensitive() {
        let response = RawResponse::new(200, json!([])).with_header("X-Request-Start", "t");
        assert_eq!(response.header("x-request-start"), Some("t"));
        assert_eq!(response.header("X-REQUEST-START"), Some("t"));
        assert!(response.is_success());
        assert!(!RawResponse::new(404, Value::Null).is_success());
    }
}
