//! HTTP transport implementation.
//!
//! This module provides an HTTP-based transport for the remote store.
//! The actual HTTP client is abstracted via a trait to allow different
//! implementations (reqwest, hyper, etc.).

use crate::error::{SyncError, SyncResult};
use crate::transport::{Method, RawResponse, RemoteRequest, RemoteTransport};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use url::Url;

/// A fully resolved HTTP request.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    /// HTTP method.
    pub method: Method,
    /// Absolute URL including the query string.
    pub url: String,
    /// Request headers.
    pub headers: Vec<(String, String)>,
    /// Encoded JSON body.
    pub body: Option<Vec<u8>>,
    /// Request timeout.
    pub timeout: Option<Duration>,
}

/// An HTTP response as returned by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: Vec<(String, String)>,
    /// Raw body.
    pub body: Vec<u8>,
}

/// Failure of an HTTP client to produce a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpClientError {
    /// The request exceeded its timeout.
    Timeout,
    /// Connection-level failure.
    Connection(String),
}

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual HTTP transport.
/// This allows using different HTTP libraries (reqwest, hyper, ureq, etc.).
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Executes a request.
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, HttpClientError>;
}

/// HTTP-based remote transport.
///
/// Uses JSON encoding for request/response bodies.
pub struct HttpTransport<C: HttpClient> {
    /// Base URL of the service (e.g., "https://api.example.com").
    base_url: String,
    /// Headers sent with every request, e.g. authorization.
    default_headers: Vec<(String, String)>,
    /// HTTP client implementation.
    client: C,
    /// Connection state.
    connected: AtomicBool,
    /// Last error message.
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a new HTTP transport.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into(),
            default_headers: vec![("content-type".into(), "application/json".into())],
            client,
            connected: AtomicBool::new(true),
            last_error: RwLock::new(None),
        }
    }

    /// Adds a header sent with every request.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.push((name.into(), value.into()));
        self
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Returns true unless the last request failed to reach the service.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn set_error(&self, err: &str) {
        *self.last_error.write() = Some(err.to_string());
    }

    fn clear_error(&self) {
        *self.last_error.write() = None;
    }

    fn build(&self, request: RemoteRequest) -> SyncResult<HttpRequest> {
        let base = self.base_url.trim_end_matches('/');
        let mut url = Url::parse(&format!("{base}{}", request.path))
            .map_err(|e| SyncError::transport_fatal(format!("invalid url: {e}")))?;
        if !request.params.is_empty() {
            url.query_pairs_mut().extend_pairs(request.params.iter());
        }

        let body = request
            .body
            .as_ref()
            .map(serde_json::to_vec)
            .transpose()?;

        Ok(HttpRequest {
            method: request.method,
            url: url.into(),
            headers: self.default_headers.clone(),
            body,
            timeout: request.timeout,
        })
    }
}

#[async_trait]
impl<C: HttpClient> RemoteTransport for HttpTransport<C> {
    async fn send(&self, request: RemoteRequest) -> SyncResult<RawResponse> {
        let request = self.build(request)?;
        let response = match self.client.execute(request).await {
            Ok(response) => response,
            Err(HttpClientError::Timeout) => {
                self.set_error("request timed out");
                return Err(SyncError::Timeout);
            }
            Err(HttpClientError::Connection(e)) => {
                self.set_error(&e);
                self.connected.store(false, Ordering::SeqCst);
                return Err(SyncError::transport_retryable(e));
            }
        };

        self.connected.store(true, Ordering::SeqCst);
        self.clear_error();

        let data = if response.body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&response.body)?
        };
        let mut raw = RawResponse::new(response.status, data);
        for (name, value) in response.headers {
            raw = raw.with_header(name, value);
        }
        Ok(raw)
    }
}

/// An HTTP client that answers from an in-process [`RemoteTransport`].
///
/// Useful for exercising [`HttpTransport`] encoding without actual
/// network overhead.
pub struct LoopbackClient<T: RemoteTransport> {
    backend: T,
}

impl<T: RemoteTransport> LoopbackClient<T> {
    /// Creates a new loopback client connected to the given backend.
    pub fn new(backend: T) -> Self {
        Self { backend }
    }

    /// Returns the backend.
    pub fn backend(&self) -> &T {
        &self.backend
    }
}

#[async_trait]
impl<T: RemoteTransport> HttpClient for LoopbackClient<T> {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, HttpClientError> {
        let url = Url::parse(&request.url).map_err(|e| HttpClientError::Connection(e.to_string()))?;
        let params = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        let body = request
            .body
            .as_deref()
            .map(serde_json::from_slice)
            .transpose()
            .map_err(|e| HttpClientError::Connection(format!("malformed body: {e}")))?;

        let remote = RemoteRequest {
            method: request.method,
            path: url.path().to_string(),
            params,
            body,
            timeout: request.timeout,
        };
        let response = match self.backend.send(remote).await {
            Ok(response) => response,
            Err(SyncError::Timeout) => return Err(HttpClientError::Timeout),
            Err(e) => return Err(HttpClientError::Connection(e.to_string())),
        };

        let body = match response.data {
            Value::Null => Vec::new(),
            data => serde_json::to_vec(&data)
                .map_err(|e| HttpClientError::Connection(e.to_string()))?,
        };
        Ok(HttpResponse {
            status: response.status_code,
            headers: response.headers.into_iter().collect(),
            body,
        })
    }
}
