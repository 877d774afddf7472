//! Typed access to the remote collection endpoints.

use crate::config::RequestOptions;
use crate::error::{SyncError, SyncResult};
use crate::transport::{Endpoint, Method, RawResponse, RemoteRequest, RemoteTransport};
use cachesync_protocol::{
    Aggregation, DeltaSet, Document, Query, ServerErrorBody, REQUEST_START_HEADER,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

/// A decoded response from the remote service.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteResponse<T> {
    /// HTTP status code.
    pub status_code: u16,
    /// Response headers with lowercase names.
    pub headers: HashMap<String, String>,
    /// Decoded body.
    pub data: T,
}

impl<T> RemoteResponse<T> {
    /// Returns the server-side start time of the request.
    pub fn request_start(&self) -> Option<&str> {
        self.headers.get(REQUEST_START_HEADER).map(String::as_str)
    }

    /// Maps the body, keeping status and headers.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> RemoteResponse<U> {
        RemoteResponse {
            status_code: self.status_code,
            headers: self.headers,
            data: f(self.data),
        }
    }
}

#[derive(Deserialize)]
struct CountBody {
    count: u64,
}

/// The remote half of one collection.
///
/// Every method issues exactly one request and returns the decoded body
/// together with the response headers. Error statuses are decoded into
/// [`SyncError`] here and nowhere else.
#[derive(Clone)]
pub struct RemoteStore {
    collection: String,
    transport: Arc<dyn RemoteTransport>,
}

impl RemoteStore {
    /// Creates a remote store for `collection`.
    pub fn new(collection: impl Into<String>, transport: Arc<dyn RemoteTransport>) -> Self {
        Self {
            collection: collection.into(),
            transport,
        }
    }

    /// Returns the collection name.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Fetches the documents matching `query`.
    pub async fn find(
        &self,
        query: Option<&Query>,
        options: &RequestOptions,
    ) -> SyncResult<RemoteResponse<Vec<Document>>> {
        let request = RemoteRequest::new(Method::Get, Endpoint::Collection(&self.collection))
            .with_params(query_params(query));
        self.call(request, options).await
    }

    /// Counts the documents matching `query`, ignoring its pagination.
    pub async fn count(
        &self,
        query: Option<&Query>,
        options: &RequestOptions,
    ) -> SyncResult<RemoteResponse<u64>> {
        let unpaginated = query.map(|q| Query {
            skip: 0,
            limit: None,
            ..q.clone()
        });
        let request = RemoteRequest::new(Method::Get, Endpoint::Count(&self.collection))
            .with_params(query_params(unpaginated.as_ref()));
        let response: RemoteResponse<CountBody> = self.call(request, options).await?;
        Ok(response.map(|body| body.count))
    }

    /// Runs an aggregation remotely.
    pub async fn group(
        &self,
        aggregation: &Aggregation,
        options: &RequestOptions,
    ) -> SyncResult<RemoteResponse<Vec<Value>>> {
        aggregation.validate()?;
        let request = RemoteRequest::new(Method::Post, Endpoint::Group(&self.collection))
            .with_body(serde_json::to_value(aggregation)?);
        self.call(request, options).await
    }

    /// Fetches one document.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotFound`] if the document does not exist.
    pub async fn find_by_id(
        &self,
        id: &str,
        options: &RequestOptions,
    ) -> SyncResult<RemoteResponse<Document>> {
        let request = RemoteRequest::new(Method::Get, Endpoint::Entity(&self.collection, id));
        self.call(request, options).await
    }

    /// Creates a document; the service assigns its id.
    pub async fn create(
        &self,
        doc: Document,
        options: &RequestOptions,
    ) -> SyncResult<RemoteResponse<Document>> {
        let request = RemoteRequest::new(Method::Post, Endpoint::Collection(&self.collection))
            .with_body(doc.into_value());
        self.call(request, options).await
    }

    /// Replaces a document.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidArgument`] if the document has no id.
    pub async fn update(
        &self,
        doc: Document,
        options: &RequestOptions,
    ) -> SyncResult<RemoteResponse<Document>> {
        let id = doc
            .id()
            .map(str::to_string)
            .ok_or_else(|| SyncError::InvalidArgument("cannot update a document without an id".into()))?;
        let request = RemoteRequest::new(Method::Put, Endpoint::Entity(&self.collection, &id))
            .with_body(doc.into_value());
        self.call(request, options).await
    }

    /// Removes one document, returning the number removed.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotFound`] if the document does not exist.
    pub async fn remove_by_id(
        &self,
        id: &str,
        options: &RequestOptions,
    ) -> SyncResult<RemoteResponse<u64>> {
        let request = RemoteRequest::new(Method::Delete, Endpoint::Entity(&self.collection, id));
        let response: RemoteResponse<CountBody> = self.call(request, options).await?;
        Ok(response.map(|body| body.count))
    }

    /// Removes the documents matching `query`, returning the number removed.
    pub async fn remove(
        &self,
        query: Option<&Query>,
        options: &RequestOptions,
    ) -> SyncResult<RemoteResponse<u64>> {
        let request = RemoteRequest::new(Method::Delete, Endpoint::Collection(&self.collection))
            .with_params(query_params(query));
        let response: RemoteResponse<CountBody> = self.call(request, options).await?;
        Ok(response.map(|body| body.count))
    }

    /// Fetches the changes to the documents matching `query` since the
    /// server-side time `since`.
    pub async fn delta_set(
        &self,
        query: Option<&Query>,
        since: &str,
        options: &RequestOptions,
    ) -> SyncResult<RemoteResponse<DeltaSet>> {
        let mut params = query_params(query);
        params.push(("since".to_string(), since.to_string()));
        let request = RemoteRequest::new(Method::Get, Endpoint::DeltaSet(&self.collection))
            .with_params(params);
        self.call(request, options).await
    }

    async fn call<T: DeserializeOwned>(
        &self,
        request: RemoteRequest,
        options: &RequestOptions,
    ) -> SyncResult<RemoteResponse<T>> {
        let request = request.with_timeout(options.timeout);
        trace!(method = %request.method, path = %request.path, "remote request");
        let raw = self.transport.send(request).await?;
        decode(raw)
    }
}

fn query_params(query: Option<&Query>) -> Vec<(String, String)> {
    query.map(Query::to_params).unwrap_or_default()
}

fn decode<T: DeserializeOwned>(raw: RawResponse) -> SyncResult<RemoteResponse<T>> {
    if !raw.is_success() {
        let body: ServerErrorBody = serde_json::from_value(raw.data).unwrap_or_default();
        return Err(SyncError::from_server(raw.status_code, body));
    }
    let data = serde_json::from_value(raw.data)?;
    Ok(RemoteResponse {
        status_code: raw.status_code,
        headers: raw.headers,
        data,
    })
}
