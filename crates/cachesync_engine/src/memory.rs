//! In-process emulation of the remote service.

use crate::error::{SyncError, SyncResult};
use crate::transport::{Endpoint, Method, RawResponse, RemoteRequest, RemoteTransport};
use async_trait::async_trait;
use cachesync_protocol::{
    format_timestamp, parse_timestamp, Aggregation, DeletedDocument, DeltaSet, Document,
    Metadata, Query, ServerErrorBody, REQUEST_START_HEADER,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// 2024-01-01T00:00:00Z; the emulated clock starts here.
const EPOCH_SECONDS: i64 = 1_704_067_200;

/// Default delta-set retention window, in days.
const DEFAULT_DELTA_WINDOW_DAYS: i64 = 30;

type RequestMatcher = Box<dyn Fn(&RemoteRequest) -> bool + Send>;

struct InjectedFailure {
    matcher: RequestMatcher,
    status: u16,
    body: ServerErrorBody,
    remaining: Option<usize>,
}

struct Rejection(u16, ServerErrorBody);

impl Rejection {
    fn bad_request(description: impl Into<String>) -> Self {
        Self(
            400,
            ServerErrorBody::new("BadRequest").with_description(description),
        )
    }

    fn entity_not_found(id: &str) -> Self {
        Self(
            404,
            ServerErrorBody::new("EntityNotFound")
                .with_description(format!("entity {id} does not exist")),
        )
    }
}

type Reply = Result<RawResponse, Rejection>;

struct BackendState {
    collections: HashMap<String, BTreeMap<String, Document>>,
    tombstones: HashMap<String, Vec<(String, DateTime<Utc>)>>,
    clock: DateTime<Utc>,
    delta_set: bool,
    delta_window: chrono::Duration,
    failures: Vec<InjectedFailure>,
    requests: Vec<RemoteRequest>,
    latency: Option<Duration>,
    next_id: u64,
}

impl Default for BackendState {
    fn default() -> Self {
        Self {
            collections: HashMap::new(),
            tombstones: HashMap::new(),
            clock: DateTime::<Utc>::from_timestamp(EPOCH_SECONDS, 0).unwrap_or_default(),
            delta_set: false,
            delta_window: chrono::Duration::days(DEFAULT_DELTA_WINDOW_DAYS),
            failures: Vec::new(),
            requests: Vec::new(),
            latency: None,
            next_id: 1,
        }
    }
}

/// A transport backed by an in-memory emulation of the remote service.
///
/// Every collection endpoint is served: reads honour the query
/// parameters, writes stamp `_kmd` timestamps from a logical clock that
/// advances one second per request, and deletions leave tombstones for
/// the delta-set endpoint. Every response carries the request start time
/// header.
///
/// Tests can seed documents, toggle delta-set support, move the clock,
/// add latency, inject failures and inspect the recorded requests.
///
/// # Example
///
/// ```rust
/// use cachesync_engine::{Endpoint, MemoryTransport, Method, RemoteRequest, RemoteTransport};
/// use cachesync_protocol::Document;
///
/// # tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap().block_on(async {
/// let transport = MemoryTransport::new();
/// transport.insert("books", vec![Document::new().with_id("b1")]);
///
/// let request = RemoteRequest::new(Method::Get, Endpoint::Count("books"));
/// let response = transport.send(request).await.unwrap();
/// assert_eq!(response.data["count"], 1);
/// assert!(response.header("x-request-start").is_some());
/// # });
/// ```
pub struct MemoryTransport {
    state: Mutex<BackendState>,
    connected: AtomicBool,
}

impl MemoryTransport {
    /// Creates an empty, connected backend with delta-set disabled.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BackendState::default()),
            connected: AtomicBool::new(true),
        }
    }

    /// Stores documents as if another client had written them.
    ///
    /// Documents without an id get one assigned. Returns the stored
    /// documents.
    pub fn insert(&self, collection: &str, docs: Vec<Document>) -> Vec<Document> {
        let mut state = self.state.lock();
        let now = state.tick();
        docs.into_iter()
            .map(|doc| state.store(collection, doc, now))
            .collect()
    }

    /// Deletes a document as if another client had removed it.
    pub fn delete(&self, collection: &str, id: &str) -> bool {
        let mut state = self.state.lock();
        let now = state.tick();
        state.delete(collection, id, now)
    }

    /// Returns every document of a collection in id order.
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.state.lock().table(collection)
    }

    /// Returns one document.
    pub fn document(&self, collection: &str, id: &str) -> Option<Document> {
        self.state
            .lock()
            .collections
            .get(collection)
            .and_then(|table| table.get(id))
            .cloned()
    }

    /// Enables or disables the delta-set endpoint.
    pub fn enable_delta_set(&self, enabled: bool) {
        self.state.lock().delta_set = enabled;
    }

    /// Sets how far back a delta-set `since` may reach.
    pub fn set_delta_window(&self, window: chrono::Duration) {
        self.state.lock().delta_window = window;
    }

    /// Moves the logical clock forward.
    pub fn advance_clock(&self, by: chrono::Duration) {
        let mut state = self.state.lock();
        state.clock += by;
    }

    /// Returns the current logical time.
    pub fn now(&self) -> DateTime<Utc> {
        self.state.lock().clock
    }

    /// Delays every response.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.state.lock().latency = latency;
    }

    /// Sets the connected state; disconnected sends fail with a retryable
    /// transport error.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Returns true if connected.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Answers every matching request with the given error.
    pub fn fail_when<F>(&self, matcher: F, status: u16, body: ServerErrorBody)
    where
        F: Fn(&RemoteRequest) -> bool + Send + 'static,
    {
        self.push_failure(Box::new(matcher), status, body, None);
    }

    /// Answers the next matching request with the given error.
    pub fn fail_once<F>(&self, matcher: F, status: u16, body: ServerErrorBody)
    where
        F: Fn(&RemoteRequest) -> bool + Send + 'static,
    {
        self.push_failure(Box::new(matcher), status, body, Some(1));
    }

    /// Answers every request addressed to entity `id` with the given error.
    pub fn fail_entity(&self, id: impl Into<String>, status: u16, body: ServerErrorBody) {
        let id = id.into();
        self.fail_when(
            move |request| request.endpoint().and_then(|e| e.entity_id()) == Some(id.as_str()),
            status,
            body,
        );
    }

    /// Removes every injected failure.
    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    /// Returns the requests received so far.
    pub fn requests(&self) -> Vec<RemoteRequest> {
        self.state.lock().requests.clone()
    }

    /// Returns the number of requests received so far.
    pub fn request_count(&self) -> usize {
        self.state.lock().requests.len()
    }

    /// Forgets the recorded requests.
    pub fn clear_requests(&self) {
        self.state.lock().requests.clear();
    }

    fn push_failure(
        &self,
        matcher: RequestMatcher,
        status: u16,
        body: ServerErrorBody,
        remaining: Option<usize>,
    ) {
        self.state.lock().failures.push(InjectedFailure {
            matcher,
            status,
            body,
            remaining,
        });
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteTransport for MemoryTransport {
    async fn send(&self, request: RemoteRequest) -> SyncResult<RawResponse> {
        if !self.is_connected() {
            return Err(SyncError::transport_retryable("not connected"));
        }

        let latency = self.state.lock().latency;
        if let Some(latency) = latency {
            match request.timeout {
                Some(timeout) if timeout < latency => {
                    tokio::time::sleep(timeout).await;
                    return Err(SyncError::Timeout);
                }
                _ => tokio::time::sleep(latency).await,
            }
        }

        Ok(self.state.lock().handle(request))
    }
}

impl BackendState {
    fn tick(&mut self) -> DateTime<Utc> {
        self.clock += chrono::Duration::seconds(1);
        self.clock
    }

    fn table(&self, collection: &str) -> Vec<Document> {
        self.collections
            .get(collection)
            .map(|table| table.values().cloned().collect())
            .unwrap_or_default()
    }

    fn handle(&mut self, request: RemoteRequest) -> RawResponse {
        self.requests.push(request.clone());
        let started = self.tick();

        let reply = match self.take_failure(&request) {
            Some(rejection) => Err(rejection),
            None => self.route(&request, started),
        };
        let response = match reply {
            Ok(response) => response,
            Err(Rejection(status, body)) => {
                RawResponse::new(status, serde_json::to_value(body).unwrap_or_default())
            }
        };
        response.with_header(REQUEST_START_HEADER, format_timestamp(started))
    }

    fn take_failure(&mut self, request: &RemoteRequest) -> Option<Rejection> {
        let index = self.failures.iter().position(|f| (f.matcher)(request))?;
        let failure = &mut self.failures[index];
        let rejection = Rejection(failure.status, failure.body.clone());
        if let Some(remaining) = failure.remaining.as_mut() {
            *remaining -= 1;
            if *remaining == 0 {
                self.failures.remove(index);
            }
        }
        Some(rejection)
    }

    fn route(&mut self, request: &RemoteRequest, now: DateTime<Utc>) -> Reply {
        let endpoint = request.endpoint().ok_or_else(|| {
            Rejection(
                404,
                ServerErrorBody::new("ResourceNotFound")
                    .with_description(format!("no endpoint at {}", request.path)),
            )
        })?;

        match (request.method, endpoint) {
            (Method::Get, Endpoint::Collection(c)) => self.find(c, request),
            (Method::Get, Endpoint::Count(c)) => self.count(c, request),
            (Method::Post, Endpoint::Group(c)) => self.group(c, request),
            (Method::Get, Endpoint::DeltaSet(c)) => self.delta_set(c, request, now),
            (Method::Get, Endpoint::Entity(c, id)) => self.find_by_id(c, id),
            (Method::Post, Endpoint::Collection(c)) => self.create(c, request, now),
            (Method::Put, Endpoint::Entity(c, id)) => self.update(c, id, request, now),
            (Method::Delete, Endpoint::Entity(c, id)) => self.remove_by_id(c, id, now),
            (Method::Delete, Endpoint::Collection(c)) => self.remove(c, request, now),
            (method, _) => Err(Rejection::bad_request(format!(
                "{method} is not supported on {}",
                request.path
            ))),
        }
    }

    fn find(&self, collection: &str, request: &RemoteRequest) -> Reply {
        let query = parse_query(request)?;
        let docs: Vec<Value> = query
            .process(self.table(collection))
            .into_iter()
            .map(Value::from)
            .collect();
        Ok(RawResponse::new(200, Value::Array(docs)))
    }

    fn count(&self, collection: &str, request: &RemoteRequest) -> Reply {
        let query = parse_query(request)?;
        let count = self
            .table(collection)
            .iter()
            .filter(|doc| query.matches(doc))
            .count();
        Ok(RawResponse::new(200, json!({ "count": count })))
    }

    fn group(&self, collection: &str, request: &RemoteRequest) -> Reply {
        let body = request
            .body
            .clone()
            .ok_or_else(|| Rejection::bad_request("group requires a body"))?;
        let aggregation: Aggregation = serde_json::from_value(body)
            .map_err(|e| Rejection::bad_request(format!("invalid aggregation: {e}")))?;
        let groups = aggregation
            .validate()
            .and_then(|()| aggregation.apply(self.table(collection)))
            .map_err(|e| Rejection::bad_request(e.to_string()))?;
        Ok(RawResponse::new(200, Value::Array(groups)))
    }

    fn delta_set(
        &self,
        collection: &str,
        request: &RemoteRequest,
        now: DateTime<Utc>,
    ) -> Reply {
        if !self.delta_set {
            return Err(Rejection(
                403,
                ServerErrorBody::new("MissingConfiguration")
                    .with_description("delta-set is not enabled for this collection"),
            ));
        }
        let since = request
            .param("since")
            .and_then(parse_timestamp)
            .ok_or_else(|| Rejection::bad_request("missing or malformed 'since' parameter"))?;
        if since < now - self.delta_window {
            return Err(Rejection(
                400,
                ServerErrorBody::new("BadRequest").with_debug(format!(
                    "The 'since' timestamp must be within the past {} days.",
                    self.delta_window.num_days()
                )),
            ));
        }

        let query = parse_query(request)?;
        let changed = self
            .table(collection)
            .into_iter()
            .filter(|doc| query.matches(doc))
            .filter(|doc| {
                doc.last_modified()
                    .as_deref()
                    .and_then(parse_timestamp)
                    .map(|lmt| lmt > since)
                    .unwrap_or(true)
            })
            .collect();
        let deleted = self
            .tombstones
            .get(collection)
            .map(|stones| {
                stones
                    .iter()
                    .filter(|(_, at)| *at > since)
                    .map(|(id, _)| DeletedDocument { id: id.clone() })
                    .collect()
            })
            .unwrap_or_default();

        let delta = DeltaSet { changed, deleted };
        let data = serde_json::to_value(delta)
            .map_err(|e| Rejection(500, ServerErrorBody::new("InternalError").with_debug(e.to_string())))?;
        Ok(RawResponse::new(200, data))
    }

    fn find_by_id(&self, collection: &str, id: &str) -> Reply {
        self.collections
            .get(collection)
            .and_then(|table| table.get(id))
            .map(|doc| RawResponse::new(200, doc.clone().into_value()))
            .ok_or_else(|| Rejection::entity_not_found(id))
    }

    fn create(&mut self, collection: &str, request: &RemoteRequest, now: DateTime<Utc>) -> Reply {
        let doc = parse_body(request)?;
        let stored = self.store(collection, doc, now);
        Ok(RawResponse::new(201, stored.into_value()))
    }

    fn update(
        &mut self,
        collection: &str,
        id: &str,
        request: &RemoteRequest,
        now: DateTime<Utc>,
    ) -> Reply {
        let doc = parse_body(request)?.with_id(id);
        let stored = self.store(collection, doc, now);
        Ok(RawResponse::new(200, stored.into_value()))
    }

    fn remove_by_id(&mut self, collection: &str, id: &str, now: DateTime<Utc>) -> Reply {
        if self.delete(collection, id, now) {
            Ok(RawResponse::new(200, json!({ "count": 1 })))
        } else {
            Err(Rejection::entity_not_found(id))
        }
    }

    fn remove(&mut self, collection: &str, request: &RemoteRequest, now: DateTime<Utc>) -> Reply {
        let query = parse_query(request)?;
        let doomed: Vec<String> = self
            .table(collection)
            .iter()
            .filter(|doc| query.matches(doc))
            .filter_map(|doc| doc.id().map(str::to_string))
            .collect();
        for id in &doomed {
            self.delete(collection, id, now);
        }
        Ok(RawResponse::new(200, json!({ "count": doomed.len() })))
    }

    fn store(&mut self, collection: &str, mut doc: Document, now: DateTime<Utc>) -> Document {
        let id = match doc.id() {
            Some(id) => id.to_string(),
            None => {
                let id = format!("{:024x}", self.next_id);
                self.next_id += 1;
                doc.set_id(id.clone());
                id
            }
        };

        let table = self.collections.entry(collection.to_string()).or_default();
        let created = table
            .get(&id)
            .and_then(Document::metadata)
            .and_then(|m| m.ect)
            .unwrap_or_else(|| format_timestamp(now));
        doc.set_metadata(&Metadata {
            lmt: Some(format_timestamp(now)),
            ect: Some(created),
            local: false,
        });
        table.insert(id, doc.clone());
        doc
    }

    fn delete(&mut self, collection: &str, id: &str, now: DateTime<Utc>) -> bool {
        let removed = self
            .collections
            .get_mut(collection)
            .and_then(|table| table.remove(id))
            .is_some();
        if removed {
            self.tombstones
                .entry(collection.to_string())
                .or_default()
                .push((id.to_string(), now));
        }
        removed
    }
}

fn parse_query(request: &RemoteRequest) -> Result<Query, Rejection> {
    let query = Query::from_params(&request.params)
        .map_err(|e| Rejection::bad_request(e.to_string()))?;
    query
        .validate()
        .map_err(|e| Rejection::bad_request(e.to_string()))?;
    Ok(query)
}

fn parse_body(request: &RemoteRequest) -> Result<Document, Rejection> {
    let body = request
        .body
        .clone()
        .ok_or_else(|| Rejection::bad_request("request requires a body"))?;
    Document::from_value(body).map_err(|e| Rejection::bad_request(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book(id: &str, title: &str) -> Document {
        Document::from_value(json!({"_id": id, "title": title})).unwrap()
    }

    async fn get(transport: &MemoryTransport, endpoint: Endpoint<'_>) -> RawResponse {
        transport
            .send(RemoteRequest::new(Method::Get, endpoint))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn serves_seeded_documents() {
        let transport = MemoryTransport::new();
        transport.insert("books", vec![book("a", "Dune"), book("b", "Emma")]);

        let response = get(&transport, Endpoint::Collection("books")).await;
        assert_eq!(response.status_code, 200);
        assert_eq!(response.data.as_array().unwrap().len(), 2);

        let response = get(&transport, Endpoint::Entity("books", "a")).await;
        assert_eq!(response.data["title"], "Dune");
        assert!(response.data["_kmd"]["lmt"].is_string());

        let response = get(&transport, Endpoint::Entity("books", "zzz")).await;
        assert_eq!(response.status_code, 404);
        assert_eq!(response.data["error"], "EntityNotFound");
    }

    #[tokio::test]
    async fn find_honours_query_params() {
        let transport = MemoryTransport::new();
        transport.insert("books", vec![book("a", "Dune"), book("b", "Emma"), book("c", "Ulysses")]);

        let query = Query::new().not_equal_to("title", "Emma").descending("title").limit(1);
        let request = RemoteRequest::new(Method::Get, Endpoint::Collection("books"))
            .with_params(query.to_params());
        let response = transport.send(request).await.unwrap();
        let docs = response.data.as_array().unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["title"], "Ulysses");
    }

    #[tokio::test]
    async fn create_assigns_id_and_metadata() {
        let transport = MemoryTransport::new();
        let request = RemoteRequest::new(Method::Post, Endpoint::Collection("books"))
            .with_body(json!({"title": "Dune"}));
        let response = transport.send(request).await.unwrap();

        assert_eq!(response.status_code, 201);
        let id = response.data["_id"].as_str().unwrap().to_string();
        assert_eq!(id.len(), 24);
        let stored = transport.document("books", &id).unwrap();
        assert_eq!(stored.metadata().unwrap().lmt, stored.metadata().unwrap().ect);
    }

    #[tokio::test]
    async fn clock_advances_per_request() {
        let transport = MemoryTransport::new();
        let first = get(&transport, Endpoint::Count("books")).await;
        let second = get(&transport, Endpoint::Count("books")).await;
        let t1 = parse_timestamp(first.header(REQUEST_START_HEADER).unwrap()).unwrap();
        let t2 = parse_timestamp(second.header(REQUEST_START_HEADER).unwrap()).unwrap();
        assert!(t2 > t1);
        assert_eq!(first.data["count"], 0);
    }

    #[tokio::test]
    async fn delta_set_requires_configuration() {
        let transport = MemoryTransport::new();
        let since = format_timestamp(transport.now());
        let request = RemoteRequest::new(Method::Get, Endpoint::DeltaSet("books"))
            .with_params(vec![("since".to_string(), since)]);
        let response = transport.send(request).await.unwrap();
        assert_eq!(response.status_code, 403);
        assert_eq!(response.data["error"], "MissingConfiguration");
    }

    #[tokio::test]
    async fn delta_set_reports_changes_and_deletions() {
        let transport = MemoryTransport::new();
        transport.enable_delta_set(true);
        transport.insert("books", vec![book("a", "Dune"), book("b", "Emma")]);
        let since = format_timestamp(transport.now());

        transport.insert("books", vec![book("c", "Ulysses")]);
        transport.delete("books", "a");

        let request = RemoteRequest::new(Method::Get, Endpoint::DeltaSet("books"))
            .with_params(vec![("since".to_string(), since)]);
        let response = transport.send(request).await.unwrap();
        let delta: DeltaSet = serde_json::from_value(response.data).unwrap();
        assert_eq!(delta.changed.len(), 1);
        assert_eq!(delta.changed[0].id(), Some("c"));
        assert_eq!(delta.deleted, vec![DeletedDocument { id: "a".into() }]);
    }

    #[tokio::test]
    async fn delta_set_rejects_expired_since() {
        let transport = MemoryTransport::new();
        transport.enable_delta_set(true);
        let since = format_timestamp(transport.now());
        transport.advance_clock(chrono::Duration::days(31));

        let request = RemoteRequest::new(Method::Get, Endpoint::DeltaSet("books"))
            .with_params(vec![("since".to_string(), since)]);
        let response = transport.send(request).await.unwrap();
        assert_eq!(response.status_code, 400);
        let body: ServerErrorBody = serde_json::from_value(response.data).unwrap();
        assert_eq!(
            body.kind(400),
            cachesync_protocol::RemoteErrorKind::ParameterValueOutOfRange
        );
    }

    #[tokio::test]
    async fn injected_failures() {
        let transport = MemoryTransport::new();
        transport.insert("books", vec![book("a", "Dune")]);
        transport.fail_once(
            |request| request.method == Method::Get,
            500,
            ServerErrorBody::new("InternalError"),
        );

        assert_eq!(get(&transport, Endpoint::Entity("books", "a")).await.status_code, 500);
        assert_eq!(get(&transport, Endpoint::Entity("books", "a")).await.status_code, 200);

        transport.fail_entity("a", 409, ServerErrorBody::new("Conflict"));
        let request = RemoteRequest::new(Method::Delete, Endpoint::Entity("books", "a"));
        assert_eq!(transport.send(request).await.unwrap().status_code, 409);
        assert!(transport.document("books", "a").is_some());

        transport.clear_failures();
        let request = RemoteRequest::new(Method::Delete, Endpoint::Entity("books", "a"));
        assert_eq!(transport.send(request).await.unwrap().data["count"], 1);
        assert_eq!(transport.request_count(), 4);
        assert_eq!(
            transport.requests().last().map(|r| r.method),
            Some(Method::Delete)
        );
    }

    #[tokio::test]
    async fn disconnected_transport_fails_retryable() {
        let transport = MemoryTransport::new();
        transport.set_connected(false);
        let result = transport
            .send(RemoteRequest::new(Method::Get, Endpoint::Collection("books")))
            .await;
        assert!(matches!(result, Err(ref e) if e.is_retryable()));
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn latency_beyond_timeout_times_out() {
        let transport = MemoryTransport::new();
        transport.set_latency(Some(Duration::from_secs(10)));
        let request = RemoteRequest::new(Method::Get, Endpoint::Collection("books"))
            .with_timeout(Some(Duration::from_secs(1)));
        assert!(matches!(transport.send(request).await, Err(SyncError::Timeout)));

        let request = RemoteRequest::new(Method::Get, Endpoint::Collection("books"));
        assert!(transport.send(request).await.is_ok());
    }
}
