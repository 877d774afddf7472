//! # cachesync engine
//!
//! Offline-first cache and sync engine for a document backend.
//!
//! This crate provides:
//! - A local cache over any [`cachesync_storage::StorageAdapter`]
//! - A sync queue holding at most one pending mutation per document
//! - A query cache remembering the server time of every full read
//! - Push, pull, delta-set and auto-pagination against a [`RemoteTransport`]
//! - Two-stage reads: the local answer first, the reconciled answer second
//!
//! ## Architecture
//!
//! ```text
//! CacheStore ──► SyncEngine ──► LocalCache / SyncQueue / QueryCache ──► StorageAdapter
//!                     │
//!                     └──────► RemoteStore ──► RemoteTransport (HTTP or in-memory)
//! ```
//!
//! ## Key Invariants
//!
//! - Writes land locally first and never wait for the network
//! - Reads never hit the backend while mutations are queued
//! - One push per collection at a time
//! - A failed push leaves its entry queued and the local document untouched
//! - Documents created offline are never sent as deletes

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod config;
mod datastore;
mod engine;
mod error;
mod http;
mod lock;
mod memory;
mod remote;
mod store;
mod transport;

pub use cache::{LocalCache, QueryCache, SyncQueue, QUERY_CACHE_PREFIX, SYNC_QUEUE_PREFIX};
pub use config::{
    ReadOptions, RequestOptions, StoreConfig, SyncOptions, WriteOptions, DEFAULT_PAGE_SIZE,
    DEFAULT_PUSH_BATCH_SIZE,
};
pub use datastore::DataStore;
pub use engine::{PushResult, SyncEngine, SyncStats};
pub use error::{SyncError, SyncResult};
pub use http::{HttpClient, HttpClientError, HttpRequest, HttpResponse, HttpTransport, LoopbackClient};
pub use lock::{PushGuard, PushLocks};
pub use memory::MemoryTransport;
pub use remote::{RemoteResponse, RemoteStore};
pub use store::{settle, CacheStore, ReadEvent, ReadStream, SyncSummary};
pub use transport::{Endpoint, Method, RawResponse, RemoteRequest, RemoteTransport, APPDATA_PREFIX};
