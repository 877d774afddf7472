//! Test fixtures and backend helpers.
//!
//! Provides an in-process pairing of local storage and backend, plus
//! document builders for common test scenarios.

use cachesync_engine::{CacheStore, DataStore, MemoryTransport, StoreConfig};
use cachesync_protocol::Document;
use cachesync_storage::InMemoryAdapter;
use serde_json::json;
use std::sync::{Arc, Once};
use tracing_subscriber::EnvFilter;

/// Local storage and backend for one test.
pub struct TestBackend {
    /// The local storage adapter.
    pub adapter: Arc<InMemoryAdapter>,
    /// The in-memory backend.
    pub transport: Arc<MemoryTransport>,
    /// Data store handing out stores over both.
    pub data: DataStore,
}

impl TestBackend {
    /// Creates a backend with the default store configuration.
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    /// Creates a backend whose stores use `config`.
    pub fn with_config(config: StoreConfig) -> Self {
        let adapter = Arc::new(InMemoryAdapter::new());
        let transport = Arc::new(MemoryTransport::new());
        let data = DataStore::new(adapter.clone(), transport.clone()).with_config(config);
        Self {
            adapter,
            transport,
            data,
        }
    }

    /// Creates a backend whose stores never sync on their own.
    pub fn manual() -> Self {
        Self::with_config(StoreConfig::default().with_auto_sync(false))
    }

    /// Opens the store for `collection`.
    pub fn store(&self, collection: &str) -> CacheStore {
        self.data.collection(collection)
    }

    /// Seeds the backend with `count` books and returns them as stored.
    pub fn seed_books(&self, collection: &str, count: usize) -> Vec<Document> {
        self.transport.insert(collection, books(count))
    }
}

impl Default for TestBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// A book with an id, as the backend would return it.
pub fn book(id: &str, title: &str) -> Document {
    Document::new()
        .with_id(id)
        .with("title", json!(title))
        .with("pages", json!(100))
}

/// A book without an id.
pub fn new_book(title: &str) -> Document {
    Document::new()
        .with("title", json!(title))
        .with("pages", json!(100))
}

/// A book created offline and never pushed.
pub fn local_book(id: &str, title: &str) -> Document {
    let mut doc = book(id, title);
    doc.mark_local();
    doc
}

/// `count` books without ids, numbered from zero.
pub fn books(count: usize) -> Vec<Document> {
    (0..count)
        .map(|i| {
            Document::new()
                .with("title", json!(format!("Book {i}")))
                .with("index", json!(i))
                .with("genre", json!(if i % 2 == 0 { "scifi" } else { "drama" }))
        })
        .collect()
}

static TRACING: Once = Once::new();

/// Installs a test subscriber filtered by `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}
