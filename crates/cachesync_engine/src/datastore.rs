use crate::config::StoreConfig;
use crate::lock::PushLocks;
use crate::store::CacheStore;
use crate::transport::RemoteTransport;
use cachesync_storage::StorageAdapter;
use std::sync::Arc;

/// Entry point that hands out [`CacheStore`]s sharing one adapter, one
/// transport and one push lock registry.
#[derive(Clone)]
pub struct DataStore {
    adapter: Arc<dyn StorageAdapter>,
    transport: Arc<dyn RemoteTransport>,
    config: StoreConfig,
    locks: PushLocks,
}

impl DataStore {
    /// Creates a data store with the default configuration.
    pub fn new(adapter: Arc<dyn StorageAdapter>, transport: Arc<dyn RemoteTransport>) -> Self {
        Self {
            adapter,
            transport,
            config: StoreConfig::default(),
            locks: PushLocks::new(),
        }
    }

    /// Sets the configuration given to every store.
    #[must_use]
    pub fn with_config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Returns the base configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Opens the store for `collection`.
    pub fn collection(&self, collection: impl Into<String>) -> CacheStore {
        self.open(collection, self.config.clone())
    }

    /// Opens the store for `collection` under another tag.
    pub fn collection_with_tag(
        &self,
        collection: impl Into<String>,
        tag: impl Into<String>,
    ) -> CacheStore {
        self.open(collection, self.config.clone().with_tag(tag))
    }

    /// Opens the store for `collection` with its own configuration.
    pub fn collection_with_config(
        &self,
        collection: impl Into<String>,
        config: StoreConfig,
    ) -> CacheStore {
        self.open(collection, config)
    }

    /// Returns the shared push lock registry.
    pub fn push_locks(&self) -> &PushLocks {
        &self.locks
    }

    fn open(&self, collection: impl Into<String>, config: StoreConfig) -> CacheStore {
        CacheStore::new(
            Arc::clone(&self.adapter),
            Arc::clone(&self.transport),
            collection,
            config,
        )
        .with_push_locks(self.locks.clone())
    }
}
