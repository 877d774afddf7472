//! Configuration for cache stores and sync operations.

use cachesync_storage::DEFAULT_TAG;
use serde::Deserialize;
use std::time::Duration;

/// Default page size for auto-pagination.
pub const DEFAULT_PAGE_SIZE: u64 = 10_000;

/// Default number of sync entries pushed concurrently.
pub const DEFAULT_PUSH_BATCH_SIZE: usize = 100;

/// Configuration for a cache store.
///
/// Can be built in code or deserialized from JSON; missing fields take
/// their defaults.
///
/// ```rust
/// use cachesync_engine::StoreConfig;
///
/// let config: StoreConfig = serde_json::from_str(r#"{"use_delta_set": true}"#).unwrap();
/// assert!(config.use_delta_set);
/// assert!(config.auto_sync);
/// assert_eq!(config.page_size, 10_000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Local dataset namespace.
    pub tag: String,
    /// Push every mutation and refresh every read immediately.
    pub auto_sync: bool,
    /// Refresh reads through the delta-set endpoint when possible.
    pub use_delta_set: bool,
    /// Refresh reads by fetching the collection in concurrent pages.
    pub use_auto_pagination: bool,
    /// Page size for auto-pagination.
    pub page_size: u64,
    /// Number of sync entries pushed concurrently.
    pub push_batch_size: usize,
    /// Per-request timeout in milliseconds, passed through to the transport.
    pub timeout_ms: Option<u64>,
}

impl StoreConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    /// Enables or disables auto-sync.
    pub fn with_auto_sync(mut self, auto_sync: bool) -> Self {
        self.auto_sync = auto_sync;
        self
    }

    /// Enables or disables delta-set reads.
    pub fn with_delta_set(mut self, use_delta_set: bool) -> Self {
        self.use_delta_set = use_delta_set;
        self
    }

    /// Enables or disables auto-pagination.
    pub fn with_auto_pagination(mut self, use_auto_pagination: bool) -> Self {
        self.use_auto_pagination = use_auto_pagination;
        self
    }

    /// Sets the auto-pagination page size.
    pub fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = page_size;
        self
    }

    /// Sets the push batch size.
    pub fn with_push_batch_size(mut self, size: usize) -> Self {
        self.push_batch_size = size;
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Returns the request timeout.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Resolves read options against this configuration.
    pub fn sync_options(&self, options: &ReadOptions) -> SyncOptions {
        SyncOptions {
            use_delta_set: options.use_delta_set.unwrap_or(self.use_delta_set),
            use_auto_pagination: options
                .use_auto_pagination
                .unwrap_or(self.use_auto_pagination),
            page_size: self.page_size.max(1),
            timeout: options.timeout.or(self.timeout()),
        }
    }

    /// Returns whether a read refreshes from the backend.
    pub fn read_auto_sync(&self, options: &ReadOptions) -> bool {
        options.auto_sync.unwrap_or(self.auto_sync)
    }

    /// Returns whether a write is pushed immediately.
    pub fn write_auto_sync(&self, options: &WriteOptions) -> bool {
        options.auto_sync.unwrap_or(self.auto_sync)
    }

    /// Resolves write options into request options.
    pub fn request_options(&self, options: &WriteOptions) -> RequestOptions {
        RequestOptions {
            timeout: options.timeout.or(self.timeout()),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            tag: DEFAULT_TAG.to_string(),
            auto_sync: true,
            use_delta_set: false,
            use_auto_pagination: false,
            page_size: DEFAULT_PAGE_SIZE,
            push_batch_size: DEFAULT_PUSH_BATCH_SIZE,
            timeout_ms: None,
        }
    }
}

/// Per-call overrides for reads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadOptions {
    /// Overrides [`StoreConfig::auto_sync`].
    pub auto_sync: Option<bool>,
    /// Overrides [`StoreConfig::use_delta_set`].
    pub use_delta_set: Option<bool>,
    /// Overrides [`StoreConfig::use_auto_pagination`].
    pub use_auto_pagination: Option<bool>,
    /// Overrides the request timeout.
    pub timeout: Option<Duration>,
}

impl ReadOptions {
    /// Creates options that inherit everything from the store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides auto-sync.
    pub fn auto_sync(mut self, value: bool) -> Self {
        self.auto_sync = Some(value);
        self
    }

    /// Overrides delta-set usage.
    pub fn use_delta_set(mut self, value: bool) -> Self {
        self.use_delta_set = Some(value);
        self
    }

    /// Overrides auto-pagination usage.
    pub fn use_auto_pagination(mut self, value: bool) -> Self {
        self.use_auto_pagination = Some(value);
        self
    }

    /// Overrides the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Per-call overrides for writes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Overrides [`StoreConfig::auto_sync`].
    pub auto_sync: Option<bool>,
    /// Overrides the request timeout.
    pub timeout: Option<Duration>,
}

impl WriteOptions {
    /// Creates options that inherit everything from the store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides auto-sync.
    pub fn auto_sync(mut self, value: bool) -> Self {
        self.auto_sync = Some(value);
        self
    }

    /// Overrides the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Resolved options for pull, delta-set and auto-pagination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    /// Try the delta-set endpoint first.
    pub use_delta_set: bool,
    /// Fetch in concurrent pages instead of a single request.
    pub use_auto_pagination: bool,
    /// Page size for auto-pagination.
    pub page_size: u64,
    /// Request timeout.
    pub timeout: Option<Duration>,
}

impl SyncOptions {
    /// Returns the per-request options.
    pub fn request(&self) -> RequestOptions {
        RequestOptions {
            timeout: self.timeout,
        }
    }
}

impl Default for SyncOptions {
    fn default() -> Self {
        StoreConfig::default().sync_options(&ReadOptions::default())
    }
}

/// Options passed through to a single remote request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// Request timeout; `None` leaves it to the transport.
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    /// Sets the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}
