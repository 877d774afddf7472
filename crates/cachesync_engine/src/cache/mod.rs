//! Local caches layered over a storage adapter.
//!
//! Each collection owns three namespaces under the same tag: the cached
//! documents, the pending sync queue and the query cache.

mod local;
mod query_cache;
mod sync_queue;

pub use local::LocalCache;
pub use query_cache::{QueryCache, QUERY_CACHE_PREFIX};
pub use sync_queue::{SyncQueue, SYNC_QUEUE_PREFIX};
