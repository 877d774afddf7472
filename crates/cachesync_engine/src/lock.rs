//! Per-collection push exclusion.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

/// Registry of collections with a push in flight.
///
/// Clones share the same registry; every store created from one
/// [`crate::DataStore`] holds a clone, so two stores for the same
/// collection exclude each other.
#[derive(Debug, Clone, Default)]
pub struct PushLocks {
    active: Arc<Mutex<HashSet<String>>>,
}

impl PushLocks {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `collection` as pushing.
    ///
    /// Returns `None` if a push is already in flight. The lock is released
    /// when the guard is dropped, on success, failure or cancellation.
    pub fn try_acquire(&self, collection: &str) -> Option<PushGuard> {
        let mut active = self.active.lock();
        if !active.insert(collection.to_string()) {
            return None;
        }
        Some(PushGuard {
            active: Arc::clone(&self.active),
            collection: collection.to_string(),
        })
    }

    /// Returns true if a push is in flight for `collection`.
    pub fn is_locked(&self, collection: &str) -> bool {
        self.active.lock().contains(collection)
    }
}

/// Holds a collection's push lock until dropped.
#[derive(Debug)]
pub struct PushGuard {
    active: Arc<Mutex<HashSet<String>>>,
    collection: String,
}

impl PushGuard {
    /// Returns the locked collection.
    pub fn collection(&self) -> &str {
        &self.collection
    }
}

impl Drop for PushGuard {
    fn drop(&mut self) {
        self.active.lock().remove(&self.collection);
    }
}
