//! # cachesync storage
//!
//! Storage adapter contract for the cachesync local cache.
//!
//! This crate provides the lowest-level storage abstraction of the engine.
//! Adapters are **document stores** partitioned by [`Scope`]: they upsert,
//! read, filter and delete JSON documents by id, and know nothing about sync
//! queues, query caches or the remote service.
//!
//! ## Design Principles
//!
//! - Adapters are simple document stores (find, save, remove, clear)
//! - No knowledge of sync entries or delta tracking
//! - Must be `Send + Sync` for concurrent access
//! - The engine owns all bookkeeping namespaces
//!
//! ## Available Adapters
//!
//! - [`InMemoryAdapter`] - For testing and ephemeral caches

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod adapter;
mod error;
mod memory;

pub use adapter::{Scope, StorageAdapter, DEFAULT_TAG};
pub use error::{StorageError, StorageResult};
pub use memory::InMemoryAdapter;
