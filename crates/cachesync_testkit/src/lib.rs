//! # cachesync testkit
//!
//! Test utilities for the cachesync engine.
//!
//! This crate provides:
//! - Backend fixtures pairing an in-memory adapter with an in-memory backend
//! - Document fixtures
//! - Property-based generators for documents and mutation sequences
//! - A mutation harness that tracks the expected backend state
//!
//! ## Usage
//!
//! ```rust,ignore
//! use cachesync_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn pushes_a_book() {
//!     let backend = TestBackend::new();
//!     let store = backend.store("books");
//!     // ... test operations
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod integration;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
}

pub use fixtures::*;
pub use generators::*;
pub use integration::*;
