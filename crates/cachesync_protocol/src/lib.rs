//! # cachesync protocol
//!
//! Data types shared by the cachesync storage adapters, transports and
//! sync engine.
//!
//! This crate provides:
//! - [`Document`] with its `_id`, metadata and access-control fields
//! - [`Query`] predicates with a local evaluator and canonical cache keys
//! - [`Aggregation`] group-and-reduce specifications
//! - [`SyncEntry`] / [`SyncOperation`] pending mutation records
//! - [`QueryCacheEntry`], [`DeltaSet`] and [`ServerErrorBody`] wire types
//!
//! This is a pure data crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod aggregation;
mod document;
mod error;
mod messages;
mod operation;
mod query;

pub use aggregation::{Aggregation, AggregationKind};
pub use document::{generate_local_id, Acl, Document, Metadata, ACL_FIELD, ID_FIELD, METADATA_FIELD};
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{
    format_timestamp, parse_timestamp, DeletedDocument, DeltaSet, QueryCacheEntry,
    RemoteErrorKind, ServerErrorBody, REQUEST_START_HEADER,
};
pub use operation::{SyncEntry, SyncOperation, SyncState};
pub use query::{compare_values, Query, SortDirection, SortField};
