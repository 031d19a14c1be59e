//! # tsstore — embeddable circular-buffer time-series object store
//!
//! Each store is a fixed-capacity, on-disk ring of fixed-size blocks holding
//! timestamped, variable-length opaque payloads.  New objects land at the
//! head; when the ring is full the oldest blocks at the tail are reclaimed.
//!
//! Format guarantees (frozen in v1):
//! - All numeric fields are little-endian; never negotiated
//! - The 64-byte metadata record at offset 0 of `meta.tsdb` is the commit
//!   point: block and index bytes are persisted before it, and recovery
//!   reconciles the two on every open
//! - Timestamps are strictly monotonic across successful writes
//! - Small objects pack into shared blocks behind per-object headers;
//!   oversized objects span chains of consecutive blocks linked by block
//!   number
//! - The index file parallels the block file; continuation blocks carry a
//!   zero index timestamp and are invisible to the binary search
//! - Schema sets are append-only: a published `(index, name, type)` triple
//!   never changes

pub mod codec;
pub mod config;
pub mod error;
pub mod files;
pub mod metadata;
mod recovery;
pub mod schema;
pub mod store;
pub mod aggregate;

// Flat re-exports for the most common types.
pub use aggregate::{AggregateConfig, AggregateFn, Aggregator, WindowResult};
pub use config::{DataType, StoreConfig};
pub use error::{Result, StoreError};
pub use files::delete_store;
pub use schema::{FieldType, Schema, SchemaField, SchemaSet};
pub use store::{ObjectHandle, Store, StoreStats};
