//! Crate-wide error taxonomy.
//!
//! Every public operation returns exactly one of these identifiers or a
//! result.  Invariant violations found while holding the store lock are
//! reported through this enum, never panicked on.  Transient I/O errors are
//! surfaced verbatim via the `Io` variant; the engine does not retry.

use std::io;
use thiserror::Error;

use crate::config::DataType;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("invalid store configuration: {0}")]
    InvalidConfig(String),

    #[error("store already exists: {0}")]
    StoreExists(String),

    #[error("store not found: {0}")]
    StoreNotFound(String),

    #[error("store is closed")]
    StoreClosed,

    #[error("invalid magic number, not a tsstore metadata file")]
    InvalidMagic,

    #[error("unsupported format version {found} (this build handles v{supported})")]
    VersionMismatch { found: u32, supported: u32 },

    #[error("block {block} out of range (store has {num_blocks} blocks)")]
    BlockOutOfRange { block: u32, num_blocks: u32 },

    #[error("invalid timestamp {0}, must be a positive nanosecond value")]
    InvalidTimestamp(i64),

    #[error("timestamp {ts} is not after the newest stored timestamp {newest}")]
    TimestampOutOfOrder { ts: i64, newest: i64 },

    #[error("no object with timestamp {0}")]
    TimestampNotFound(i64),

    #[error("store is empty")]
    EmptyStore,

    #[error("object not found (the referenced block may have been reclaimed)")]
    ObjectNotFound,

    /// The object would span more blocks than the store can hold live.
    #[error("object of {size} bytes exceeds store capacity of {capacity} bytes")]
    ObjectTooLarge { size: usize, capacity: usize },

    #[error("store data type {0:?} does not support schemas")]
    SchemaNotSupported(DataType),

    #[error("schema store has no schema version set")]
    SchemaRequired,

    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    #[error("field {0:?} is not defined in the current schema")]
    FieldNotInSchema(String),

    #[error("field {field:?} value does not match declared type {expected}")]
    InvalidFieldType { field: String, expected: &'static str },

    #[error("compact key {0:?} is not a valid field index")]
    InvalidCompactKey(String),

    #[error("invalid JSON: {0}")]
    InvalidJSON(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}
