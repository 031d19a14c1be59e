//! Store configuration and the data type tag.

use serde::{Deserialize, Serialize};

use crate::codec::INDEX_ENTRY_SIZE;
use crate::error::{Result, StoreError};

pub const DEFAULT_NUM_BLOCKS: u32 = 1024;
pub const DEFAULT_DATA_BLOCK_SIZE: u32 = 4096;
pub const DEFAULT_INDEX_BLOCK_SIZE: u32 = 4096;

/// Smallest permitted block size; block sizes must be powers of two.
pub const MIN_BLOCK_SIZE: u32 = 64;

// ── DataType ─────────────────────────────────────────────────────────────────

/// Declares how callers interpret stored payloads.  `Schema` additionally
/// loads the schema codec and persists `schema.json` next to the block files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum DataType {
    Binary = 0,
    Text   = 1,
    Json   = 2,
    Schema = 3,
}

impl DataType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(DataType::Binary),
            1 => Some(DataType::Text),
            2 => Some(DataType::Json),
            3 => Some(DataType::Schema),
            _ => None,
        }
    }
}

// ── StoreConfig ──────────────────────────────────────────────────────────────

/// Configuration for [`Store::create`](crate::Store::create).
///
/// `path/name/` becomes the store directory.  Geometry fields are frozen at
/// creation time and persisted in the metadata record; `open` ignores any
/// later changes to these values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store directory name; required.
    pub name:             String,
    /// Parent directory; required.
    pub path:             String,
    /// Primary block count.
    pub num_blocks:       u32,
    /// Bytes per data block; power of two >= 64.
    pub data_block_size:  u32,
    /// Bytes per index block; power of two >= 64.
    pub index_block_size: u32,
    pub data_type:        DataType,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            name:             String::new(),
            path:             String::new(),
            num_blocks:       DEFAULT_NUM_BLOCKS,
            data_block_size:  DEFAULT_DATA_BLOCK_SIZE,
            index_block_size: DEFAULT_INDEX_BLOCK_SIZE,
            data_type:        DataType::Json,
        }
    }
}

impl StoreConfig {
    pub fn new(path: &str, name: &str) -> Self {
        Self {
            name: name.to_owned(),
            path: path.to_owned(),
            ..Self::default()
        }
    }

    /// Reject geometries the block layout cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(StoreError::InvalidConfig("store name is empty".into()));
        }
        if self.path.is_empty() {
            return Err(StoreError::InvalidConfig("store path is empty".into()));
        }
        if self.num_blocks == 0 {
            return Err(StoreError::InvalidConfig("num_blocks must be positive".into()));
        }
        for (field, size) in [
            ("data_block_size", self.data_block_size),
            ("index_block_size", self.index_block_size),
        ] {
            if size < MIN_BLOCK_SIZE || !size.is_power_of_two() {
                return Err(StoreError::InvalidConfig(format!(
                    "{field} {size} must be a power of two >= {MIN_BLOCK_SIZE}"
                )));
            }
        }
        // Power-of-two index blocks >= 64 are always divisible by the 16-byte
        // entry, but the invariant is format-level, so check it anyway.
        if self.index_block_size as usize % INDEX_ENTRY_SIZE != 0 {
            return Err(StoreError::InvalidConfig(format!(
                "index_block_size {} is not a multiple of the {INDEX_ENTRY_SIZE}-byte entry",
                self.index_block_size
            )));
        }
        Ok(())
    }

    /// Index entries that fit in one index block.
    pub fn entries_per_index_block(&self) -> u32 {
        self.index_block_size / INDEX_ENTRY_SIZE as u32
    }
}
