//! Metadata record, the format anchor at offset 0 of `meta.tsdb`.
//!
//! # On-disk layout (64 bytes, all fields little-endian)
//!
//! ```text
//! Offset  Size  Field
//!    0      8   magic             = 0x545353544F524531 ("TSSTORE1", LE u64)
//!    8      4   format_version    = 1 (LE u32)
//!   12      4   num_blocks        (LE u32)
//!   16      4   data_block_size   (LE u32)
//!   20      4   index_block_size  (LE u32)
//!   24      4   head_block        newest primary-or-chain block (LE u32)
//!   28      4   tail_block        oldest live block (LE u32)
//!   32      4   write_offset      first free byte inside the head block,
//!                                 0 = head block empty (LE u32)
//!   36      1   data_type         0=binary 1=text 2=json 3=schema
//!   37     27   reserved          zero
//! ```
//!
//! The metadata write is the commit point of every `put`: block and index
//! bytes are persisted first, the record last.  Recovery reconciles the two
//! on open (see `recovery`).

use byteorder::{ByteOrder, LittleEndian};

use crate::config::{DataType, StoreConfig};
use crate::error::{Result, StoreError};

pub const MAGIC: u64 = 0x5453_5354_4F52_4531; // "TSSTORE1"
pub const FORMAT_VERSION: u32 = 1;
pub const METADATA_SIZE: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metadata {
    pub format_version:   u32,
    pub num_blocks:       u32,
    pub data_block_size:  u32,
    pub index_block_size: u32,
    pub head_block:       u32,
    pub tail_block:       u32,
    pub write_offset:     u32,
    pub data_type:        DataType,
}

impl Metadata {
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            format_version:   FORMAT_VERSION,
            num_blocks:       config.num_blocks,
            data_block_size:  config.data_block_size,
            index_block_size: config.index_block_size,
            head_block:       0,
            tail_block:       0,
            write_offset:     0,
            data_type:        config.data_type,
        }
    }

    pub fn encode(&self) -> [u8; METADATA_SIZE] {
        let mut buf = [0u8; METADATA_SIZE];
        LittleEndian::write_u64(&mut buf[0..8], MAGIC);
        LittleEndian::write_u32(&mut buf[8..12], self.format_version);
        LittleEndian::write_u32(&mut buf[12..16], self.num_blocks);
        LittleEndian::write_u32(&mut buf[16..20], self.data_block_size);
        LittleEndian::write_u32(&mut buf[20..24], self.index_block_size);
        LittleEndian::write_u32(&mut buf[24..28], self.head_block);
        LittleEndian::write_u32(&mut buf[28..32], self.tail_block);
        LittleEndian::write_u32(&mut buf[32..36], self.write_offset);
        buf[36] = self.data_type as u8;
        buf
    }

    /// Decode and validate a metadata record.
    ///
    /// Magic is checked first, then the format version, then field sanity;
    /// block pointers outside the declared geometry mean the record cannot
    /// be trusted and the open fails.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < METADATA_SIZE {
            return Err(StoreError::InvalidMagic);
        }

        let magic = LittleEndian::read_u64(&buf[0..8]);
        if magic != MAGIC {
            return Err(StoreError::InvalidMagic);
        }

        let format_version = LittleEndian::read_u32(&buf[8..12]);
        if format_version != FORMAT_VERSION {
            return Err(StoreError::VersionMismatch {
                found:     format_version,
                supported: FORMAT_VERSION,
            });
        }

        let num_blocks       = LittleEndian::read_u32(&buf[12..16]);
        let data_block_size  = LittleEndian::read_u32(&buf[16..20]);
        let index_block_size = LittleEndian::read_u32(&buf[20..24]);
        let head_block       = LittleEndian::read_u32(&buf[24..28]);
        let tail_block       = LittleEndian::read_u32(&buf[28..32]);
        let write_offset     = LittleEndian::read_u32(&buf[32..36]);

        let data_type = DataType::from_u8(buf[36]).ok_or_else(|| {
            StoreError::InvalidConfig(format!("unknown data_type tag {}", buf[36]))
        })?;

        if num_blocks == 0 {
            return Err(StoreError::InvalidConfig("metadata num_blocks is zero".into()));
        }
        if head_block >= num_blocks {
            return Err(StoreError::BlockOutOfRange { block: head_block, num_blocks });
        }
        if tail_block >= num_blocks {
            return Err(StoreError::BlockOutOfRange { block: tail_block, num_blocks });
        }

        Ok(Self {
            format_version,
            num_blocks,
            data_block_size,
            index_block_size,
            head_block,
            tail_block,
            write_offset,
            data_type,
        })
    }
}
