//! Fixed-width on-disk record codec.
//!
//! Three record types, all fields little-endian, no padding between fields:
//!
//! # Block header (24 bytes, at the start of every data block)
//!
//! ```text
//! Offset  Size  Field
//!    0      8   timestamp     first object's timestamp, ns (LE i64);
//!                             0 for continuation blocks
//!    8      4   data_len      bytes used after this header, per-object
//!                             headers included (LE u32)
//!   12      4   flags         0x1=primary 0x2=packed 0x4=continuation (LE u32)
//!   16      4   continuation  block number of the next block in a spanning
//!                             chain, 0 = none (LE u32)
//!   20      4   reserved      zero
//! ```
//!
//! # Object header (24 bytes, one per packed object)
//!
//! ```text
//! Offset  Size  Field
//!    0      8   timestamp     object timestamp, ns (LE i64)
//!    8      4   data_len      total object payload length in bytes (LE u32)
//!   12      4   flags         0x1=continuation 0x2=continues
//!                             0x4=last_in_block (LE u32)
//!   16      4   next_offset   in-block byte offset of the next object's
//!                             header, 0 = last (LE u32)
//!   20      4   reserved      zero
//! ```
//!
//! # Index entry (16 bytes, one per data block)
//!
//! ```text
//! Offset  Size  Field
//!    0      8   timestamp     first object's timestamp, ns (LE i64);
//!                             0 = continuation block or reclaimed slot
//!    8      4   block_num     data block number (LE u32)
//!   12      4   reserved      zero
//! ```
//!
//! Exactly one object header per packed block has `last_in_block` set, and
//! that object's `next_offset` is 0.  Continuation chains are linked by
//! block number, never by byte offset.

use byteorder::{ByteOrder, LittleEndian};

// ── Sizes ────────────────────────────────────────────────────────────────────

/// Byte size of the block header at the start of every data block.
pub const BLOCK_HEADER_SIZE: usize = 24;

/// Byte size of the per-object header inside packed blocks.
pub const OBJECT_HEADER_SIZE: usize = 24;

/// Byte size of one index entry.
pub const INDEX_ENTRY_SIZE: usize = 16;

// ── Block flags ──────────────────────────────────────────────────────────────

/// Block is named by an object handle (directly addressable).
pub const BLOCK_PRIMARY: u32 = 0x1;
/// Block carries per-object headers.
pub const BLOCK_PACKED: u32 = 0x2;
/// Block holds a non-first chunk of a spanning object.
pub const BLOCK_CONTINUATION: u32 = 0x4;

// ── Object flags ─────────────────────────────────────────────────────────────

/// Object chunk is a continuation of a previous block's object.
pub const OBJECT_CONTINUATION: u32 = 0x1;
/// Object payload continues into the next block of the chain.
pub const OBJECT_CONTINUES: u32 = 0x2;
/// Object is the last one in its block; its `next_offset` is 0.
pub const OBJECT_LAST_IN_BLOCK: u32 = 0x4;

// ── Block header ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockHeader {
    pub timestamp:    i64,
    pub data_len:     u32,
    pub flags:        u32,
    /// Next block in the spanning chain; 0 = chain ends here.
    pub continuation: u32,
}

impl BlockHeader {
    pub fn encode(&self) -> [u8; BLOCK_HEADER_SIZE] {
        let mut buf = [0u8; BLOCK_HEADER_SIZE];
        LittleEndian::write_i64(&mut buf[0..8], self.timestamp);
        LittleEndian::write_u32(&mut buf[8..12], self.data_len);
        LittleEndian::write_u32(&mut buf[12..16], self.flags);
        LittleEndian::write_u32(&mut buf[16..20], self.continuation);
        buf
    }

    pub fn decode(buf: &[u8]) -> Self {
        debug_assert!(buf.len() >= BLOCK_HEADER_SIZE);
        Self {
            timestamp:    LittleEndian::read_i64(&buf[0..8]),
            data_len:     LittleEndian::read_u32(&buf[8..12]),
            flags:        LittleEndian::read_u32(&buf[12..16]),
            continuation: LittleEndian::read_u32(&buf[16..20]),
        }
    }

    /// A slot that has never been written, or was zeroed on reclamation.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.flags == 0 && self.data_len == 0
    }

    #[inline]
    pub fn is_packed(&self) -> bool {
        self.flags & BLOCK_PACKED != 0
    }

    #[inline]
    pub fn is_continuation(&self) -> bool {
        self.flags & BLOCK_CONTINUATION != 0
    }
}

// ── Object header ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ObjectHeader {
    pub timestamp:   i64,
    /// Total payload length of the object, across all chain blocks.
    pub data_len:    u32,
    pub flags:       u32,
    /// In-block byte offset of the following object's header; 0 = last.
    pub next_offset: u32,
}

impl ObjectHeader {
    pub fn encode(&self) -> [u8; OBJECT_HEADER_SIZE] {
        let mut buf = [0u8; OBJECT_HEADER_SIZE];
        LittleEndian::write_i64(&mut buf[0..8], self.timestamp);
        LittleEndian::write_u32(&mut buf[8..12], self.data_len);
        LittleEndian::write_u32(&mut buf[12..16], self.flags);
        LittleEndian::write_u32(&mut buf[16..20], self.next_offset);
        buf
    }

    pub fn decode(buf: &[u8]) -> Self {
        debug_assert!(buf.len() >= OBJECT_HEADER_SIZE);
        Self {
            timestamp:   LittleEndian::read_i64(&buf[0..8]),
            data_len:    LittleEndian::read_u32(&buf[8..12]),
            flags:       LittleEndian::read_u32(&buf[12..16]),
            next_offset: LittleEndian::read_u32(&buf[16..20]),
        }
    }

    #[inline]
    pub fn continues(&self) -> bool {
        self.flags & OBJECT_CONTINUES != 0
    }

    #[inline]
    pub fn is_last_in_block(&self) -> bool {
        self.flags & OBJECT_LAST_IN_BLOCK != 0
    }
}

// ── Index entry ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IndexEntry {
    /// 0 marks a continuation block or a reclaimed slot.
    pub timestamp: i64,
    pub block_num: u32,
}

impl IndexEntry {
    pub fn encode(&self) -> [u8; INDEX_ENTRY_SIZE] {
        let mut buf = [0u8; INDEX_ENTRY_SIZE];
        LittleEndian::write_i64(&mut buf[0..8], self.timestamp);
        LittleEndian::write_u32(&mut buf[8..12], self.block_num);
        buf
    }

    pub fn decode(buf: &[u8]) -> Self {
        debug_assert!(buf.len() >= INDEX_ENTRY_SIZE);
        Self {
            timestamp: LittleEndian::read_i64(&buf[0..8]),
            block_num: LittleEndian::read_u32(&buf[8..12]),
        }
    }

    /// Continuation blocks and reclaimed slots are invisible to the search.
    #[inline]
    pub fn is_primary(&self) -> bool {
        self.timestamp != 0
    }
}
