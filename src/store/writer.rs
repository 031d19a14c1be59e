//! Write path: object packing, spanning chains, and the circular allocator.
//!
//! A `put` takes one of three routes:
//!
//! 1. **Append** — the object fits in the free space of the head block,
//!    behind the current last object.
//! 2. **New block** — the object fits in a single fresh block.
//! 3. **Spanning chain** — the object is split across consecutive blocks
//!    linked by the block headers' continuation pointers.
//!
//! Allocating past the tail reclaims the oldest block together with its
//! whole continuation chain.  All block and index bytes are written before
//! the metadata record: the metadata write is the commit point, and
//! recovery resolves anything in between.
//!
//! A spanning write finalises its last block by setting `write_offset` to
//! the block size, so the next object always opens a new block and the
//! invariant `write_offset == 0 iff head block empty` is preserved.

use log::{debug, trace};

use crate::codec::{
    BlockHeader, IndexEntry, ObjectHeader, BLOCK_CONTINUATION, BLOCK_HEADER_SIZE,
    BLOCK_PACKED, BLOCK_PRIMARY, OBJECT_CONTINUES, OBJECT_HEADER_SIZE,
    OBJECT_LAST_IN_BLOCK,
};
use crate::error::{Result, StoreError};
use crate::files::StoreFiles;

use super::{Core, ObjectHandle};

impl Core {
    /// Store one object.  See [`Store::put`](crate::Store::put).
    pub(crate) fn put(&mut self, timestamp: i64, data: &[u8]) -> Result<ObjectHandle> {
        if timestamp <= 0 {
            return Err(StoreError::InvalidTimestamp(timestamp));
        }
        if timestamp <= self.last_timestamp {
            return Err(StoreError::TimestampOutOfOrder {
                ts:     timestamp,
                newest: self.last_timestamp,
            });
        }

        let handle = match self.write_object(timestamp, data) {
            Ok(handle) => handle,
            Err(e) => {
                // A failed write leaves no metadata commit; restore the
                // in-memory state to match the last committed record so the
                // handle stays usable after a transient I/O error.
                if let Ok(meta) = self.files.read_metadata() {
                    self.meta = meta;
                    let _ = self.load_write_state();
                }
                return Err(e);
            }
        };

        self.last_timestamp = timestamp;
        self.persist_metadata()?;
        Ok(handle)
    }

    fn write_object(&mut self, timestamp: i64, data: &[u8]) -> Result<ObjectHandle> {
        let block_size = self.block_size();
        let obj_size = OBJECT_HEADER_SIZE + data.len();
        let write_offset = self.meta.write_offset as usize;

        if write_offset > 0
            && self.last_object_offset != 0
            && write_offset + obj_size <= block_size
        {
            self.append_to_head(timestamp, data)
        } else if BLOCK_HEADER_SIZE + obj_size <= block_size {
            self.open_new_block(timestamp, data)
        } else {
            self.write_spanning(timestamp, data)
        }
    }

    // ── Path 1: append to the head block ─────────────────────────────────────

    fn append_to_head(&mut self, timestamp: i64, data: &[u8]) -> Result<ObjectHandle> {
        let head = self.meta.head_block;
        let offset = self.meta.write_offset;
        let obj_size = (OBJECT_HEADER_SIZE + data.len()) as u32;
        trace!("append ts {timestamp} to block {head} at offset {offset}");

        // New object first: until the previous header is rethreaded and the
        // block length grows, these bytes are invisible and a crash leaves
        // the old block state intact.
        let object = ObjectHeader {
            timestamp,
            data_len:    data.len() as u32,
            flags:       OBJECT_LAST_IN_BLOCK,
            next_offset: 0,
        };
        let mut buf = Vec::with_capacity(obj_size as usize);
        buf.extend_from_slice(&object.encode());
        buf.extend_from_slice(data);
        let base = StoreFiles::block_offset(head, self.meta.data_block_size);
        self.files.write_data_at(base + offset as u64, &buf)?;

        // Thread the previous last object onto the new one.
        let prev_offset = self.last_object_offset;
        let mut prev = self.read_object_header(head, prev_offset)?;
        prev.flags &= !OBJECT_LAST_IN_BLOCK;
        prev.next_offset = offset;
        self.write_object_header(head, prev_offset, &prev)?;

        // The block header keeps its first-object timestamp; only the used
        // length grows.
        let mut block = self.read_block_header(head)?;
        block.data_len = offset + obj_size - BLOCK_HEADER_SIZE as u32;
        self.write_block_header(head, &block)?;

        self.meta.write_offset = offset + obj_size;
        self.last_object_offset = offset;

        Ok(ObjectHandle {
            timestamp,
            block_num:  head,
            offset,
            size:       data.len() as u32,
            span_count: 1,
        })
    }

    // ── Path 2: open a new block ─────────────────────────────────────────────

    fn open_new_block(&mut self, timestamp: i64, data: &[u8]) -> Result<ObjectHandle> {
        let block_num = self.allocate_block()?;
        let obj_size = (OBJECT_HEADER_SIZE + data.len()) as u32;
        trace!("new block {block_num} for ts {timestamp} ({} B)", data.len());

        let block = BlockHeader {
            timestamp,
            data_len:     obj_size,
            flags:        BLOCK_PRIMARY | BLOCK_PACKED,
            continuation: 0,
        };
        let object = ObjectHeader {
            timestamp,
            data_len:    data.len() as u32,
            flags:       OBJECT_LAST_IN_BLOCK,
            next_offset: 0,
        };

        let mut buf = Vec::with_capacity(BLOCK_HEADER_SIZE + obj_size as usize);
        buf.extend_from_slice(&block.encode());
        buf.extend_from_slice(&object.encode());
        buf.extend_from_slice(data);
        let base = StoreFiles::block_offset(block_num, self.meta.data_block_size);
        self.files.write_data_at(base, &buf)?;

        self.write_index_entry(&IndexEntry { timestamp, block_num })?;

        self.meta.head_block = block_num;
        self.meta.write_offset = BLOCK_HEADER_SIZE as u32 + obj_size;
        self.last_object_offset = BLOCK_HEADER_SIZE as u32;

        Ok(ObjectHandle {
            timestamp,
            block_num,
            offset:     BLOCK_HEADER_SIZE as u32,
            size:       data.len() as u32,
            span_count: 1,
        })
    }

    // ── Path 3: spanning chain ───────────────────────────────────────────────

    fn write_spanning(&mut self, timestamp: i64, data: &[u8]) -> Result<ObjectHandle> {
        let block_size = self.block_size();
        let first_capacity = block_size - BLOCK_HEADER_SIZE - OBJECT_HEADER_SIZE;
        let cont_capacity = block_size - BLOCK_HEADER_SIZE;

        let span = self.span_count_for(data.len());
        if span > self.num_blocks().saturating_sub(1) {
            return Err(StoreError::ObjectTooLarge {
                size:     data.len(),
                capacity: self.max_object_size(),
            });
        }
        trace!("spanning write ts {timestamp}, {} B over {span} blocks", data.len());

        // First block carries the sole object header with the total length.
        let first_block = self.allocate_block()?;
        let chunk = &data[..first_capacity];
        let block = BlockHeader {
            timestamp,
            data_len:     (OBJECT_HEADER_SIZE + chunk.len()) as u32,
            flags:        BLOCK_PRIMARY | BLOCK_PACKED,
            continuation: 0,
        };
        let object = ObjectHeader {
            timestamp,
            data_len:    data.len() as u32,
            flags:       OBJECT_CONTINUES | OBJECT_LAST_IN_BLOCK,
            next_offset: 0,
        };
        let mut buf = Vec::with_capacity(block_size);
        buf.extend_from_slice(&block.encode());
        buf.extend_from_slice(&object.encode());
        buf.extend_from_slice(chunk);
        let base = StoreFiles::block_offset(first_block, self.meta.data_block_size);
        self.files.write_data_at(base, &buf)?;
        self.write_index_entry(&IndexEntry { timestamp, block_num: first_block })?;

        self.meta.head_block = first_block;
        // Chain blocks are finalised; nothing ever packs behind them.
        self.meta.write_offset = block_size as u32;
        self.last_object_offset = 0;

        // Continuation blocks: raw payload behind the block header, linked
        // from the previous block, invisible to the index (timestamp 0).
        let mut prev_block = first_block;
        let mut prev_header = block;
        let mut written = first_capacity;
        while written < data.len() {
            let end = (written + cont_capacity).min(data.len());
            let chunk = &data[written..end];
            let block_num = self.allocate_block()?;

            let header = BlockHeader {
                timestamp:    0,
                data_len:     chunk.len() as u32,
                flags:        BLOCK_PRIMARY | BLOCK_PACKED | BLOCK_CONTINUATION,
                continuation: 0,
            };
            let mut buf = Vec::with_capacity(BLOCK_HEADER_SIZE + chunk.len());
            buf.extend_from_slice(&header.encode());
            buf.extend_from_slice(chunk);
            let base = StoreFiles::block_offset(block_num, self.meta.data_block_size);
            self.files.write_data_at(base, &buf)?;
            self.write_index_entry(&IndexEntry { timestamp: 0, block_num })?;

            prev_header.continuation = block_num;
            self.write_block_header(prev_block, &prev_header)?;

            self.meta.head_block = block_num;
            prev_block = block_num;
            prev_header = header;
            written = end;
        }

        Ok(ObjectHandle {
            timestamp,
            block_num:  first_block,
            offset:     BLOCK_HEADER_SIZE as u32,
            size:       data.len() as u32,
            span_count: span,
        })
    }

    // ── Allocation ───────────────────────────────────────────────────────────

    /// Next block number for a write.  The first write after creation uses
    /// the head slot itself; afterwards the slot after the head, reclaiming
    /// the tail when the buffer is full.
    fn allocate_block(&mut self) -> Result<u32> {
        if self.is_empty() {
            return Ok(self.meta.head_block);
        }
        let next = (self.meta.head_block + 1) % self.num_blocks();
        if next == self.meta.tail_block {
            self.reclaim_tail()?;
        }
        Ok(next)
    }

    /// Free the tail block and any continuation chain it owns.
    ///
    /// Freed slots get their index entry and block header zeroed.  Recovery
    /// treats any nonzero header past the head as a committed write, so
    /// stale bytes must not survive in reclaimed slots.  Returns the number
    /// of blocks freed.
    pub(crate) fn reclaim_tail(&mut self) -> Result<u32> {
        let n = self.num_blocks();
        let mut tail = self.meta.tail_block;
        let entry = self.read_index_entry(tail)?;
        debug!("reclaiming tail block {tail} (ts {})", entry.timestamp);

        self.clear_index_entry(tail)?;
        self.zero_block_header(tail)?;
        tail = (tail + 1) % n;
        let mut freed = 1u32;

        while tail != self.meta.head_block && freed < n {
            let entry = self.read_index_entry(tail)?;
            if entry.is_primary() {
                break;
            }
            let header = self.read_block_header(tail)?;
            if !header.is_continuation() {
                break;
            }
            self.clear_index_entry(tail)?;
            self.zero_block_header(tail)?;
            tail = (tail + 1) % n;
            freed += 1;
        }

        self.meta.tail_block = tail;
        Ok(freed)
    }

    // ── Explicit deletion ────────────────────────────────────────────────────

    /// Reclaim tail blocks whose objects are all strictly older than
    /// `timestamp`.  See [`Store::delete_before`](crate::Store::delete_before).
    pub(crate) fn delete_before(&mut self, timestamp: i64) -> Result<u32> {
        if timestamp <= 0 {
            return Err(StoreError::InvalidTimestamp(timestamp));
        }
        let mut freed = 0u32;
        while !self.is_empty() {
            let tail = self.meta.tail_block;
            if tail == self.meta.head_block {
                break;
            }
            let entry = self.read_index_entry(tail)?;
            if entry.is_primary() {
                let objects = self.block_objects(tail)?;
                let (_, last) = objects[objects.len() - 1];
                if last.timestamp >= timestamp {
                    break;
                }
                // A chain covering the whole live region ends at the head
                // block, which is never reclaimed.
                if objects.len() == 1 && last.continues() {
                    let span = self.span_count_for(last.data_len as usize);
                    if span >= self.live_count() {
                        break;
                    }
                }
            }
            freed += self.reclaim_tail()?;
        }
        if freed > 0 {
            self.persist_metadata()?;
            debug!("delete_before({timestamp}) freed {freed} blocks");
        }
        Ok(freed)
    }

    /// Drop all objects and return to the freshly-created state.
    pub(crate) fn reset(&mut self) -> Result<()> {
        debug!("resetting store {}", self.dir.display());
        self.files.zero_blocks()?;
        self.meta.head_block = 0;
        self.meta.tail_block = 0;
        self.meta.write_offset = 0;
        self.persist_metadata()?;
        self.files.sync()?;
        self.last_timestamp = 0;
        self.last_object_offset = 0;
        Ok(())
    }

    // ── Capacity arithmetic ──────────────────────────────────────────────────

    /// Blocks a payload of `len` bytes occupies.
    pub(crate) fn span_count_for(&self, len: usize) -> u32 {
        let block_size = self.block_size();
        let first_capacity = block_size - BLOCK_HEADER_SIZE - OBJECT_HEADER_SIZE;
        if len <= first_capacity {
            return 1;
        }
        let cont_capacity = block_size - BLOCK_HEADER_SIZE;
        1 + (len - first_capacity).div_ceil(cont_capacity) as u32
    }

    /// Largest payload a spanning chain can hold, leaving at least one block
    /// outside the chain.
    fn max_object_size(&self) -> usize {
        let block_size = self.block_size();
        let first_capacity = block_size - BLOCK_HEADER_SIZE - OBJECT_HEADER_SIZE;
        let cont_capacity = block_size - BLOCK_HEADER_SIZE;
        match self.num_blocks() {
            0 | 1 => first_capacity,
            n => first_capacity + (n as usize - 2) * cont_capacity,
        }
    }
}
