//! Read path: handle resolution, packed-block scans, chain reassembly.
//!
//! A handle is resolved by re-reading the per-object header it points at
//! and comparing timestamps; a mismatch means the block was reclaimed and
//! rewritten since the handle was issued.  Spanning objects are reassembled
//! by walking the continuation pointers, taking `min(remaining, data_len)`
//! bytes from each block.  A chain that runs out before the object's
//! declared size is corrupt and reports `ObjectNotFound`.

use crate::codec::{ObjectHeader, BLOCK_HEADER_SIZE, OBJECT_HEADER_SIZE};
use crate::error::{Result, StoreError};
use crate::files::StoreFiles;

use super::{Core, ObjectHandle};

impl Core {
    /// Resolve a handle to its payload bytes.
    pub(crate) fn get(&self, handle: &ObjectHandle) -> Result<Vec<u8>> {
        self.check_block(handle.block_num)?;
        if self.is_empty() {
            return Err(StoreError::ObjectNotFound);
        }

        if handle.offset == 0 {
            return self.read_legacy_block(handle);
        }

        if handle.offset as usize + OBJECT_HEADER_SIZE > self.block_size() {
            return Err(StoreError::ObjectNotFound);
        }
        let header = self.read_object_header(handle.block_num, handle.offset)?;
        if header.timestamp != handle.timestamp {
            // Slot was reclaimed and rewritten since the handle was issued.
            return Err(StoreError::ObjectNotFound);
        }
        self.read_object(handle.block_num, handle.offset, &header)
    }

    /// Payload bytes of an object whose header has already been read.
    pub(crate) fn read_object(
        &self,
        block: u32,
        offset: u32,
        header: &ObjectHeader,
    ) -> Result<Vec<u8>> {
        if header.continues() {
            return self.read_chain(block, header);
        }
        let len = header.data_len as usize;
        if offset as usize + OBJECT_HEADER_SIZE + len > self.block_size() {
            return Err(StoreError::ObjectNotFound);
        }
        let mut buf = vec![0u8; len];
        let base = StoreFiles::block_offset(block, self.meta.data_block_size);
        self.files
            .read_data_at(base + offset as u64 + OBJECT_HEADER_SIZE as u64, &mut buf)?;
        Ok(buf)
    }

    /// Reassemble a spanning object starting at its primary block.
    fn read_chain(&self, first_block: u32, object: &ObjectHeader) -> Result<Vec<u8>> {
        let total = object.data_len as usize;
        let mut out = Vec::with_capacity(total);

        // First block: payload sits behind the sole object header; the block
        // header's data_len covers the object header plus the first chunk.
        let block = self.read_block_header(first_block)?;
        let first_chunk = (block.data_len as usize)
            .checked_sub(OBJECT_HEADER_SIZE)
            .ok_or(StoreError::ObjectNotFound)?
            .min(total);
        let base = StoreFiles::block_offset(first_block, self.meta.data_block_size);
        let mut buf = vec![0u8; first_chunk];
        self.files.read_data_at(
            base + (BLOCK_HEADER_SIZE + OBJECT_HEADER_SIZE) as u64,
            &mut buf,
        )?;
        out.extend_from_slice(&buf);

        let mut remaining = total - first_chunk;
        let mut next = block.continuation;
        let mut steps = 0u32;
        while remaining > 0 {
            // Chain shorter than the object's declared size.
            if next == 0 || steps >= self.num_blocks() {
                return Err(StoreError::ObjectNotFound);
            }
            self.check_block(next)?;
            let header = self.read_block_header(next)?;
            if !header.is_continuation() {
                return Err(StoreError::ObjectNotFound);
            }
            let chunk = (header.data_len as usize).min(remaining);
            let base = StoreFiles::block_offset(next, self.meta.data_block_size);
            let mut buf = vec![0u8; chunk];
            self.files
                .read_data_at(base + BLOCK_HEADER_SIZE as u64, &mut buf)?;
            out.extend_from_slice(&buf);

            remaining -= chunk;
            next = header.continuation;
            steps += 1;
        }
        Ok(out)
    }

    /// Whole-block object without per-object headers (`offset == 0` handles
    /// written by pre-packing versions of the format).
    fn read_legacy_block(&self, handle: &ObjectHandle) -> Result<Vec<u8>> {
        let block = self.read_block_header(handle.block_num)?;
        if block.is_empty() || block.is_continuation() || block.timestamp != handle.timestamp {
            return Err(StoreError::ObjectNotFound);
        }
        let len = (block.data_len as usize).min(self.block_size() - BLOCK_HEADER_SIZE);
        let base = StoreFiles::block_offset(handle.block_num, self.meta.data_block_size);
        let mut buf = vec![0u8; len];
        self.files
            .read_data_at(base + BLOCK_HEADER_SIZE as u64, &mut buf)?;
        Ok(buf)
    }

    /// Build the caller-facing handle for an object found by scanning.
    pub(crate) fn handle_for(&self, block: u32, offset: u32, header: &ObjectHeader) -> ObjectHandle {
        let span_count = if header.continues() {
            self.span_count_for(header.data_len as usize)
        } else {
            1
        };
        ObjectHandle {
            timestamp: header.timestamp,
            block_num: block,
            offset,
            size: header.data_len,
            span_count,
        }
    }
}
