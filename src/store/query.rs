//! Timestamp queries: binary search over the live index region.
//!
//! The index is a parallel array of 16-byte entries, circular like the data
//! file.  Queries work in logical-offset space: offset `k` maps to physical
//! block `(tail + k) % num_blocks`, and entry timestamps ascend with `k`.
//! Continuation blocks carry zero timestamps; the search resolves a zero
//! midpoint to the nearest primary entry before comparing, so it converges
//! on primary blocks only.
//!
//! Block-level search finds the block whose first object satisfies the
//! relation; the object-level operations then scan that block's packed
//! headers, which is bounded by the block size.

use crate::codec::IndexEntry;
use crate::error::{Result, StoreError};

use super::{Core, ObjectHandle};

impl Core {
    #[inline]
    fn entry_at(&self, k: u32) -> Result<IndexEntry> {
        self.read_index_entry(self.logical_to_block(k))
    }

    // ── Block-level binary search ────────────────────────────────────────────

    /// Greatest logical offset whose primary entry timestamp is <= `target`.
    fn search_last_le(&self, target: i64) -> Result<Option<u32>> {
        let count = self.live_count() as i64;
        let (mut lo, mut hi) = (0i64, count - 1);
        let mut best = None;
        while lo <= hi {
            let mid = lo + (hi - lo) / 2;
            // Resolve a continuation midpoint to the primary on its left.
            let mut m = mid;
            let mut entry = self.entry_at(m as u32)?;
            while !entry.is_primary() && m > lo {
                m -= 1;
                entry = self.entry_at(m as u32)?;
            }
            if !entry.is_primary() {
                // Only continuation entries in [lo, mid]; primaries are right.
                lo = mid + 1;
                continue;
            }
            if entry.timestamp <= target {
                best = Some(m as u32);
                lo = mid + 1;
            } else {
                hi = m - 1;
            }
        }
        Ok(best)
    }

    /// Smallest logical offset whose primary entry timestamp is >= `target`.
    fn search_first_ge(&self, target: i64) -> Result<Option<u32>> {
        let count = self.live_count() as i64;
        let (mut lo, mut hi) = (0i64, count - 1);
        let mut best = None;
        while lo <= hi {
            let mid = lo + (hi - lo) / 2;
            // Resolve a continuation midpoint to the primary on its right.
            let mut m = mid;
            let mut entry = self.entry_at(m as u32)?;
            while !entry.is_primary() && m < hi {
                m += 1;
                entry = self.entry_at(m as u32)?;
            }
            if !entry.is_primary() {
                // Only continuation entries in [mid, hi]; primaries are left.
                hi = mid - 1;
                continue;
            }
            if entry.timestamp >= target {
                best = Some(m as u32);
                hi = mid - 1;
            } else {
                lo = m + 1;
            }
        }
        Ok(best)
    }

    // ── Object-level operations ──────────────────────────────────────────────

    /// Exact lookup.  The candidate block is the newest one whose first
    /// object is not after `timestamp`; the match, if any, is inside it.
    pub(crate) fn get_by_time(&self, timestamp: i64) -> Result<(ObjectHandle, Vec<u8>)> {
        if self.is_empty() {
            return Err(StoreError::EmptyStore);
        }
        let k = self
            .search_last_le(timestamp)?
            .ok_or(StoreError::TimestampNotFound(timestamp))?;
        let block = self.logical_to_block(k);
        for (offset, header) in self.block_objects(block)? {
            if header.timestamp == timestamp {
                let payload = self.read_object(block, offset, &header)?;
                return Ok((self.handle_for(block, offset, &header), payload));
            }
        }
        Err(StoreError::TimestampNotFound(timestamp))
    }

    /// Newest live object with timestamp <= `timestamp`.
    pub(crate) fn find_last_le(&self, timestamp: i64) -> Result<ObjectHandle> {
        if self.is_empty() {
            return Err(StoreError::EmptyStore);
        }
        let k = self
            .search_last_le(timestamp)?
            .ok_or(StoreError::TimestampNotFound(timestamp))?;
        let block = self.logical_to_block(k);
        let mut best = None;
        for (offset, header) in self.block_objects(block)? {
            if header.timestamp <= timestamp {
                best = Some(self.handle_for(block, offset, &header));
            }
        }
        best.ok_or(StoreError::TimestampNotFound(timestamp))
    }

    /// Oldest live object with timestamp >= `timestamp`.
    pub(crate) fn find_first_ge(&self, timestamp: i64) -> Result<ObjectHandle> {
        if self.is_empty() {
            return Err(StoreError::EmptyStore);
        }
        // A match can hide inside the newest block whose first object is
        // still <= the target.
        if let Some(k) = self.search_last_le(timestamp)? {
            let block = self.logical_to_block(k);
            for (offset, header) in self.block_objects(block)? {
                if header.timestamp >= timestamp {
                    return Ok(self.handle_for(block, offset, &header));
                }
            }
        }
        // Otherwise it is the first object of the oldest block at or past
        // the target.
        let k = self
            .search_first_ge(timestamp)?
            .ok_or(StoreError::TimestampNotFound(timestamp))?;
        let block = self.logical_to_block(k);
        let objects = self.block_objects(block)?;
        let (offset, header) = objects[0];
        Ok(self.handle_for(block, offset, &header))
    }

    /// Up to `n` handles walking forward from the tail.
    pub(crate) fn get_oldest(&self, n: usize) -> Result<Vec<ObjectHandle>> {
        if self.is_empty() {
            return Err(StoreError::EmptyStore);
        }
        let mut out = Vec::new();
        for k in 0..self.live_count() {
            if out.len() >= n {
                break;
            }
            let entry = self.entry_at(k)?;
            if !entry.is_primary() {
                continue;
            }
            let block = self.logical_to_block(k);
            for (offset, header) in self.block_objects(block)? {
                if out.len() >= n {
                    break;
                }
                out.push(self.handle_for(block, offset, &header));
            }
        }
        Ok(out)
    }

    /// Up to `n` handles walking backward from the head, newest first.
    pub(crate) fn get_newest(&self, n: usize) -> Result<Vec<ObjectHandle>> {
        if self.is_empty() {
            return Err(StoreError::EmptyStore);
        }
        let mut out = Vec::new();
        for k in (0..self.live_count()).rev() {
            if out.len() >= n {
                break;
            }
            let entry = self.entry_at(k)?;
            if !entry.is_primary() {
                continue;
            }
            let block = self.logical_to_block(k);
            let objects = self.block_objects(block)?;
            for (offset, header) in objects.into_iter().rev() {
                if out.len() >= n {
                    break;
                }
                out.push(self.handle_for(block, offset, &header));
            }
        }
        Ok(out)
    }

    /// Handles with `lo <= timestamp <= hi`, oldest first, at most `limit`.
    pub(crate) fn get_in_range(&self, lo: i64, hi: i64, limit: usize) -> Result<Vec<ObjectHandle>> {
        if self.is_empty() {
            return Err(StoreError::EmptyStore);
        }
        let mut out = Vec::new();
        if lo > hi || limit == 0 {
            return Ok(out);
        }
        // Start at the newest block whose first object is not after `lo`;
        // older objects inside it are skipped by the range check.
        let start = self.search_last_le(lo)?.unwrap_or(0);
        for k in start..self.live_count() {
            let entry = self.entry_at(k)?;
            if !entry.is_primary() {
                continue;
            }
            let block = self.logical_to_block(k);
            for (offset, header) in self.block_objects(block)? {
                if header.timestamp < lo {
                    continue;
                }
                if header.timestamp > hi {
                    return Ok(out);
                }
                out.push(self.handle_for(block, offset, &header));
                if out.len() >= limit {
                    return Ok(out);
                }
            }
        }
        Ok(out)
    }
}
