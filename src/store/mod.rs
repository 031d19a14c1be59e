//! The [`Store`] handle, the primary embedding surface.
//!
//! ```no_run
//! use tsstore::{Store, StoreConfig};
//!
//! let mut config = StoreConfig::new("/var/lib/tsdb", "sensors");
//! config.num_blocks = 256;
//! let store = Store::create(config)?;
//! let handle = store.put(1_700_000_000_000_000_000, br#"{"temp":21.5}"#)?;
//! assert_eq!(store.get(&handle)?, br#"{"temp":21.5}"#);
//! store.close()?;
//! # Ok::<(), tsstore::StoreError>(())
//! ```
//!
//! One open handle serves any number of threads.  A single readers-writer
//! lock provides the exclusion model: lookups and queries share the lock,
//! mutations (`put`, `delete_before`, `reset`, schema updates) take it
//! exclusively.  Nothing suspends while holding the lock except positional
//! file I/O itself.

mod reader;
mod writer;
mod query;

use std::path::PathBuf;
use std::sync::{PoisonError, RwLock};

use log::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::codec::{
    IndexEntry, ObjectHeader, BlockHeader, BLOCK_HEADER_SIZE, INDEX_ENTRY_SIZE,
    OBJECT_HEADER_SIZE,
};
use crate::config::{DataType, StoreConfig};
use crate::error::{Result, StoreError};
use crate::files::{self, StoreFiles, CONNECTIONS_FILE, SCHEMA_FILE};
use crate::metadata::Metadata;
use crate::recovery;
use crate::schema::{Schema, SchemaSet};

// ── ObjectHandle ─────────────────────────────────────────────────────────────

/// Opaque reference to one stored object.
///
/// Handles are ephemeral: they stay valid until the referenced block is
/// reclaimed by the circular allocator, after which [`Store::get`] reports
/// `ObjectNotFound`.  The JSON form is the external-caller surface; `offset`
/// is 0 for legacy single-object blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectHandle {
    /// Object timestamp in nanoseconds.
    pub timestamp:  i64,
    /// First (primary) block of the object.
    pub block_num:  u32,
    /// In-block byte offset of the per-object header.
    #[serde(default)]
    pub offset:     u32,
    /// Payload size in bytes.
    pub size:       u32,
    /// Blocks occupied, 1 for non-spanning objects.
    pub span_count: u32,
}

// ── StoreStats ───────────────────────────────────────────────────────────────

/// Point-in-time store statistics, serialisable for external callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStats {
    pub data_type:        DataType,
    pub num_blocks:       u32,
    pub live_blocks:      u32,
    pub head_block:       u32,
    pub tail_block:       u32,
    pub write_offset:     u32,
    /// 0 when the store is empty.
    pub oldest_timestamp: i64,
    /// 0 when the store is empty.
    pub newest_timestamp: i64,
    pub disk_bytes:       u64,
}

// ── Core ─────────────────────────────────────────────────────────────────────

/// Engine state guarded by the store lock.
pub(crate) struct Core {
    pub(crate) dir:   PathBuf,
    pub(crate) files: StoreFiles,
    pub(crate) meta:  Metadata,
    pub(crate) schema: Option<SchemaSet>,
    /// Newest persisted object timestamp; 0 when the store is empty.
    pub(crate) last_timestamp: i64,
    /// Offset of the last object header in the head block, 0 when the head
    /// block cannot take another packed object.
    pub(crate) last_object_offset: u32,
}

impl Core {
    // ── Geometry ─────────────────────────────────────────────────────────────

    #[inline]
    pub(crate) fn block_size(&self) -> usize {
        self.meta.data_block_size as usize
    }

    #[inline]
    pub(crate) fn num_blocks(&self) -> u32 {
        self.meta.num_blocks
    }

    /// `write_offset == 0` iff the head block holds no data, which is the
    /// empty-store condition when head and tail coincide.
    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.meta.head_block == self.meta.tail_block && self.meta.write_offset == 0
    }

    /// Blocks in the live region `[tail, head]` modulo `num_blocks`.
    pub(crate) fn live_count(&self) -> u32 {
        if self.is_empty() {
            return 0;
        }
        let n = self.num_blocks();
        (self.meta.head_block + n - self.meta.tail_block) % n + 1
    }

    /// Physical block for logical offset `k` from the tail.
    #[inline]
    pub(crate) fn logical_to_block(&self, k: u32) -> u32 {
        (self.meta.tail_block + k) % self.num_blocks()
    }

    pub(crate) fn check_block(&self, block: u32) -> Result<()> {
        if block >= self.num_blocks() {
            return Err(StoreError::BlockOutOfRange {
                block,
                num_blocks: self.num_blocks(),
            });
        }
        Ok(())
    }

    // ── Block / index primitives ─────────────────────────────────────────────

    pub(crate) fn read_block_header(&self, block: u32) -> Result<BlockHeader> {
        let mut buf = [0u8; BLOCK_HEADER_SIZE];
        let off = StoreFiles::block_offset(block, self.meta.data_block_size);
        self.files.read_data_at(off, &mut buf)?;
        Ok(BlockHeader::decode(&buf))
    }

    pub(crate) fn write_block_header(&self, block: u32, header: &BlockHeader) -> Result<()> {
        let off = StoreFiles::block_offset(block, self.meta.data_block_size);
        self.files.write_data_at(off, &header.encode())
    }

    pub(crate) fn zero_block_header(&self, block: u32) -> Result<()> {
        let off = StoreFiles::block_offset(block, self.meta.data_block_size);
        self.files.write_data_at(off, &[0u8; BLOCK_HEADER_SIZE])
    }

    pub(crate) fn read_index_entry(&self, block: u32) -> Result<IndexEntry> {
        let mut buf = [0u8; INDEX_ENTRY_SIZE];
        self.files.read_index_at(StoreFiles::index_offset(block), &mut buf)?;
        Ok(IndexEntry::decode(&buf))
    }

    pub(crate) fn write_index_entry(&self, entry: &IndexEntry) -> Result<()> {
        self.files
            .write_index_at(StoreFiles::index_offset(entry.block_num), &entry.encode())
    }

    pub(crate) fn clear_index_entry(&self, block: u32) -> Result<()> {
        self.files
            .write_index_at(StoreFiles::index_offset(block), &[0u8; INDEX_ENTRY_SIZE])
    }

    pub(crate) fn read_object_header(&self, block: u32, offset: u32) -> Result<ObjectHeader> {
        let mut buf = [0u8; OBJECT_HEADER_SIZE];
        let off = StoreFiles::block_offset(block, self.meta.data_block_size) + offset as u64;
        self.files.read_data_at(off, &mut buf)?;
        Ok(ObjectHeader::decode(&buf))
    }

    pub(crate) fn write_object_header(
        &self,
        block: u32,
        offset: u32,
        header: &ObjectHeader,
    ) -> Result<()> {
        let off = StoreFiles::block_offset(block, self.meta.data_block_size) + offset as u64;
        self.files.write_data_at(off, &header.encode())
    }

    /// All object headers of a packed block in `next_offset` order, with
    /// their in-block offsets.  Bounded by the block geometry so a corrupt
    /// `next_offset` loop cannot spin.
    pub(crate) fn block_objects(&self, block: u32) -> Result<Vec<(u32, ObjectHeader)>> {
        let max_objects = self.block_size() / OBJECT_HEADER_SIZE + 1;
        let mut out = Vec::new();
        let mut offset = BLOCK_HEADER_SIZE as u32;

        loop {
            if out.len() >= max_objects || offset as usize + OBJECT_HEADER_SIZE > self.block_size()
            {
                return Err(StoreError::ObjectNotFound);
            }
            let header = self.read_object_header(block, offset)?;
            let next = header.next_offset;
            let last = header.is_last_in_block() || next == 0;
            out.push((offset, header));
            if last {
                return Ok(out);
            }
            if next <= offset {
                // next_offset must move forward within the block
                return Err(StoreError::ObjectNotFound);
            }
            offset = next;
        }
    }

    pub(crate) fn persist_metadata(&self) -> Result<()> {
        self.files.write_metadata(&self.meta)
    }

    // ── Open-time state ──────────────────────────────────────────────────────

    /// Rebuild the in-memory write state (newest timestamp, last object
    /// offset) from the block contents.  Runs after recovery on every open.
    pub(crate) fn load_write_state(&mut self) -> Result<()> {
        self.last_timestamp = 0;
        self.last_object_offset = 0;
        if self.is_empty() {
            return Ok(());
        }

        // Walk back from the head to the newest primary block; the head may
        // be the tail end of a spanning chain (zero index entry).
        let count = self.live_count();
        let n = self.num_blocks();
        for back in 0..count {
            let block = (self.meta.head_block + n - back) % n;
            let entry = self.read_index_entry(block)?;
            if !entry.is_primary() {
                continue;
            }
            let objects = self.block_objects(block)?;
            if let Some((offset, header)) = objects.last() {
                self.last_timestamp = header.timestamp;
                if block == self.meta.head_block && !header.continues() {
                    self.last_object_offset = *offset;
                }
            }
            return Ok(());
        }
        Ok(())
    }

    // ── Stats ────────────────────────────────────────────────────────────────

    pub(crate) fn stats(&self) -> Result<StoreStats> {
        let mut oldest = 0i64;
        if !self.is_empty() {
            // The tail normally points at a primary block; skip forward past
            // any slot recovery left zeroed.
            for k in 0..self.live_count() {
                let entry = self.read_index_entry(self.logical_to_block(k))?;
                if entry.is_primary() {
                    oldest = entry.timestamp;
                    break;
                }
            }
        }
        let disk_bytes = self.files.data.metadata()?.len()
            + self.files.index.metadata()?.len()
            + self.files.meta.metadata()?.len();

        Ok(StoreStats {
            data_type:        self.meta.data_type,
            num_blocks:       self.meta.num_blocks,
            live_blocks:      self.live_count(),
            head_block:       self.meta.head_block,
            tail_block:       self.meta.tail_block,
            write_offset:     self.meta.write_offset,
            oldest_timestamp: oldest,
            newest_timestamp: self.last_timestamp,
            disk_bytes,
        })
    }
}

// ── Store ────────────────────────────────────────────────────────────────────

/// An open time-series store.  See the module docs for the exclusion model.
pub struct Store {
    inner: RwLock<Option<Core>>,
}

impl Store {
    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Create a new store directory and preallocate its files.
    ///
    /// Fails with `StoreExists` if `path/name` already exists.  The created
    /// store is immediately open; the metadata record is flushed before the
    /// handle is returned so a crash cannot leave a half-created store.
    pub fn create(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let dir = files::store_dir(&config.path, &config.name);
        if dir.exists() {
            return Err(StoreError::StoreExists(dir.display().to_string()));
        }

        let store_files = StoreFiles::create(&dir, &config)?;
        let meta = Metadata::new(&config);
        store_files.write_metadata(&meta)?;
        store_files.sync()?;

        let core = Core {
            dir,
            files: store_files,
            meta,
            schema: None,
            last_timestamp: 0,
            last_object_offset: 0,
        };
        Ok(Self { inner: RwLock::new(Some(core)) })
    }

    /// Open an existing store.
    ///
    /// Validates the metadata magic and format version, loads the schema set
    /// for schema-typed stores, and runs crash recovery before any request
    /// is served.
    pub fn open(path: &str, name: &str) -> Result<Self> {
        let dir = files::store_dir(path, name);
        let store_files = StoreFiles::open(&dir)?;
        let meta = store_files.read_metadata()?;

        let schema = if meta.data_type == DataType::Schema {
            SchemaSet::load(&dir.join(SCHEMA_FILE))?
        } else {
            None
        };

        let mut core = Core {
            dir,
            files: store_files,
            meta,
            schema,
            last_timestamp: 0,
            last_object_offset: 0,
        };
        recovery::recover(&mut core)?;
        core.load_write_state()?;
        debug!(
            "opened store {} ({} live blocks, newest ts {})",
            core.dir.display(),
            core.live_count(),
            core.last_timestamp
        );
        Ok(Self { inner: RwLock::new(Some(core)) })
    }

    /// Recursively delete a store directory.  The store must not be open.
    pub fn delete(path: &str, name: &str) -> Result<()> {
        files::delete_store(path, name)
    }

    /// Flush metadata and fsync all files, then release the handle.  Any
    /// later operation reports `StoreClosed`.
    pub fn close(&self) -> Result<()> {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        match guard.take() {
            Some(core) => {
                core.persist_metadata()?;
                core.files.sync()?;
                debug!("closed store {}", core.dir.display());
                Ok(())
            }
            None => Err(StoreError::StoreClosed),
        }
    }

    /// Flush all three files to stable storage without closing.
    pub fn sync(&self) -> Result<()> {
        self.with_read(|core| core.files.sync())
    }

    // ── Lock plumbing ────────────────────────────────────────────────────────

    fn with_read<T>(&self, f: impl FnOnce(&Core) -> Result<T>) -> Result<T> {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let core = guard.as_ref().ok_or(StoreError::StoreClosed)?;
        f(core)
    }

    fn with_write<T>(&self, f: impl FnOnce(&mut Core) -> Result<T>) -> Result<T> {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let core = guard.as_mut().ok_or(StoreError::StoreClosed)?;
        f(core)
    }

    // ── Write path ───────────────────────────────────────────────────────────

    /// Store one object.  Timestamps must be positive and strictly greater
    /// than the newest stored timestamp.
    pub fn put(&self, timestamp: i64, data: &[u8]) -> Result<ObjectHandle> {
        self.with_write(|core| core.put(timestamp, data))
    }

    /// Reclaim whole tail blocks holding only objects strictly older than
    /// `timestamp`.  Returns the number of blocks freed.  The head block is
    /// never reclaimed.
    pub fn delete_before(&self, timestamp: i64) -> Result<u32> {
        self.with_write(|core| core.delete_before(timestamp))
    }

    /// Drop every stored object and return to the freshly-created state.
    /// Geometry and schema are preserved.
    pub fn reset(&self) -> Result<()> {
        self.with_write(|core| core.reset())
    }

    // ── Read path ────────────────────────────────────────────────────────────

    /// Resolve a handle to its payload bytes.
    pub fn get(&self, handle: &ObjectHandle) -> Result<Vec<u8>> {
        self.with_read(|core| core.get(handle))
    }

    /// Exact-timestamp lookup.
    pub fn get_by_time(&self, timestamp: i64) -> Result<(ObjectHandle, Vec<u8>)> {
        self.with_read(|core| core.get_by_time(timestamp))
    }

    /// Up to `n` handles starting from the oldest live object.
    pub fn get_oldest(&self, n: usize) -> Result<Vec<ObjectHandle>> {
        self.with_read(|core| core.get_oldest(n))
    }

    /// Up to `n` handles starting from the newest live object, newest first.
    pub fn get_newest(&self, n: usize) -> Result<Vec<ObjectHandle>> {
        self.with_read(|core| core.get_newest(n))
    }

    /// Handles for objects with `lo <= timestamp <= hi`, oldest first,
    /// capped at `limit`.
    pub fn get_in_range(&self, lo: i64, hi: i64, limit: usize) -> Result<Vec<ObjectHandle>> {
        self.with_read(|core| core.get_in_range(lo, hi, limit))
    }

    /// Oldest live object with timestamp >= `timestamp`.
    pub fn find_first_ge(&self, timestamp: i64) -> Result<ObjectHandle> {
        self.with_read(|core| core.find_first_ge(timestamp))
    }

    /// Newest live object with timestamp <= `timestamp`.
    pub fn find_last_le(&self, timestamp: i64) -> Result<ObjectHandle> {
        self.with_read(|core| core.find_last_le(timestamp))
    }

    pub fn stats(&self) -> Result<StoreStats> {
        self.with_read(|core| core.stats())
    }

    pub fn data_type(&self) -> Result<DataType> {
        self.with_read(|core| Ok(core.meta.data_type))
    }

    // ── Schema operations (schema-typed stores only) ─────────────────────────

    /// Append a schema version.  Version 1 establishes the field set; later
    /// versions may only add fields.
    pub fn set_schema(&self, schema: Schema) -> Result<()> {
        self.with_write(|core| {
            if core.meta.data_type != DataType::Schema {
                return Err(StoreError::SchemaNotSupported(core.meta.data_type));
            }
            let set = core.schema.get_or_insert_with(SchemaSet::default);
            set.append(schema)?;
            set.save(&core.dir.join(SCHEMA_FILE))?;
            Ok(())
        })
    }

    /// Current schema set, cloned.
    pub fn schema_set(&self) -> Result<SchemaSet> {
        self.with_read(|core| {
            if core.meta.data_type != DataType::Schema {
                return Err(StoreError::SchemaNotSupported(core.meta.data_type));
            }
            core.schema.clone().ok_or(StoreError::SchemaRequired)
        })
    }

    /// Rewrite a full-format JSON record to compact (index-keyed) form under
    /// the current schema version.
    pub fn full_to_compact(&self, record: &[u8]) -> Result<Vec<u8>> {
        self.with_read(|core| core.schema_ref()?.full_to_compact(record))
    }

    /// Rewrite a compact record back to full form using the schema at
    /// `version` (0 = current).  Unknown indices are dropped.
    pub fn compact_to_full(&self, record: &[u8], version: u32) -> Result<Vec<u8>> {
        self.with_read(|core| core.schema_ref()?.compact_to_full(record, version))
    }

    /// Validate a record in either format against the current schema.
    pub fn validate_record(&self, record: &[u8]) -> Result<()> {
        self.with_read(|core| core.schema_ref()?.validate(record))
    }

    // ── Connection sidecar ───────────────────────────────────────────────────

    /// Read the persisted outbound-connection configuration, if any.  The
    /// contents are opaque to the engine; egress collaborators own the
    /// format.
    pub fn read_connections(&self) -> Result<Option<Vec<u8>>> {
        self.with_read(|core| {
            let path = core.dir.join(CONNECTIONS_FILE);
            match std::fs::read(&path) {
                Ok(bytes) => Ok(Some(bytes)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
    }

    /// Persist the outbound-connection configuration verbatim.
    pub fn write_connections(&self, bytes: &[u8]) -> Result<()> {
        self.with_write(|core| {
            trace!("writing {} connection bytes", bytes.len());
            std::fs::write(core.dir.join(CONNECTIONS_FILE), bytes)?;
            Ok(())
        })
    }
}

impl Core {
    fn schema_ref(&self) -> Result<&SchemaSet> {
        if self.meta.data_type != DataType::Schema {
            return Err(StoreError::SchemaNotSupported(self.meta.data_type));
        }
        self.schema.as_ref().ok_or(StoreError::SchemaRequired)
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        // Best-effort flush; explicit close() reports errors instead.
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(core) = guard.take() {
            let _ = core.persist_metadata();
            let _ = core.files.sync();
        }
    }
}
