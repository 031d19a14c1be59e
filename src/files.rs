//! The three store files and positional I/O over them.
//!
//! A store directory holds `data.tsdb` (the block file), `index.tsdb` (the
//! parallel entry array) and `meta.tsdb` (the 64-byte metadata record).
//! Every read and write is positional, at an offset computed from a block
//! or entry number, so the descriptors carry no shared cursor and shared
//! readers never interfere.  Unix `pread`/`pwrite` semantics via
//! `std::os::unix::fs::FileExt`.

use std::fs::{self, File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use log::{debug, trace};

use crate::codec::INDEX_ENTRY_SIZE;
use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::metadata::{Metadata, METADATA_SIZE};

pub const DATA_FILE: &str = "data.tsdb";
pub const INDEX_FILE: &str = "index.tsdb";
pub const META_FILE: &str = "meta.tsdb";
pub const SCHEMA_FILE: &str = "schema.json";
pub const CONNECTIONS_FILE: &str = "ws_connections.json";

pub struct StoreFiles {
    pub data:  File,
    pub index: File,
    pub meta:  File,
}

/// `path/name`, the directory owning the store's files.
pub fn store_dir(path: &str, name: &str) -> PathBuf {
    Path::new(path).join(name)
}

impl StoreFiles {
    /// Create the store directory and preallocate all three files.
    ///
    /// The data file is sized to `num_blocks * data_block_size`; the index
    /// file to whole index blocks covering one entry per data block.  Fresh
    /// files read as zeros, which the engine relies on: an all-zero block
    /// header means "never written".
    pub fn create(dir: &Path, config: &StoreConfig) -> Result<Self> {
        fs::create_dir_all(dir)?;

        let data  = new_file(&dir.join(DATA_FILE))?;
        let index = new_file(&dir.join(INDEX_FILE))?;
        let meta  = new_file(&dir.join(META_FILE))?;

        let data_len = config.num_blocks as u64 * config.data_block_size as u64;
        let index_blocks =
            config.num_blocks.div_ceil(config.entries_per_index_block());
        let index_len = index_blocks as u64 * config.index_block_size as u64;

        data.set_len(data_len)?;
        index.set_len(index_len)?;
        meta.set_len(METADATA_SIZE as u64)?;

        debug!(
            "created store files in {}: data={data_len} B, index={index_len} B",
            dir.display()
        );
        Ok(Self { data, index, meta })
    }

    /// Open the three files of an existing store.
    pub fn open(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            return Err(StoreError::StoreNotFound(dir.display().to_string()));
        }
        let open = |name: &str| -> Result<File> {
            OpenOptions::new()
                .read(true)
                .write(true)
                .open(dir.join(name))
                .map_err(StoreError::Io)
        };
        trace!("opening store files in {}", dir.display());
        Ok(Self {
            data:  open(DATA_FILE)?,
            index: open(INDEX_FILE)?,
            meta:  open(META_FILE)?,
        })
    }

    // ── Positional helpers ───────────────────────────────────────────────────

    #[inline]
    pub fn block_offset(block: u32, data_block_size: u32) -> u64 {
        block as u64 * data_block_size as u64
    }

    #[inline]
    pub fn index_offset(block: u32) -> u64 {
        block as u64 * INDEX_ENTRY_SIZE as u64
    }

    pub fn read_data_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.data.read_exact_at(buf, offset)?;
        Ok(())
    }

    pub fn write_data_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        self.data.write_all_at(buf, offset)?;
        Ok(())
    }

    pub fn read_index_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.index.read_exact_at(buf, offset)?;
        Ok(())
    }

    pub fn write_index_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        self.index.write_all_at(buf, offset)?;
        Ok(())
    }

    // ── Metadata ─────────────────────────────────────────────────────────────

    pub fn read_metadata(&self) -> Result<Metadata> {
        let mut buf = [0u8; METADATA_SIZE];
        self.meta.read_exact_at(&mut buf, 0)?;
        Metadata::decode(&buf)
    }

    pub fn write_metadata(&self, meta: &Metadata) -> Result<()> {
        self.meta.write_all_at(&meta.encode(), 0)?;
        Ok(())
    }

    /// Flush all three files to stable storage.  Data and index first, the
    /// metadata commit point last.
    pub fn sync(&self) -> Result<()> {
        self.data.sync_all()?;
        self.index.sync_all()?;
        self.meta.sync_all()?;
        Ok(())
    }

    /// Re-zero the data and index files, keeping their preallocated sizes.
    /// Truncate-then-extend leaves sparse zero pages instead of rewriting
    /// the full file.
    pub fn zero_blocks(&self) -> Result<()> {
        let data_len = self.data.metadata()?.len();
        self.data.set_len(0)?;
        self.data.set_len(data_len)?;
        let index_len = self.index.metadata()?.len();
        self.index.set_len(0)?;
        self.index.set_len(index_len)?;
        Ok(())
    }
}

fn new_file(path: &Path) -> Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(StoreError::Io)
}

/// Recursively remove a store directory and everything in it.
pub fn delete_store(path: &str, name: &str) -> Result<()> {
    let dir = store_dir(path, name);
    if !dir.is_dir() {
        return Err(StoreError::StoreNotFound(dir.display().to_string()));
    }
    fs::remove_dir_all(&dir)?;
    debug!("deleted store {}", dir.display());
    Ok(())
}
