use std::fs;
use std::path::Path;

use tempfile::TempDir;
use tsstore::metadata::Metadata;
use tsstore::{Store, StoreConfig, StoreError};

fn config(dir: &TempDir, name: &str, num_blocks: u32, data_block_size: u32) -> StoreConfig {
    let mut config = StoreConfig::new(dir.path().to_str().unwrap(), name);
    config.num_blocks = num_blocks;
    config.data_block_size = data_block_size;
    config
}

fn meta_path(dir: &TempDir, name: &str) -> std::path::PathBuf {
    dir.path().join(name).join("meta.tsdb")
}

/// Rewrite the on-disk metadata record, simulating a crash that lost the
/// final metadata update of one or more writes.
fn edit_meta(path: &Path, f: impl FnOnce(&mut Metadata)) {
    let bytes = fs::read(path).unwrap();
    let mut meta = Metadata::decode(&bytes).unwrap();
    f(&mut meta);
    fs::write(path, meta.encode()).unwrap();
}

#[test]
fn reopen_preserves_contents_and_ordering() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().to_str().unwrap().to_owned();
    let store = Store::create(config(&dir, "persist", 16, 4096)).unwrap();
    for ts in [100, 200, 300] {
        store.put(ts, format!("v{ts}").as_bytes()).unwrap();
    }
    store.close().unwrap();

    let store = Store::open(&path, "persist").unwrap();
    assert_eq!(store.get_by_time(200).unwrap().1, b"v200");
    assert_eq!(store.stats().unwrap().newest_timestamp, 300);

    // Monotonicity carries across reopen.
    assert!(matches!(
        store.put(300, b"dup"),
        Err(StoreError::TimestampOutOfOrder { .. })
    ));
    store.put(400, b"v400").unwrap();
    assert_eq!(store.get_by_time(400).unwrap().1, b"v400");
}

#[test]
fn recovery_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().to_str().unwrap().to_owned();
    let store = Store::create(config(&dir, "idem", 16, 256)).unwrap();
    for ts in 1..=5i64 {
        store.put(ts, &[ts as u8; 100]).unwrap();
    }
    store.close().unwrap();

    Store::open(&path, "idem").unwrap().close().unwrap();
    let after_first = fs::read(meta_path(&dir, "idem")).unwrap();

    Store::open(&path, "idem").unwrap().close().unwrap();
    let after_second = fs::read(meta_path(&dir, "idem")).unwrap();

    assert_eq!(after_first, after_second);
}

#[test]
fn orphaned_head_advance_is_repaired() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().to_str().unwrap().to_owned();
    let store = Store::create(config(&dir, "orphan", 8, 256)).unwrap();
    store.put(1, &[1u8; 100]).unwrap(); // block 0
    store.put(2, &[2u8; 100]).unwrap(); // block 1
    store.close().unwrap();

    // Roll the metadata back to before the second write committed: block 1
    // is now an orphan the metadata does not know about.
    edit_meta(&meta_path(&dir, "orphan"), |meta| {
        meta.head_block = 0;
        meta.write_offset = 148; // 24 + 24 + 100
    });

    let store = Store::open(&path, "orphan").unwrap();
    let stats = store.stats().unwrap();
    assert_eq!(stats.head_block, 1);
    assert_eq!(store.get_by_time(2).unwrap().1, vec![2u8; 100]);

    // New writes land after the adopted block instead of clobbering it.
    let handle = store.put(3, &[3u8; 100]).unwrap();
    assert_eq!(handle.block_num, 2);
    assert_eq!(store.get_by_time(2).unwrap().1, vec![2u8; 100]);
}

#[test]
fn stray_tail_continuation_is_skipped() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().to_str().unwrap().to_owned();
    let store = Store::create(config(&dir, "stray", 6, 256)).unwrap();

    let big: Vec<u8> = (0..600u32).map(|i| (i % 239) as u8).collect();
    store.put(1, &big).unwrap(); // blocks 0, 1, 2
    store.put(2, &[2u8; 100]).unwrap(); // block 3
    store.close().unwrap();

    // Pretend a crashed reclamation left the tail inside the chain.
    edit_meta(&meta_path(&dir, "stray"), |meta| {
        meta.tail_block = 1;
    });

    let store = Store::open(&path, "stray").unwrap();
    assert_eq!(store.stats().unwrap().tail_block, 3);
    assert_eq!(store.get_by_time(2).unwrap().1, vec![2u8; 100]);
    assert!(matches!(
        store.get_by_time(1),
        Err(StoreError::TimestampNotFound(1))
    ));
}

#[test]
fn write_offset_is_rebuilt_from_the_head_block() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().to_str().unwrap().to_owned();
    let store = Store::create(config(&dir, "offset", 16, 4096)).unwrap();
    store.put(1, b"hello").unwrap();
    store.put(2, b"world").unwrap();
    let expected = store.stats().unwrap().write_offset;
    store.close().unwrap();

    edit_meta(&meta_path(&dir, "offset"), |meta| {
        meta.write_offset = 24; // stale: before either object landed
    });

    let store = Store::open(&path, "offset").unwrap();
    assert_eq!(store.stats().unwrap().write_offset, expected);

    // Appends continue cleanly behind the existing objects.
    store.put(3, b"again").unwrap();
    assert_eq!(store.get_by_time(1).unwrap().1, b"hello");
    assert_eq!(store.get_by_time(2).unwrap().1, b"world");
    assert_eq!(store.get_by_time(3).unwrap().1, b"again");
}

#[test]
fn spanning_head_stays_finalised_after_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().to_str().unwrap().to_owned();
    let store = Store::create(config(&dir, "span-head", 8, 256)).unwrap();
    let big: Vec<u8> = (0..600u32).map(|i| (i % 233) as u8).collect();
    store.put(1, &big).unwrap();
    store.close().unwrap();

    // The chain tail is the head block; the next object must open a new
    // block rather than packing behind the last chunk.
    let store = Store::open(&path, "span-head").unwrap();
    let chain_head = store.stats().unwrap().head_block;
    let handle = store.put(2, b"next").unwrap();
    assert_ne!(handle.block_num, chain_head);
    assert_eq!(store.get_by_time(1).unwrap().1, big);
    assert_eq!(store.get_by_time(2).unwrap().1, b"next");
}

#[test]
fn empty_store_reopens_empty() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().to_str().unwrap().to_owned();
    Store::create(config(&dir, "fresh", 16, 4096)).unwrap().close().unwrap();

    let store = Store::open(&path, "fresh").unwrap();
    let stats = store.stats().unwrap();
    assert_eq!(stats.live_blocks, 0);
    assert_eq!(stats.write_offset, 0);
    store.put(1, b"first").unwrap();
    assert_eq!(store.get_by_time(1).unwrap().1, b"first");
}

#[test]
fn corrupt_magic_fails_to_open() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().to_str().unwrap().to_owned();
    Store::create(config(&dir, "magic", 16, 4096)).unwrap().close().unwrap();

    let meta = meta_path(&dir, "magic");
    let mut bytes = fs::read(&meta).unwrap();
    bytes[0] ^= 0xFF;
    fs::write(&meta, bytes).unwrap();

    assert!(matches!(
        Store::open(&path, "magic"),
        Err(StoreError::InvalidMagic)
    ));
}

#[test]
fn unsupported_version_fails_to_open() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().to_str().unwrap().to_owned();
    Store::create(config(&dir, "version", 16, 4096)).unwrap().close().unwrap();

    edit_meta(&meta_path(&dir, "version"), |meta| {
        meta.format_version = 99;
    });

    assert!(matches!(
        Store::open(&path, "version"),
        Err(StoreError::VersionMismatch { found: 99, .. })
    ));
}
