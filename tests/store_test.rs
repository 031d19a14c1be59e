use tempfile::TempDir;
use tsstore::{DataType, Store, StoreConfig, StoreError};

fn config(dir: &TempDir, name: &str, num_blocks: u32, data_block_size: u32) -> StoreConfig {
    let mut config = StoreConfig::new(dir.path().to_str().unwrap(), name);
    config.num_blocks = num_blocks;
    config.data_block_size = data_block_size;
    config
}

// 100-byte objects in 256-byte blocks occupy exactly one block each:
// 24 (block header) + 24 (object header) + 100 leaves too little for another.
fn payload_100(seed: u8) -> Vec<u8> {
    (0..100u32).map(|i| seed.wrapping_add(i as u8)).collect()
}

#[test]
fn small_object_round_trip() {
    let dir = TempDir::new().unwrap();
    let store = Store::create(config(&dir, "small", 100, 4096)).unwrap();

    let handle = store.put(1_000, b"hello").unwrap();
    assert_eq!(handle.timestamp, 1_000);
    assert_eq!(handle.size, 5);
    assert_eq!(handle.span_count, 1);

    assert_eq!(store.get(&handle).unwrap(), b"hello");

    let (found, payload) = store.get_by_time(1_000).unwrap();
    assert_eq!(payload, b"hello");
    assert_eq!(found.timestamp, 1_000);
    assert_eq!(found.size, 5);
}

#[test]
fn packed_objects_share_a_block() {
    let dir = TempDir::new().unwrap();
    let store = Store::create(config(&dir, "packed", 16, 4096)).unwrap();

    let a = store.put(1, b"alpha").unwrap();
    let b = store.put(2, b"beta").unwrap();
    let c = store.put(3, b"gamma").unwrap();

    assert_eq!(a.block_num, b.block_num);
    assert_eq!(b.block_num, c.block_num);
    assert!(a.offset < b.offset && b.offset < c.offset);

    assert_eq!(store.get(&a).unwrap(), b"alpha");
    assert_eq!(store.get(&b).unwrap(), b"beta");
    assert_eq!(store.get(&c).unwrap(), b"gamma");
    assert_eq!(store.get_by_time(2).unwrap().1, b"beta");
}

#[test]
fn empty_payload_round_trips() {
    let dir = TempDir::new().unwrap();
    let store = Store::create(config(&dir, "empty-payload", 16, 4096)).unwrap();
    let handle = store.put(7, b"").unwrap();
    assert_eq!(handle.size, 0);
    assert_eq!(store.get(&handle).unwrap(), Vec::<u8>::new());
}

#[test]
fn timestamps_must_increase() {
    let dir = TempDir::new().unwrap();
    let store = Store::create(config(&dir, "mono", 16, 4096)).unwrap();

    assert!(matches!(store.put(0, b"x"), Err(StoreError::InvalidTimestamp(0))));
    assert!(matches!(store.put(-5, b"x"), Err(StoreError::InvalidTimestamp(-5))));

    store.put(10, b"x").unwrap();
    assert!(matches!(
        store.put(10, b"y"),
        Err(StoreError::TimestampOutOfOrder { ts: 10, newest: 10 })
    ));
    assert!(matches!(
        store.put(3, b"y"),
        Err(StoreError::TimestampOutOfOrder { .. })
    ));
    store.put(11, b"y").unwrap();
}

#[test]
fn spanning_object_round_trip() {
    let dir = TempDir::new().unwrap();
    let store = Store::create(config(&dir, "span", 16, 512)).unwrap();

    let payload: Vec<u8> = (0..2_000u32).map(|i| (i % 251) as u8).collect();
    let handle = store.put(1, &payload).unwrap();
    assert!(handle.span_count >= 4, "span_count = {}", handle.span_count);
    assert_eq!(handle.size, 2_000);

    assert_eq!(store.get(&handle).unwrap(), payload);
    let (found, bytes) = store.get_by_time(1).unwrap();
    assert_eq!(bytes, payload);
    assert_eq!(found.span_count, handle.span_count);
}

#[test]
fn wrap_keeps_only_newest_blocks() {
    let dir = TempDir::new().unwrap();
    let store = Store::create(config(&dir, "wrap", 10, 256)).unwrap();

    for ts in 1..=15i64 {
        store.put(ts, &payload_100(ts as u8)).unwrap();
    }

    assert!(matches!(
        store.get_by_time(1),
        Err(StoreError::TimestampNotFound(1))
    ));
    assert_eq!(store.get_by_time(15).unwrap().1, payload_100(15));

    let stats = store.stats().unwrap();
    assert_eq!(stats.live_blocks, 10);
    assert_eq!(stats.oldest_timestamp, 6);
    assert_eq!(stats.newest_timestamp, 15);

    let oldest = store.get_oldest(100).unwrap();
    assert_eq!(oldest.len(), 10);
    assert_eq!(oldest[0].timestamp, 6);
}

#[test]
fn wrap_reclaims_whole_spanning_chain() {
    let dir = TempDir::new().unwrap();
    let store = Store::create(config(&dir, "wrap-span", 8, 256)).unwrap();

    // Chain of three blocks, then enough single-block objects to wrap onto it.
    let big: Vec<u8> = (0..600u32).map(|i| (i % 241) as u8).collect();
    let chain = store.put(1, &big).unwrap();
    assert_eq!(chain.span_count, 3);

    for ts in 2..=8i64 {
        store.put(ts, &payload_100(ts as u8)).unwrap();
    }

    assert!(matches!(store.get(&chain), Err(StoreError::ObjectNotFound)));
    assert!(matches!(
        store.get_by_time(1),
        Err(StoreError::TimestampNotFound(1))
    ));
    for ts in 4..=8i64 {
        assert_eq!(store.get_by_time(ts).unwrap().1, payload_100(ts as u8));
    }
    assert!(store.stats().unwrap().live_blocks <= 8);
}

#[test]
fn object_too_large_is_rejected() {
    let dir = TempDir::new().unwrap();
    let store = Store::create(config(&dir, "too-large", 4, 256)).unwrap();

    // Capacity with 4 blocks of 256 B: 208 + 2 * 232 bytes.
    let too_big = vec![0u8; 700];
    assert!(matches!(
        store.put(1, &too_big),
        Err(StoreError::ObjectTooLarge { size: 700, .. })
    ));

    let fits = vec![1u8; 600];
    let handle = store.put(1, &fits).unwrap();
    assert_eq!(store.get(&handle).unwrap(), fits);
}

#[test]
fn range_query_returns_inclusive_bounds() {
    let dir = TempDir::new().unwrap();
    let store = Store::create(config(&dir, "range", 64, 4096)).unwrap();

    for ts in [1_000, 2_000, 3_000, 4_000, 5_000] {
        store.put(ts, format!("v{ts}").as_bytes()).unwrap();
    }

    let hits = store.get_in_range(2_000, 4_000, 100).unwrap();
    let timestamps: Vec<i64> = hits.iter().map(|h| h.timestamp).collect();
    assert_eq!(timestamps, vec![2_000, 3_000, 4_000]);

    assert_eq!(store.get_in_range(1_000, 5_000, 2).unwrap().len(), 2);
    assert_eq!(store.get_in_range(4_500, 4_999, 10).unwrap().len(), 0);
    assert_eq!(store.get_in_range(5_000, 1_000, 10).unwrap().len(), 0);
}

#[test]
fn find_first_ge_and_last_le_over_blocks() {
    let dir = TempDir::new().unwrap();
    // One object per block, so the binary search crosses block boundaries.
    let store = Store::create(config(&dir, "search-blocks", 64, 256)).unwrap();
    for ts in [10, 20, 30, 40] {
        store.put(ts, &payload_100(ts as u8)).unwrap();
    }

    assert_eq!(store.find_first_ge(15).unwrap().timestamp, 20);
    assert_eq!(store.find_first_ge(10).unwrap().timestamp, 10);
    assert_eq!(store.find_first_ge(1).unwrap().timestamp, 10);
    assert_eq!(store.find_last_le(35).unwrap().timestamp, 30);
    assert_eq!(store.find_last_le(40).unwrap().timestamp, 40);
    assert!(matches!(
        store.find_last_le(5),
        Err(StoreError::TimestampNotFound(5))
    ));
    assert!(matches!(
        store.find_first_ge(45),
        Err(StoreError::TimestampNotFound(45))
    ));
}

#[test]
fn find_first_ge_and_last_le_inside_packed_block() {
    let dir = TempDir::new().unwrap();
    let store = Store::create(config(&dir, "search-packed", 16, 4096)).unwrap();
    for ts in [10, 20, 30, 40] {
        store.put(ts, b"x").unwrap();
    }

    assert_eq!(store.find_first_ge(15).unwrap().timestamp, 20);
    assert_eq!(store.find_last_le(35).unwrap().timestamp, 30);
    assert_eq!(store.find_last_le(100).unwrap().timestamp, 40);
}

#[test]
fn newest_and_oldest_ordering() {
    let dir = TempDir::new().unwrap();
    let store = Store::create(config(&dir, "order", 16, 4096)).unwrap();
    for ts in 1..=5i64 {
        store.put(ts, b"x").unwrap();
    }

    let newest: Vec<i64> = store.get_newest(3).unwrap().iter().map(|h| h.timestamp).collect();
    assert_eq!(newest, vec![5, 4, 3]);
    let oldest: Vec<i64> = store.get_oldest(2).unwrap().iter().map(|h| h.timestamp).collect();
    assert_eq!(oldest, vec![1, 2]);
}

#[test]
fn delete_before_reclaims_tail_blocks() {
    let dir = TempDir::new().unwrap();
    let store = Store::create(config(&dir, "delete", 16, 256)).unwrap();
    for ts in 1..=8i64 {
        store.put(ts, &payload_100(ts as u8)).unwrap();
    }

    let freed = store.delete_before(4).unwrap();
    assert_eq!(freed, 3);
    assert!(matches!(
        store.get_by_time(3),
        Err(StoreError::TimestampNotFound(3))
    ));
    assert_eq!(store.get_by_time(4).unwrap().1, payload_100(4));
    assert_eq!(store.stats().unwrap().oldest_timestamp, 4);

    // Nothing older than the cutoff remains.
    assert_eq!(store.delete_before(4).unwrap(), 0);
}

#[test]
fn reset_returns_to_empty() {
    let dir = TempDir::new().unwrap();
    let store = Store::create(config(&dir, "reset", 16, 4096)).unwrap();
    for ts in 1..=4i64 {
        store.put(ts * 100, b"x").unwrap();
    }

    store.reset().unwrap();
    let stats = store.stats().unwrap();
    assert_eq!(stats.live_blocks, 0);
    assert_eq!(stats.newest_timestamp, 0);
    assert!(matches!(store.get_by_time(100), Err(StoreError::EmptyStore)));

    // Monotonicity restarts after a reset.
    store.put(1, b"fresh").unwrap();
    assert_eq!(store.get_by_time(1).unwrap().1, b"fresh");
}

#[test]
fn empty_store_queries_report_empty() {
    let dir = TempDir::new().unwrap();
    let store = Store::create(config(&dir, "empty", 16, 4096)).unwrap();
    assert!(matches!(store.get_by_time(1), Err(StoreError::EmptyStore)));
    assert!(matches!(store.get_oldest(5), Err(StoreError::EmptyStore)));
    assert!(matches!(store.get_newest(5), Err(StoreError::EmptyStore)));
    assert!(matches!(store.find_first_ge(1), Err(StoreError::EmptyStore)));
    assert!(matches!(store.get_in_range(1, 2, 3), Err(StoreError::EmptyStore)));
}

#[test]
fn create_open_delete_lifecycle() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().to_str().unwrap().to_owned();
    let store = Store::create(config(&dir, "life", 16, 4096)).unwrap();
    store.put(1, b"x").unwrap();
    store.close().unwrap();

    assert!(matches!(
        Store::create(config(&dir, "life", 16, 4096)),
        Err(StoreError::StoreExists(_))
    ));
    assert!(matches!(
        Store::open(&path, "missing"),
        Err(StoreError::StoreNotFound(_))
    ));

    let reopened = Store::open(&path, "life").unwrap();
    assert_eq!(reopened.get_by_time(1).unwrap().1, b"x");
    reopened.close().unwrap();

    Store::delete(&path, "life").unwrap();
    assert!(matches!(
        Store::open(&path, "life"),
        Err(StoreError::StoreNotFound(_))
    ));
}

#[test]
fn closed_store_rejects_operations() {
    let dir = TempDir::new().unwrap();
    let store = Store::create(config(&dir, "closed", 16, 4096)).unwrap();
    let handle = store.put(1, b"x").unwrap();
    store.close().unwrap();

    assert!(matches!(store.put(2, b"y"), Err(StoreError::StoreClosed)));
    assert!(matches!(store.get(&handle), Err(StoreError::StoreClosed)));
    assert!(matches!(store.stats(), Err(StoreError::StoreClosed)));
    assert!(matches!(store.close(), Err(StoreError::StoreClosed)));
}

#[test]
fn stats_reflect_geometry_and_contents() {
    let dir = TempDir::new().unwrap();
    let store = Store::create(config(&dir, "stats", 32, 4096)).unwrap();
    store.put(100, b"a").unwrap();
    store.put(200, b"b").unwrap();

    let stats = store.stats().unwrap();
    assert_eq!(stats.data_type, DataType::Json);
    assert_eq!(stats.num_blocks, 32);
    assert_eq!(stats.live_blocks, 1);
    assert_eq!(stats.oldest_timestamp, 100);
    assert_eq!(stats.newest_timestamp, 200);
    assert!(stats.disk_bytes > 0);
}

#[test]
fn connections_sidecar_round_trips() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().to_str().unwrap().to_owned();
    let store = Store::create(config(&dir, "conns", 16, 4096)).unwrap();

    assert_eq!(store.read_connections().unwrap(), None);
    let blob = br#"[{"url":"wss://example/push","mode":"push"}]"#.to_vec();
    store.write_connections(&blob).unwrap();
    assert_eq!(store.read_connections().unwrap(), Some(blob.clone()));
    store.close().unwrap();

    let reopened = Store::open(&path, "conns").unwrap();
    assert_eq!(reopened.read_connections().unwrap(), Some(blob));
}

#[test]
fn handle_serialises_for_external_callers() {
    let dir = TempDir::new().unwrap();
    let store = Store::create(config(&dir, "json-handle", 16, 4096)).unwrap();
    let handle = store.put(42, b"hello").unwrap();

    let json = serde_json::to_value(handle).unwrap();
    assert_eq!(json["timestamp"], 42);
    assert_eq!(json["size"], 5);

    let back: tsstore::ObjectHandle = serde_json::from_value(json).unwrap();
    assert_eq!(back, handle);

    // Legacy callers may omit the offset field.
    let legacy: tsstore::ObjectHandle = serde_json::from_str(
        r#"{"timestamp":42,"block_num":0,"size":5,"span_count":1}"#,
    )
    .unwrap();
    assert_eq!(legacy.offset, 0);
}
