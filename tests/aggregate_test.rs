use chrono::Duration;
use serde_json::{json, Map, Value};
use tsstore::{AggregateConfig, AggregateFn, Aggregator, StoreError};

const MINUTE_NS: i64 = 60 * 1_000_000_000;

fn record(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

#[test]
fn aligned_window_closes_on_boundary_crossing() {
    let mut agg = Aggregator::new(AggregateConfig::new(Duration::minutes(1))).unwrap();

    assert!(agg.add(MINUTE_NS + 1, &record(&[("val", json!(10))])).is_none());
    assert!(agg.add(MINUTE_NS + 2, &record(&[("val", json!(20))])).is_none());
    assert!(agg.add(MINUTE_NS + 3, &record(&[("val", json!(30))])).is_none());

    // Crossing into the next window closes the previous one.
    let closed = agg
        .add(2 * MINUTE_NS + 1, &record(&[("val", json!(100))]))
        .unwrap();
    assert!(!closed.partial);
    assert_eq!(closed.count, 3);
    assert_eq!(closed.end, 2 * MINUTE_NS);
    assert_eq!(closed.data["val"], json!(20.0));

    let partial = agg.flush().unwrap();
    assert!(partial.partial);
    assert_eq!(partial.count, 1);
    assert_eq!(partial.end, 3 * MINUTE_NS);
    assert_eq!(partial.data["val"], json!(100.0));

    assert!(agg.flush().is_none());
}

#[test]
fn record_exactly_on_boundary_opens_new_window() {
    let mut agg = Aggregator::new(AggregateConfig::new(Duration::minutes(1))).unwrap();
    agg.add(MINUTE_NS + 1, &record(&[("val", json!(1))]));

    let closed = agg.add(2 * MINUTE_NS, &record(&[("val", json!(2))])).unwrap();
    assert_eq!(closed.end, 2 * MINUTE_NS);
    assert_eq!(closed.count, 1);

    let partial = agg.flush().unwrap();
    assert_eq!(partial.end, 3 * MINUTE_NS);
}

#[test]
fn multi_function_fields_emit_suffixed_names() {
    let config = AggregateConfig::new(Duration::seconds(10)).with_field(
        "val",
        vec![AggregateFn::Min, AggregateFn::Max, AggregateFn::Count],
    );
    let mut agg = Aggregator::new(config).unwrap();
    for (i, v) in [3, 9, 5].into_iter().enumerate() {
        agg.add(i as i64 + 1, &record(&[("val", json!(v))]));
    }

    let result = agg.flush().unwrap();
    assert_eq!(result.data["val_min"], json!(3.0));
    assert_eq!(result.data["val_max"], json!(9.0));
    assert_eq!(result.data["val_count"], json!(3));
    assert!(result.data.get("val").is_none());
}

#[test]
fn single_function_field_emits_bare_name() {
    let config =
        AggregateConfig::new(Duration::seconds(10)).with_field("val", vec![AggregateFn::Sum]);
    let mut agg = Aggregator::new(config).unwrap();
    agg.add(1, &record(&[("val", json!(4))]));
    agg.add(2, &record(&[("val", json!(6))]));

    let closed = agg.add(11_000_000_000, &record(&[("val", json!(1))])).unwrap();
    assert_eq!(closed.data["val"], json!(10.0));
}

#[test]
fn partial_sum_is_null() {
    let config =
        AggregateConfig::new(Duration::seconds(10)).with_field("val", vec![AggregateFn::Sum]);
    let mut agg = Aggregator::new(config).unwrap();
    agg.add(1, &record(&[("val", json!(4))]));

    let partial = agg.flush().unwrap();
    assert!(partial.partial);
    assert!(partial.data["val"].is_null());
}

#[test]
fn non_numeric_fields_aggregate_with_last() {
    let mut agg = Aggregator::new(AggregateConfig::new(Duration::seconds(10))).unwrap();
    agg.add(1, &record(&[("status", json!("starting")), ("val", json!(1))]));
    agg.add(2, &record(&[("status", json!("running")), ("val", json!(3))]));

    let result = agg.flush().unwrap();
    assert_eq!(result.data["status"], json!("running"));
    assert_eq!(result.data["val"], json!(2.0));
}

#[test]
fn numeric_accumulators_ignore_non_numeric_values() {
    let config = AggregateConfig::new(Duration::seconds(10))
        .with_field("val", vec![AggregateFn::Avg, AggregateFn::Count]);
    let mut agg = Aggregator::new(config).unwrap();
    agg.add(1, &record(&[("val", json!(10))]));
    agg.add(2, &record(&[("val", json!("glitch"))]));
    agg.add(3, &record(&[("val", json!(30))]));

    let result = agg.flush().unwrap();
    // The stray string does not skew the mean but still counts and is last-tracked.
    assert_eq!(result.data["val_avg"], json!(20.0));
    assert_eq!(result.data["val_count"], json!(3));
}

#[test]
fn extrema_hold_ordering() {
    let config = AggregateConfig::new(Duration::seconds(10))
        .with_field("val", vec![AggregateFn::Min, AggregateFn::Max]);
    let mut agg = Aggregator::new(config).unwrap();
    for (i, v) in [-4.5f64, 12.25, 0.0, 7.5].into_iter().enumerate() {
        agg.add(i as i64 + 1, &record(&[("val", json!(v))]));
    }

    let result = agg.flush().unwrap();
    let min = result.data["val_min"].as_f64().unwrap();
    let max = result.data["val_max"].as_f64().unwrap();
    assert!(max >= min);
    assert_eq!(min, -4.5);
    assert_eq!(max, 12.25);
}

#[test]
fn last_tracks_most_recent_raw_value() {
    let config =
        AggregateConfig::new(Duration::seconds(10)).with_field("val", vec![AggregateFn::Last]);
    let mut agg = Aggregator::new(config).unwrap();
    agg.add(1, &record(&[("val", json!(10))]));
    agg.add(2, &record(&[("val", json!(25))]));

    let result = agg.flush().unwrap();
    assert_eq!(result.data["val"], json!(25));
}

#[test]
fn fields_missing_from_some_records_count_appearances() {
    let config = AggregateConfig::new(Duration::seconds(10))
        .with_field("sometimes", vec![AggregateFn::Count]);
    let mut agg = Aggregator::new(config).unwrap();
    agg.add(1, &record(&[("sometimes", json!(1)), ("always", json!(1))]));
    agg.add(2, &record(&[("always", json!(2))]));
    agg.add(3, &record(&[("sometimes", json!(3)), ("always", json!(3))]));

    let result = agg.flush().unwrap();
    assert_eq!(result.count, 3);
    assert_eq!(result.data["sometimes"], json!(2));
    assert_eq!(result.data["always"], json!(2.0));
}

#[test]
fn invalid_configuration_is_rejected() {
    assert!(matches!(
        Aggregator::new(AggregateConfig::new(Duration::zero())),
        Err(StoreError::InvalidConfig(_))
    ));
    assert!(matches!(
        Aggregator::new(AggregateConfig::new(Duration::seconds(-5))),
        Err(StoreError::InvalidConfig(_))
    ));

    let mut empty_default = AggregateConfig::new(Duration::seconds(1));
    empty_default.default_fns.clear();
    assert!(matches!(
        Aggregator::new(empty_default),
        Err(StoreError::InvalidConfig(_))
    ));

    let empty_field = AggregateConfig::new(Duration::seconds(1)).with_field("x", vec![]);
    assert!(matches!(
        Aggregator::new(empty_field),
        Err(StoreError::InvalidConfig(_))
    ));
}

#[test]
fn flush_on_fresh_aggregator_is_none() {
    let mut agg = Aggregator::new(AggregateConfig::new(Duration::seconds(1))).unwrap();
    assert!(agg.flush().is_none());
}
