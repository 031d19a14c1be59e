//! Streaming aggregation over windowed records.
//!
//! An [`Aggregator`] consumes `(timestamp_ns, record)` tuples and folds them
//! into windows aligned to absolute boundaries: a record with timestamp `t`
//! belongs to window `t / W`, which ends at `(t / W + 1) * W`.  Feeding a
//! record at or past the current window's end closes the window, returns its
//! result from [`Aggregator::add`], and opens a new aligned window for the
//! record.  [`Aggregator::flush`] hands back the open window tagged partial.
//!
//! Results are plain values; the caller decides where they go.  No egress
//! state is threaded through here.
//!
//! Per-field functions come from the configuration: an explicit list per
//! field name, a default list for unlisted numeric fields, and `last` for
//! non-numeric fields.  Emission keys are `name` when one function is
//! configured and `name_<func>` when several are.

use std::collections::{BTreeMap, HashMap};

use chrono::Duration;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, StoreError};

// ── Functions ────────────────────────────────────────────────────────────────

/// Aggregation function over one field within one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateFn {
    Sum,
    Avg,
    Max,
    Min,
    Count,
    Last,
}

impl AggregateFn {
    pub fn name(self) -> &'static str {
        match self {
            AggregateFn::Sum => "sum",
            AggregateFn::Avg => "avg",
            AggregateFn::Max => "max",
            AggregateFn::Min => "min",
            AggregateFn::Count => "count",
            AggregateFn::Last => "last",
        }
    }
}

// ── Configuration ────────────────────────────────────────────────────────────

/// Window width, per-field function lists, and the default list applied to
/// numeric fields without an explicit entry.
#[derive(Debug, Clone)]
pub struct AggregateConfig {
    pub window:      Duration,
    pub fields:      HashMap<String, Vec<AggregateFn>>,
    pub default_fns: Vec<AggregateFn>,
}

impl AggregateConfig {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            fields: HashMap::new(),
            default_fns: vec![AggregateFn::Avg],
        }
    }

    pub fn with_field(mut self, name: &str, fns: Vec<AggregateFn>) -> Self {
        self.fields.insert(name.to_owned(), fns);
        self
    }
}

// ── Results ──────────────────────────────────────────────────────────────────

/// One closed (or flushed) window.
#[derive(Debug, Clone, Serialize)]
pub struct WindowResult {
    /// Window end boundary in nanoseconds.
    pub end:     i64,
    /// Records fed into the window.
    pub count:   u64,
    /// True for flushed windows that never reached their end boundary.
    pub partial: bool,
    /// Aggregated values keyed by field (or `field_<func>`) name.
    pub data:    Map<String, Value>,
}

// ── Accumulator ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct FieldAccum {
    /// Records in which the field appeared, numeric or not.
    appearances:   u64,
    /// Records contributing to the numeric accumulators.
    numeric_count: u64,
    sum:  f64,
    min:  f64,
    max:  f64,
    last: Value,
}

impl Default for FieldAccum {
    fn default() -> Self {
        Self {
            appearances:   0,
            numeric_count: 0,
            sum:  0.0,
            min:  f64::INFINITY,
            max:  f64::NEG_INFINITY,
            last: Value::Null,
        }
    }
}

impl FieldAccum {
    fn feed(&mut self, value: &Value) {
        self.appearances += 1;
        // Numeric accumulators ignore non-numeric values; last tracks all.
        if let Some(x) = value.as_f64() {
            self.numeric_count += 1;
            self.sum += x;
            self.min = self.min.min(x);
            self.max = self.max.max(x);
        }
        self.last = value.clone();
    }
}

#[derive(Debug)]
struct Window {
    end:    i64,
    count:  u64,
    fields: BTreeMap<String, FieldAccum>,
}

// ── Aggregator ───────────────────────────────────────────────────────────────

/// Single-threaded streaming accumulator.  Holds no I/O resource; callers
/// sharing one across tasks must provide their own exclusion.
#[derive(Debug)]
pub struct Aggregator {
    window_ns:   i64,
    fields:      HashMap<String, Vec<AggregateFn>>,
    default_fns: Vec<AggregateFn>,
    current:     Option<Window>,
}

impl Aggregator {
    pub fn new(config: AggregateConfig) -> Result<Self> {
        let window_ns = config
            .window
            .num_nanoseconds()
            .filter(|&ns| ns > 0)
            .ok_or_else(|| {
                StoreError::InvalidConfig("aggregation window must be positive".into())
            })?;
        if config.default_fns.is_empty() {
            return Err(StoreError::InvalidConfig(
                "default aggregation function list is empty".into(),
            ));
        }
        for (name, fns) in &config.fields {
            if fns.is_empty() {
                return Err(StoreError::InvalidConfig(format!(
                    "aggregation function list for field {name:?} is empty"
                )));
            }
        }
        Ok(Self {
            window_ns,
            fields: config.fields,
            default_fns: config.default_fns,
            current: None,
        })
    }

    /// Feed one record.  Returns the previous window's result when `ts_ns`
    /// falls at or past its end boundary.
    pub fn add(&mut self, ts_ns: i64, record: &Map<String, Value>) -> Option<WindowResult> {
        let closed = if self.current.as_ref().is_some_and(|w| ts_ns >= w.end) {
            self.current.take().map(|w| self.emit(w, false))
        } else {
            None
        };

        let end = (ts_ns.div_euclid(self.window_ns) + 1) * self.window_ns;
        let window = self.current.get_or_insert_with(|| Window {
            end,
            count:  0,
            fields: BTreeMap::new(),
        });
        window.count += 1;
        for (name, value) in record {
            window.fields.entry(name.clone()).or_default().feed(value);
        }

        closed
    }

    /// Close and return the open window as a partial result, or `None` when
    /// nothing has accumulated.
    pub fn flush(&mut self) -> Option<WindowResult> {
        let window = self.current.take()?;
        if window.count == 0 {
            return None;
        }
        Some(self.emit(window, true))
    }

    // ── Emission ─────────────────────────────────────────────────────────────

    fn emit(&self, window: Window, partial: bool) -> WindowResult {
        let mut data = Map::new();
        for (name, acc) in &window.fields {
            let fns: &[AggregateFn] = if acc.numeric_count == 0 {
                // Non-numeric fields always aggregate with last.
                &[AggregateFn::Last]
            } else if let Some(fns) = self.fields.get(name) {
                fns
            } else {
                &self.default_fns
            };

            let single = fns.len() == 1;
            for &f in fns {
                let key = if single {
                    name.clone()
                } else {
                    format!("{name}_{}", f.name())
                };
                data.insert(key, apply(f, acc, partial));
            }
        }
        WindowResult { end: window.end, count: window.count, partial, data }
    }
}

fn apply(f: AggregateFn, acc: &FieldAccum, partial: bool) -> Value {
    match f {
        // A partial sum misleads more than it informs.
        AggregateFn::Sum if partial => Value::Null,
        AggregateFn::Sum => Value::from(acc.sum),
        AggregateFn::Avg if acc.numeric_count > 0 => {
            Value::from(acc.sum / acc.numeric_count as f64)
        }
        AggregateFn::Avg => Value::Null,
        AggregateFn::Max if acc.numeric_count > 0 => Value::from(acc.max),
        AggregateFn::Max => Value::Null,
        AggregateFn::Min if acc.numeric_count > 0 => Value::from(acc.min),
        AggregateFn::Min => Value::Null,
        AggregateFn::Count => Value::from(acc.appearances),
        AggregateFn::Last => acc.last.clone(),
    }
}
