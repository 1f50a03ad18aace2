//! Read-side descriptors shared by every log backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{StoredEvent, Verdict};

/// Half-open time window `[from, until)`. Either bound may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRange {
    pub from: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn since(from: DateTime<Utc>) -> Self {
        Self {
            from: Some(from),
            until: None,
        }
    }

    pub fn until(until: DateTime<Utc>) -> Self {
        Self {
            from: None,
            until: Some(until),
        }
    }

    pub fn between(from: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        Self {
            from: Some(from),
            until: Some(until),
        }
    }

    pub fn contains(&self, ts: &DateTime<Utc>) -> bool {
        self.from.map_or(true, |from| *ts >= from) && self.until.map_or(true, |until| *ts < until)
    }

    /// True when no timestamp can fall inside the window.
    pub fn is_empty(&self) -> bool {
        matches!((self.from, self.until), (Some(from), Some(until)) if from >= until)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ScanOrder {
    #[default]
    NewestFirst,
    OldestFirst,
}

impl ScanOrder {
    pub(crate) fn sql(&self) -> &'static str {
        match self {
            ScanOrder::NewestFirst => "DESC",
            ScanOrder::OldestFirst => "ASC",
        }
    }
}

/// Window, direction and cap of an index scan. Ties on `ts` break by `seq`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Scan {
    pub range: TimeRange,
    pub order: ScanOrder,
    pub limit: Option<usize>,
}

impl Scan {
    pub fn newest_first(range: TimeRange) -> Self {
        Self {
            range,
            order: ScanOrder::NewestFirst,
            limit: None,
        }
    }

    pub fn oldest_first(range: TimeRange) -> Self {
        Self {
            range,
            order: ScanOrder::OldestFirst,
            limit: None,
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub(crate) fn sql_limit(&self) -> Option<i64> {
        self.limit.map(|l| l.min(i64::MAX as usize) as i64)
    }
}

/// Ad hoc payload filter with JSON containment semantics (`payload @> contains`).
#[derive(Debug, Clone, PartialEq)]
pub struct PayloadPredicate {
    pub contains: Value,
    pub event_type: Option<String>,
    pub scan: Scan,
}

impl PayloadPredicate {
    pub fn contains(contains: Value) -> Self {
        Self {
            contains,
            event_type: None,
            scan: Scan::default(),
        }
    }

    pub fn with_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn within(mut self, range: TimeRange) -> Self {
        self.scan.range = range;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.scan.limit = Some(limit);
        self
    }

    pub fn matches(&self, event_type: &str, payload: &Value) -> bool {
        self.event_type.as_deref().map_or(true, |t| t == event_type)
            && json_contains(payload, &self.contains)
    }
}

/// Filter over the risk-verdict stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerdictFilter {
    pub verdict: Option<Verdict>,
    pub scan: Scan,
}

/// A tailing consumer's place in the log.
///
/// Events are delivered in order of the transaction that wrote them, then by
/// `seq`. Keep the `next` position of the last `Tail` and pass it back in;
/// nothing that commits later can sort before it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LogPosition {
    pub tx: i64,
    pub seq: i64,
}

impl LogPosition {
    /// Before the first event.
    pub const START: LogPosition = LogPosition { tx: 0, seq: 0 };

    pub fn new(tx: i64, seq: i64) -> Self {
        Self { tx, seq }
    }
}

/// One page of the commit-ordered tail.
#[derive(Debug, Clone, PartialEq)]
pub struct Tail {
    pub events: Vec<StoredEvent>,
    /// Where the next read should resume. Unchanged when the page is empty.
    pub next: LogPosition,
}

impl Tail {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Postgres `@>` containment over JSON values.
///
/// Objects contain objects whose every key is contained; arrays contain arrays
/// whose every element is contained by some element; scalars must be equal,
/// with numbers compared by value. At the top level only, an array also
/// contains a scalar equal to one of its elements.
pub fn json_contains(haystack: &Value, needle: &Value) -> bool {
    match (haystack, needle) {
        (Value::Array(h), n) if is_scalar(n) => h.iter().any(|hv| scalar_eq(hv, n)),
        _ => contains(haystack, needle),
    }
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match (haystack, needle) {
        (Value::Object(h), Value::Object(n)) => n
            .iter()
            .all(|(k, nv)| h.get(k).map_or(false, |hv| contains(hv, nv))),
        (Value::Array(h), Value::Array(n)) => n
            .iter()
            .all(|nv| h.iter().any(|hv| contains(hv, nv))),
        (h, n) => scalar_eq(h, n),
    }
}

/// JSON equality where `1` and `1.0` are the same number.
pub fn scalar_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => match (x.as_u64(), y.as_u64()) {
                (Some(x), Some(y)) => x == y,
                _ => x.as_f64() == y.as_f64(),
            },
        },
        _ => a == b,
    }
}

pub(crate) fn is_scalar(value: &Value) -> bool {
    matches!(value, Value::String(_) | Value::Number(_) | Value::Bool(_) | Value::Null)
}
