//! In-memory event log. Thread-safe; no database required.
//!
//! One `RwLock` guards the rows and every index, so an append is visible to
//! readers all at once or not at all. That lock also serializes every write,
//! related or not: this backend is for tests and single-process embedding.
//! Concurrent producers at scale belong on `PgEventLog`.

use std::collections::{BTreeSet, HashMap};
use std::ops::Bound;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use super::{idempotency_key, Appended, EventLog};
use crate::catalog::SCORE_CHAT;
use crate::error::{EventStoreError, Result};
use crate::query::{LogPosition, PayloadPredicate, Scan, ScanOrder, Tail, VerdictFilter};
use crate::types::{EventTypeSpec, NewEvent, StoredEvent, Verdict};

/// Index entry. Ordered by time, ties broken by commit order.
type Key = (DateTime<Utc>, i64);

/// Writes take an exclusive lock over the whole log; see the module docs.
#[derive(Default)]
pub struct MemoryEventLog {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    /// `rows[seq - 1]`. Rows are only ever pushed.
    rows: Vec<StoredEvent>,
    ids: HashMap<Uuid, i64>,
    by_correlation: HashMap<String, BTreeSet<Key>>,
    by_type: HashMap<String, BTreeSet<Key>>,
    /// Sparse: top-level scalar payload fields only, keyed by
    /// `(field, index_text(value))`.
    by_field: HashMap<(String, String), BTreeSet<Key>>,
    verdicts: BTreeSet<Key>,
    idempotency: HashMap<(String, String), i64>,
    types: HashMap<String, EventTypeSpec>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored events.
    pub fn len(&self) -> usize {
        self.read().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Inner {
    fn row(&self, seq: i64) -> &StoredEvent {
        &self.rows[(seq - 1) as usize]
    }

    fn index(&mut self, stored: &StoredEvent) {
        let key = (stored.ts, stored.seq);

        for correlation in stored.correlation_keys() {
            self.by_correlation
                .entry(correlation.to_string())
                .or_default()
                .insert(key);
        }
        self.by_type
            .entry(stored.event_type.clone())
            .or_default()
            .insert(key);
        if let Some(object) = stored.payload.as_object() {
            for (field, value) in object.iter().filter(|(_, v)| indexable(v)) {
                self.by_field
                    .entry((field.clone(), index_text(value)))
                    .or_default()
                    .insert(key);
            }
        }
        if stored.event_type == SCORE_CHAT {
            self.verdicts.insert(key);
        }
        if let Some(k) = idempotency_key(&stored.payload) {
            self.idempotency
                .insert((stored.event_type.clone(), k.to_string()), stored.seq);
        }
        self.ids.insert(stored.event_id, stored.seq);
    }

    fn collect<F>(&self, keys: Option<&BTreeSet<Key>>, scan: &Scan, keep: F) -> Vec<StoredEvent>
    where
        F: Fn(&StoredEvent) -> bool,
    {
        let Some(keys) = keys else {
            return Vec::new();
        };
        if scan.range.is_empty() {
            return Vec::new();
        }

        let lower = scan
            .range
            .from
            .map_or(Bound::Unbounded, |from| Bound::Included((from, i64::MIN)));
        let upper = scan
            .range
            .until
            .map_or(Bound::Unbounded, |until| Bound::Excluded((until, i64::MIN)));
        let window = keys.range((lower, upper));
        let ordered: Box<dyn Iterator<Item = &Key> + '_> = match scan.order {
            ScanOrder::NewestFirst => Box::new(window.rev()),
            ScanOrder::OldestFirst => Box::new(window),
        };

        ordered
            .map(|(_, seq)| self.row(*seq))
            .filter(|event| keep(event))
            .take(scan.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    /// Candidate rows for a containment predicate: the sparse index entry for
    /// the first top-level scalar in the predicate, or every row.
    fn payload_candidates(&self, contains: &Value) -> Option<BTreeSet<Key>> {
        let first_scalar = contains
            .as_object()
            .and_then(|o| o.iter().find(|(_, v)| indexable(v)));
        match first_scalar {
            Some((field, value)) => self
                .by_field
                .get(&(field.clone(), index_text(value)))
                .cloned(),
            None => Some(self.rows.iter().map(|r| (r.ts, r.seq)).collect()),
        }
    }
}

fn indexable(value: &Value) -> bool {
    matches!(value, Value::String(_) | Value::Number(_) | Value::Bool(_))
}

/// Index key text. Numbers are keyed by their f64 value so `3` and `3.0`
/// share an entry, as they compare equal under containment. Entries are only
/// candidates; every hit is rechecked with `json_contains`.
fn index_text(value: &Value) -> String {
    match value {
        // `+ 0.0` folds -0 into 0.
        Value::Number(n) => n
            .as_f64()
            .map_or_else(|| n.to_string(), |f| (f + 0.0).to_string()),
        _ => value.to_string(),
    }
}

#[async_trait]
impl EventLog for MemoryEventLog {
    async fn append(&self, event_id: Uuid, event: &NewEvent) -> Result<Appended> {
        let mut inner = self.write();

        if !inner.types.contains_key(&event.event_type) {
            return Err(EventStoreError::Referential {
                event_type: event.event_type.clone(),
            });
        }
        if inner.ids.contains_key(&event_id) {
            return Err(EventStoreError::EventIdConflict(event_id));
        }
        if let Some(key) = idempotency_key(&event.payload) {
            let lookup = (event.event_type.clone(), key.to_string());
            if let Some(&seq) = inner.idempotency.get(&lookup) {
                return Ok(Appended::Deduplicated(inner.row(seq).clone()));
            }
        }

        let seq = inner.rows.len() as i64 + 1;
        let stored = event.clone().into_stored(event_id, seq);
        inner.index(&stored);
        inner.rows.push(stored);

        Ok(Appended::Inserted { seq })
    }

    async fn upsert_type(&self, spec: &EventTypeSpec) -> Result<()> {
        let mut inner = self.write();
        let created_at = inner
            .types
            .get(&spec.event_type)
            .map_or(spec.created_at, |current| current.created_at);
        inner.types.insert(
            spec.event_type.clone(),
            EventTypeSpec {
                created_at,
                ..spec.clone()
            },
        );
        Ok(())
    }

    async fn load_types(&self) -> Result<Vec<EventTypeSpec>> {
        Ok(self.read().types.values().cloned().collect())
    }

    async fn read_event(&self, event_id: Uuid) -> Result<Option<StoredEvent>> {
        let inner = self.read();
        Ok(inner.ids.get(&event_id).map(|seq| inner.row(*seq).clone()))
    }

    async fn read_from(&self, after: LogPosition, limit: usize) -> Result<Tail> {
        // Each append commits on its own under the write lock, so commit order
        // is seq order and a row's position is `(seq, seq)`.
        let inner = self.read();
        let start = after.seq.max(0) as usize;
        let events: Vec<StoredEvent> = inner.rows.iter().skip(start).take(limit).cloned().collect();
        let next = events
            .last()
            .map_or(after, |last| LogPosition::new(last.seq, last.seq));
        Ok(Tail { events, next })
    }

    async fn scan_by_correlation(&self, key: &str, scan: &Scan) -> Result<Vec<StoredEvent>> {
        let inner = self.read();
        Ok(inner.collect(inner.by_correlation.get(key), scan, |_| true))
    }

    async fn scan_by_type(&self, event_type: &str, scan: &Scan) -> Result<Vec<StoredEvent>> {
        let inner = self.read();
        Ok(inner.collect(inner.by_type.get(event_type), scan, |_| true))
    }

    async fn scan_by_payload(&self, predicate: &PayloadPredicate) -> Result<Vec<StoredEvent>> {
        let inner = self.read();
        let candidates = inner.payload_candidates(&predicate.contains);
        Ok(inner.collect(candidates.as_ref(), &predicate.scan, |event| {
            predicate.matches(&event.event_type, &event.payload)
        }))
    }

    async fn scan_verdicts(&self, filter: &VerdictFilter) -> Result<Vec<StoredEvent>> {
        let inner = self.read();
        Ok(inner.collect(Some(&inner.verdicts), &filter.scan, |event| {
            filter.verdict.map_or(true, |verdict| {
                event
                    .payload
                    .get("verdict")
                    .and_then(Value::as_str)
                    .and_then(Verdict::parse)
                    == Some(verdict)
            })
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::TimeRange;
    use chrono::Duration;
    use serde_json::json;

    async fn log_with(types: &[&str]) -> MemoryEventLog {
        let log = MemoryEventLog::new();
        for t in types {
            log.upsert_type(&EventTypeSpec::legacy(*t)).await.unwrap();
        }
        log
    }

    fn at(offset_secs: i64) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-09-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
            + Duration::seconds(offset_secs)
    }

    #[tokio::test]
    async fn append_assigns_contiguous_seq() {
        let log = log_with(&["RunStarted"]).await;
        for expected in 1..=3 {
            let appended = log
                .append(Uuid::now_v7(), &NewEvent::new("RunStarted", json!({})))
                .await
                .unwrap();
            assert_eq!(appended, Appended::Inserted { seq: expected });
        }
        assert_eq!(log.len(), 3);
    }

    #[tokio::test]
    async fn unknown_type_is_referential() {
        let log = log_with(&[]).await;
        let err = log
            .append(Uuid::now_v7(), &NewEvent::new("Ghost", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, EventStoreError::Referential { .. }));
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn taken_id_conflicts_and_leaves_row_alone() {
        let log = log_with(&["RunStarted"]).await;
        let id = Uuid::now_v7();
        log.append(id, &NewEvent::new("RunStarted", json!({"n": 1})))
            .await
            .unwrap();

        let err = log
            .append(id, &NewEvent::new("RunStarted", json!({"n": 2})))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(log.read_event(id).await.unwrap().unwrap().payload, json!({"n": 1}));
        assert_eq!(log.len(), 1);
    }

    #[tokio::test]
    async fn idempotency_key_deduplicates_per_type() {
        let log = log_with(&["PlanIssued", "RunStarted"]).await;
        let first = log
            .append(Uuid::now_v7(), &NewEvent::new("PlanIssued", json!({"idempotency_key": "k"})))
            .await
            .unwrap();
        assert_eq!(first, Appended::Inserted { seq: 1 });

        let again = log
            .append(Uuid::now_v7(), &NewEvent::new("PlanIssued", json!({"idempotency_key": "k"})))
            .await
            .unwrap();
        assert!(matches!(again, Appended::Deduplicated(ref e) if e.seq == 1));

        // Same key under another type is a different fact.
        let other = log
            .append(Uuid::now_v7(), &NewEvent::new("RunStarted", json!({"idempotency_key": "k"})))
            .await
            .unwrap();
        assert_eq!(other, Appended::Inserted { seq: 2 });
    }

    #[tokio::test]
    async fn correlation_scan_orders_by_time_then_seq() {
        let log = log_with(&["DialogueTurn"]).await;
        for (offset, text) in [(10, "b"), (0, "a"), (10, "c"), (20, "d")] {
            log.append(
                Uuid::now_v7(),
                &NewEvent::new("DialogueTurn", json!({"conv_id": "conv-1", "text": text}))
                    .with_timestamp(at(offset)),
            )
            .await
            .unwrap();
        }

        let newest = log
            .scan_by_correlation("conv-1", &Scan::newest_first(TimeRange::all()))
            .await
            .unwrap();
        let texts: Vec<_> = newest.iter().map(|e| e.payload["text"].as_str().unwrap()).collect();
        assert_eq!(texts, vec!["d", "c", "b", "a"]);

        let window = log
            .scan_by_correlation(
                "conv-1",
                &Scan::oldest_first(TimeRange::between(at(5), at(20))),
            )
            .await
            .unwrap();
        let texts: Vec<_> = window.iter().map(|e| e.payload["text"].as_str().unwrap()).collect();
        assert_eq!(texts, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn lead_and_conversation_share_history() {
        let log = log_with(&["DialogueTurn", "RunStarted"]).await;
        log.append(Uuid::now_v7(), &NewEvent::new("RunStarted", json!({})).with_lead_id("lead-7"))
            .await
            .unwrap();
        log.append(
            Uuid::now_v7(),
            &NewEvent::new("DialogueTurn", json!({"conv_id": "conv-3"})).with_lead_id("lead-7"),
        )
        .await
        .unwrap();

        let scan = Scan::newest_first(TimeRange::all());
        assert_eq!(log.scan_by_correlation("lead-7", &scan).await.unwrap().len(), 2);
        assert_eq!(log.scan_by_correlation("conv-3", &scan).await.unwrap().len(), 1);
        assert!(log.scan_by_correlation("nobody", &scan).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn payload_scan_uses_containment() {
        let log = log_with(&["ScoreChat", "JuryAssessment"]).await;
        for (t, verdict) in [("ScoreChat", "A"), ("ScoreChat", "B"), ("JuryAssessment", "A")] {
            log.append(Uuid::now_v7(), &NewEvent::new(t, json!({"verdict": verdict, "tags": ["x"]})))
                .await
                .unwrap();
        }

        let all_a = log
            .scan_by_payload(&PayloadPredicate::contains(json!({"verdict": "A"})))
            .await
            .unwrap();
        assert_eq!(all_a.len(), 2);

        let scored_a = log
            .scan_by_payload(&PayloadPredicate::contains(json!({"verdict": "A"})).with_type("ScoreChat"))
            .await
            .unwrap();
        assert_eq!(scored_a.len(), 1);

        // No top-level scalar in the predicate: falls back to a full scan.
        let tagged = log
            .scan_by_payload(&PayloadPredicate::contains(json!({"tags": ["x"]})).limit(2))
            .await
            .unwrap();
        assert_eq!(tagged.len(), 2);
    }

    #[tokio::test]
    async fn verdict_index_only_holds_risk_verdicts() {
        let log = log_with(&["ScoreChat", "JuryAssessment"]).await;
        log.append(Uuid::now_v7(), &NewEvent::new("ScoreChat", json!({"verdict": "C"})))
            .await
            .unwrap();
        log.append(Uuid::now_v7(), &NewEvent::new("JuryAssessment", json!({"verdict": "C"})))
            .await
            .unwrap();
        log.append(Uuid::now_v7(), &NewEvent::new("ScoreChat", json!({"verdict": "A"})))
            .await
            .unwrap();

        let all = log.scan_verdicts(&VerdictFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|e| e.event_type == "ScoreChat"));

        let only_a = log
            .scan_verdicts(&VerdictFilter {
                verdict: Some(crate::types::Verdict::A),
                scan: Scan::default(),
            })
            .await
            .unwrap();
        assert_eq!(only_a.len(), 1);
    }

    #[tokio::test]
    async fn read_from_respects_start_and_limit() {
        let log = log_with(&["RunStarted"]).await;
        for i in 0..5 {
            log.append(Uuid::now_v7(), &NewEvent::new("RunStarted", json!({"i": i})))
                .await
                .unwrap();
        }
        let first = log.read_from(LogPosition::START, 2).await.unwrap();
        assert_eq!(first.events.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(first.next, LogPosition::new(2, 2));

        let second = log.read_from(first.next, 10).await.unwrap();
        assert_eq!(second.events.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![3, 4, 5]);

        let drained = log.read_from(second.next, 10).await.unwrap();
        assert!(drained.is_empty());
        assert_eq!(drained.next, second.next);
    }

    #[tokio::test]
    async fn payload_index_matches_numbers_by_value() {
        let log = log_with(&["ScoreChat"]).await;
        log.append(Uuid::now_v7(), &NewEvent::new("ScoreChat", json!({"turn_index": 3})))
            .await
            .unwrap();
        log.append(Uuid::now_v7(), &NewEvent::new("ScoreChat", json!({"turn_index": 4.0})))
            .await
            .unwrap();

        let three = log
            .scan_by_payload(&PayloadPredicate::contains(json!({"turn_index": 3.0})))
            .await
            .unwrap();
        assert_eq!(three.len(), 1);

        let four = log
            .scan_by_payload(&PayloadPredicate::contains(json!({"turn_index": 4})))
            .await
            .unwrap();
        assert_eq!(four.len(), 1);

        let none = log
            .scan_by_payload(&PayloadPredicate::contains(json!({"turn_index": 3.5})))
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn top_level_array_payload_contains_scalar() {
        let log = log_with(&["RunStarted"]).await;
        log.append(Uuid::now_v7(), &NewEvent::new("RunStarted", json!(["boot", "login"])))
            .await
            .unwrap();

        let found = log
            .scan_by_payload(&PayloadPredicate::contains(json!("login")))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn upsert_type_keeps_created_at() {
        let log = MemoryEventLog::new();
        let spec = EventTypeSpec::legacy("RunStarted");
        log.upsert_type(&spec).await.unwrap();

        let mut revised = spec.clone().describe("revised");
        revised.created_at = spec.created_at + Duration::days(3);
        log.upsert_type(&revised).await.unwrap();

        let types = log.load_types().await.unwrap();
        assert_eq!(types.len(), 1);
        assert_eq!(types[0].description, "revised");
        assert_eq!(types[0].created_at, spec.created_at);
    }
}
