//! Core types for the event store.

use std::collections::BTreeSet;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Payload key every versioned event must stamp.
pub const SCHEMA_GENERATION_KEY: &str = "schema_generation";

/// Catalog entry describing one permitted event shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventTypeSpec {
    #[serde(rename = "type")]
    pub event_type: String,
    pub description: String,
    pub schema_generation: String,
    /// Versioned types are held to the generation pin and the structural rules.
    /// Legacy types only need to exist.
    pub versioned: bool,
    pub required_keys: BTreeSet<String>,
    pub optional_keys: BTreeSet<String>,
    pub example_payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl EventTypeSpec {
    pub fn versioned(event_type: impl Into<String>, generation: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            description: String::new(),
            schema_generation: generation.into(),
            versioned: true,
            required_keys: BTreeSet::new(),
            optional_keys: BTreeSet::new(),
            example_payload: serde_json::json!({}),
            created_at: Utc::now().trunc_subsecs(6),
        }
    }

    pub fn legacy(event_type: impl Into<String>) -> Self {
        Self {
            schema_generation: "legacy".to_string(),
            versioned: false,
            ..Self::versioned(event_type, "")
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn require<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_keys.extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn optional<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.optional_keys.extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn example(mut self, payload: serde_json::Value) -> Self {
        self.example_payload = payload;
        self
    }

    /// Everything but `created_at` matches. Re-registering such a spec is a no-op.
    pub fn same_contract(&self, other: &EventTypeSpec) -> bool {
        self.event_type == other.event_type
            && self.description == other.description
            && self.schema_generation == other.schema_generation
            && self.versioned == other.versioned
            && self.required_keys == other.required_keys
            && self.optional_keys == other.optional_keys
            && self.example_payload == other.example_payload
    }
}

/// Producer-supplied metadata that travels alongside a payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMeta {
    /// Pinned id. When absent the store generates a UUID v7.
    pub event_id: Option<Uuid>,
    pub ts: DateTime<Utc>,
    pub run_id: Option<String>,
    pub lead_id: Option<String>,
    pub platform: Option<String>,
    pub artifact_path: Option<String>,
    pub step_idx: Option<i32>,
}

impl Default for EventMeta {
    fn default() -> Self {
        Self {
            event_id: None,
            ts: Utc::now().trunc_subsecs(6),
            run_id: None,
            lead_id: None,
            platform: None,
            artifact_path: None,
            step_idx: None,
        }
    }
}

/// An event to be appended. The caller builds this; the store assigns seq.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub event_type: String,
    pub payload: serde_json::Value,
    pub meta: EventMeta,
}

impl NewEvent {
    pub fn new(event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            meta: EventMeta::default(),
        }
    }

    pub fn with_meta(mut self, meta: EventMeta) -> Self {
        self.meta = EventMeta {
            ts: meta.ts.trunc_subsecs(6),
            ..meta
        };
        self
    }

    pub fn with_event_id(mut self, event_id: Uuid) -> Self {
        self.meta.event_id = Some(event_id);
        self
    }

    /// Stored timestamps have microsecond precision; finer digits are dropped.
    pub fn with_timestamp(mut self, ts: DateTime<Utc>) -> Self {
        self.meta.ts = ts.trunc_subsecs(6);
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.meta.run_id = Some(run_id.into());
        self
    }

    pub fn with_lead_id(mut self, lead_id: impl Into<String>) -> Self {
        self.meta.lead_id = Some(lead_id.into());
        self
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.meta.platform = Some(platform.into());
        self
    }

    pub fn with_artifact_path(mut self, path: impl Into<String>) -> Self {
        self.meta.artifact_path = Some(path.into());
        self
    }

    pub fn with_step_idx(mut self, step_idx: i32) -> Self {
        self.meta.step_idx = Some(step_idx);
        self
    }

    /// Materialize the row the log would store under `event_id` and `seq`.
    pub fn into_stored(self, event_id: Uuid, seq: i64) -> StoredEvent {
        StoredEvent {
            event_id,
            seq,
            ts: self.meta.ts,
            event_type: self.event_type,
            run_id: self.meta.run_id,
            lead_id: self.meta.lead_id,
            platform: self.meta.platform,
            payload: self.payload,
            artifact_path: self.meta.artifact_path,
            step_idx: self.meta.step_idx,
        }
    }
}

/// An event as persisted. Returned by all read methods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub event_id: Uuid,
    pub seq: i64,
    pub ts: DateTime<Utc>,
    #[serde(rename = "type")]
    pub event_type: String,
    pub run_id: Option<String>,
    pub lead_id: Option<String>,
    pub platform: Option<String>,
    pub payload: serde_json::Value,
    pub artifact_path: Option<String>,
    pub step_idx: Option<i32>,
}

impl StoredEvent {
    /// Same fact as `candidate`, ignoring the store-assigned seq.
    pub fn records(&self, candidate: &NewEvent) -> bool {
        self.event_type == candidate.event_type
            && self.payload == candidate.payload
            && self.ts == candidate.meta.ts
            && self.run_id == candidate.meta.run_id
            && self.lead_id == candidate.meta.lead_id
            && self.platform == candidate.meta.platform
            && self.artifact_path == candidate.meta.artifact_path
            && self.step_idx == candidate.meta.step_idx
    }

    /// Correlation keys this event replays under: its lead and its conversation.
    pub fn correlation_keys(&self) -> impl Iterator<Item = &str> {
        let conv = self.payload.get("conv_id").and_then(|v| v.as_str());
        self.lead_id.as_deref().into_iter().chain(conv)
    }
}

/// What a successful append produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventReceipt {
    pub event_id: Uuid,
    pub seq: i64,
    /// The store already held this fact; nothing was written.
    pub deduplicated: bool,
}

/// Risk classification of a monitored conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verdict {
    /// Confirmed violation, backed by legal breach citations.
    A,
    /// Suspected.
    B,
    /// Clear.
    C,
}

impl Verdict {
    pub const ALL: [&'static str; 3] = ["A", "B", "C"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::A => "A",
            Verdict::B => "B",
            Verdict::C => "C",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "A" => Some(Verdict::A),
            "B" => Some(Verdict::B),
            "C" => Some(Verdict::C),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_event_builder_fills_meta() {
        let event = NewEvent::new("DialogueTurn", json!({"conv_id": "c-1"}))
            .with_run_id("run-1")
            .with_lead_id("lead-9")
            .with_platform("android")
            .with_step_idx(3);

        assert_eq!(event.meta.run_id.as_deref(), Some("run-1"));
        assert_eq!(event.meta.lead_id.as_deref(), Some("lead-9"));
        assert_eq!(event.meta.platform.as_deref(), Some("android"));
        assert_eq!(event.meta.step_idx, Some(3));
        assert!(event.meta.event_id.is_none());
    }

    #[test]
    fn timestamps_are_truncated_to_micros() {
        let ts = DateTime::parse_from_rfc3339("2025-09-01T10:00:00.123456789Z")
            .unwrap()
            .with_timezone(&Utc);
        let event = NewEvent::new("RunStarted", json!({})).with_timestamp(ts);
        assert_eq!(event.meta.ts.timestamp_subsec_nanos(), 123_456_000);
    }

    #[test]
    fn stored_event_records_its_candidate() {
        let event = NewEvent::new("RunStarted", json!({"device": "pixel"})).with_lead_id("l-1");
        let stored = event.clone().into_stored(Uuid::now_v7(), 7);
        assert!(stored.records(&event));

        let changed = NewEvent {
            payload: json!({"device": "emulator"}),
            ..event
        };
        assert!(!stored.records(&changed));
    }

    #[test]
    fn correlation_keys_cover_lead_and_conversation() {
        let stored = NewEvent::new("DialogueTurn", json!({"conv_id": "conv-2"}))
            .with_lead_id("lead-1")
            .into_stored(Uuid::now_v7(), 1);
        let keys: Vec<&str> = stored.correlation_keys().collect();
        assert_eq!(keys, vec!["lead-1", "conv-2"]);
    }

    #[test]
    fn spec_contract_ignores_created_at() {
        let a = EventTypeSpec::versioned("PlanIssued", "2025-09").require(["driver"]);
        let mut b = a.clone();
        b.created_at = a.created_at + chrono::Duration::days(1);
        assert!(a.same_contract(&b));

        let c = b.describe("changed");
        assert!(!a.same_contract(&c));
    }

    #[test]
    fn stored_event_is_serializable() {
        let stored = NewEvent::new("ScoreChat", json!({"verdict": "B"}))
            .with_run_id("run-123")
            .into_stored(Uuid::now_v7(), 42);

        let json = serde_json::to_string(&stored).unwrap();
        assert!(json.contains("\"type\":\"ScoreChat\""));

        let roundtripped: StoredEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(roundtripped, stored);
    }
}
