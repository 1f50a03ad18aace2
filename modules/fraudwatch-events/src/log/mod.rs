//! Event log backends.
//!
//! The trait is the whole write surface: `append` and the registry upsert.
//! There is no way to update or delete an event through it.

mod memory;
mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::query::{LogPosition, PayloadPredicate, Scan, Tail, VerdictFilter};
use crate::types::{EventTypeSpec, NewEvent, StoredEvent};

pub use memory::MemoryEventLog;
pub use postgres::PgEventLog;

/// Result of a successful `append`.
#[derive(Debug, Clone, PartialEq)]
pub enum Appended {
    Inserted { seq: i64 },
    /// Another event of the same type already carries this idempotency key.
    /// Nothing was written.
    Deduplicated(StoredEvent),
}

/// Durable, indexed, append-only storage for validated events.
///
/// Implemented by `PgEventLog` (production) and `MemoryEventLog` (tests).
/// Callers validate before appending; backends only enforce what their
/// storage can: unique ids, unique idempotency keys, known types.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Insert the row and every index entry atomically.
    ///
    /// Fails with `EventIdConflict` if `event_id` is taken and with
    /// `Referential` if the backend holds no row for the event's type.
    async fn append(&self, event_id: Uuid, event: &NewEvent) -> Result<Appended>;

    /// Insert or overwrite a type row, keeping the original `created_at`.
    async fn upsert_type(&self, spec: &EventTypeSpec) -> Result<()>;

    async fn load_types(&self) -> Result<Vec<EventTypeSpec>>;

    async fn read_event(&self, event_id: Uuid) -> Result<Option<StoredEvent>>;

    /// Committed events after `after`, in commit order.
    ///
    /// Only events that nothing still in flight can sort before are returned,
    /// so a consumer resuming from `Tail::next` never skips a late commit.
    /// Seq values burned by failed inserts don't hold the tail back.
    async fn read_from(&self, after: LogPosition, limit: usize) -> Result<Tail>;

    /// Events whose `lead_id` or `payload.conv_id` equals `key`.
    async fn scan_by_correlation(&self, key: &str, scan: &Scan) -> Result<Vec<StoredEvent>>;

    async fn scan_by_type(&self, event_type: &str, scan: &Scan) -> Result<Vec<StoredEvent>>;

    async fn scan_by_payload(&self, predicate: &PayloadPredicate) -> Result<Vec<StoredEvent>>;

    /// Risk-verdict events, optionally narrowed to one verdict.
    async fn scan_verdicts(&self, filter: &VerdictFilter) -> Result<Vec<StoredEvent>>;
}

/// Top-level `idempotency_key`, if the payload carries a non-empty string one.
pub(crate) fn idempotency_key(payload: &serde_json::Value) -> Option<&str> {
    payload
        .get("idempotency_key")
        .and_then(|v| v.as_str())
        .filter(|k| !k.is_empty())
}
