//! EventStore: the producer- and reader-facing facade.
//!
//! Every write goes registry lookup -> validation gate -> log append. Nothing
//! reaches the log without passing the gate, and the log offers no way to
//! change a row once written.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::catalog::builtin_catalog;
use crate::config::StoreConfig;
use crate::error::{EventStoreError, Result};
use crate::log::{Appended, EventLog, MemoryEventLog, PgEventLog};
use crate::query::{LogPosition, PayloadPredicate, Scan, Tail, TimeRange, VerdictFilter};
use crate::registry::{RegistryChange, TypeRegistry};
use crate::types::{EventMeta, EventReceipt, EventTypeSpec, NewEvent, StoredEvent, Verdict};
use crate::validation::ValidationGate;

#[derive(Clone)]
pub struct EventStore {
    log: Arc<dyn EventLog>,
    registry: TypeRegistry,
    gate: Arc<ValidationGate>,
    config: StoreConfig,
}

impl EventStore {
    /// Wrap an existing log, loading the types it already holds.
    pub async fn open(log: Arc<dyn EventLog>, config: StoreConfig) -> Result<Self> {
        let registry = TypeRegistry::from_specs(log.load_types().await?);
        let gate = Arc::new(ValidationGate::standard(registry.clone()));
        info!(types = registry.len(), "Event store opened");

        Ok(Self {
            log,
            registry,
            gate,
            config,
        })
    }

    /// Connect to Postgres, migrate if configured, and seed the built-in types.
    pub async fn connect(config: StoreConfig) -> Result<Self> {
        let log = PgEventLog::connect(&config).await?;
        let store = Self::open(Arc::new(log), config).await?;
        store.bootstrap().await?;
        Ok(store)
    }

    /// A bootstrapped store over a fresh `MemoryEventLog`.
    pub async fn in_memory() -> Result<Self> {
        let store = Self::open(Arc::new(MemoryEventLog::new()), StoreConfig::default()).await?;
        store.bootstrap().await?;
        Ok(store)
    }

    /// Replace the gate, e.g. to add rules for custom types. The gate must be
    /// built over this store's registry.
    pub fn with_gate(mut self, gate: ValidationGate) -> Self {
        self.gate = Arc::new(gate);
        self
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn gate(&self) -> &ValidationGate {
        &self.gate
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Registry
    // -----------------------------------------------------------------------

    /// Register every built-in type. Safe to run on every startup.
    pub async fn bootstrap(&self) -> Result<()> {
        let mut created = 0;
        let mut updated = 0;
        for spec in builtin_catalog() {
            match self.register_type(spec).await? {
                RegistryChange::Created => created += 1,
                RegistryChange::Updated => updated += 1,
                RegistryChange::Unchanged => {}
            }
        }
        info!(created, updated, "Built-in event types registered");
        Ok(())
    }

    /// Upsert a type by name. Identical content is a no-op; changed content
    /// replaces the contract but never touches events already stored.
    pub async fn register_type(&self, spec: EventTypeSpec) -> Result<RegistryChange> {
        let change = self.registry.diff(&spec);
        if change == RegistryChange::Unchanged {
            debug!(event_type = %spec.event_type, "Event type unchanged");
            return Ok(change);
        }

        self.log.upsert_type(&spec).await?;
        info!(
            event_type = %spec.event_type,
            generation = %spec.schema_generation,
            ?change,
            "Event type registered"
        );
        Ok(self.registry.register_or_update(spec))
    }

    /// Pick up types registered by other processes sharing the backend.
    pub async fn refresh_registry(&self) -> Result<usize> {
        let mut changed = 0;
        for spec in self.log.load_types().await? {
            if self.registry.register_or_update(spec) != RegistryChange::Unchanged {
                changed += 1;
            }
        }
        if changed > 0 {
            info!(changed, "Event type registry refreshed");
        }
        Ok(changed)
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    pub async fn submit(
        &self,
        event_type: impl Into<String>,
        payload: Value,
        meta: EventMeta,
    ) -> Result<EventReceipt> {
        self.append(NewEvent::new(event_type, payload).with_meta(meta))
            .await
    }

    /// Validate and durably append one event.
    ///
    /// Generated ids are retried on collision up to `id_retry_limit` times.
    /// A pinned id that is already taken resolves to the stored event if the
    /// content matches, and to `ImmutabilityViolation` otherwise.
    pub async fn append(&self, event: NewEvent) -> Result<EventReceipt> {
        if let Err(e) = self.gate.validate(&event.event_type, &event.payload) {
            warn!(event_type = %event.event_type, error = %e, "Event rejected");
            return Err(e);
        }

        let pinned = event.meta.event_id;
        let mut retries = 0;
        loop {
            let event_id = pinned.unwrap_or_else(Uuid::now_v7);
            match self.log.append(event_id, &event).await {
                Ok(Appended::Inserted { seq }) => {
                    debug!(%event_id, seq, event_type = %event.event_type, "Event appended");
                    return Ok(EventReceipt {
                        event_id,
                        seq,
                        deduplicated: false,
                    });
                }
                Ok(Appended::Deduplicated(existing)) => {
                    return resolve_idempotent(existing, &event);
                }
                Err(EventStoreError::EventIdConflict(id)) if pinned.is_some() => {
                    return self.resolve_pinned(id, &event).await;
                }
                Err(EventStoreError::EventIdConflict(id)) if retries < self.config.id_retry_limit => {
                    retries += 1;
                    warn!(event_id = %id, retries, "Event id collision, retrying with a fresh id");
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn resolve_pinned(&self, event_id: Uuid, event: &NewEvent) -> Result<EventReceipt> {
        match self.log.read_event(event_id).await? {
            Some(existing) if existing.records(event) => {
                debug!(%event_id, "Pinned event already recorded");
                Ok(EventReceipt {
                    event_id,
                    seq: existing.seq,
                    deduplicated: true,
                })
            }
            Some(existing) => {
                warn!(%event_id, event_type = %event.event_type, "Rewrite of a recorded event refused");
                Err(EventStoreError::ImmutabilityViolation {
                    event_id,
                    reason: format!(
                        "already recorded as {} at seq {} with different content",
                        existing.event_type, existing.seq
                    ),
                })
            }
            // Taken but not visible: the competing insert hasn't committed.
            None => Err(EventStoreError::EventIdConflict(event_id)),
        }
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub async fn read_event(&self, event_id: Uuid) -> Result<Option<StoredEvent>> {
        self.log.read_event(event_id).await
    }

    /// Commit-order tail after `after`. Resume from the returned `Tail::next`.
    pub async fn read_from(&self, after: LogPosition, limit: usize) -> Result<Tail> {
        self.log.read_from(after, limit).await
    }

    /// Events for a lead or conversation, newest first.
    pub async fn scan_by_correlation(&self, key: &str, range: TimeRange) -> Result<Vec<StoredEvent>> {
        self.log
            .scan_by_correlation(key, &self.bounded(Scan::newest_first(range)))
            .await
    }

    pub async fn scan_by_type(&self, event_type: &str, range: TimeRange) -> Result<Vec<StoredEvent>> {
        self.log
            .scan_by_type(event_type, &self.bounded(Scan::newest_first(range)))
            .await
    }

    pub async fn scan_by_payload(&self, predicate: PayloadPredicate) -> Result<Vec<StoredEvent>> {
        let predicate = PayloadPredicate {
            scan: self.bounded(predicate.scan),
            ..predicate
        };
        self.log.scan_by_payload(&predicate).await
    }

    /// Risk verdicts, newest first, optionally narrowed to one verdict.
    pub async fn recent_verdicts(
        &self,
        verdict: Option<Verdict>,
        range: TimeRange,
    ) -> Result<Vec<StoredEvent>> {
        let filter = VerdictFilter {
            verdict,
            scan: self.bounded(Scan::newest_first(range)),
        };
        self.log.scan_verdicts(&filter).await
    }

    /// Full history of a lead or conversation in the order it happened.
    pub async fn replay(&self, key: &str, range: TimeRange) -> Result<Vec<StoredEvent>> {
        self.log
            .scan_by_correlation(key, &Scan::oldest_first(range))
            .await
    }

    fn bounded(&self, scan: Scan) -> Scan {
        match scan.limit {
            Some(_) => scan,
            None => scan.limit(self.config.default_scan_limit),
        }
    }
}

/// A repeated idempotency key is the same fact only if the payload matches.
/// Anything else would silently drop the new content.
fn resolve_idempotent(existing: StoredEvent, event: &NewEvent) -> Result<EventReceipt> {
    if existing.event_type == event.event_type && existing.payload == event.payload {
        info!(
            event_id = %existing.event_id,
            event_type = %event.event_type,
            "Duplicate idempotency key, returning recorded event"
        );
        return Ok(EventReceipt {
            event_id: existing.event_id,
            seq: existing.seq,
            deduplicated: true,
        });
    }

    warn!(
        event_id = %existing.event_id,
        event_type = %event.event_type,
        "Idempotency key reused with different content"
    );
    Err(EventStoreError::ImmutabilityViolation {
        event_id: existing.event_id,
        reason: format!(
            "idempotency key already recorded at seq {} with a different payload",
            existing.seq
        ),
    })
}

impl std::fmt::Debug for EventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStore")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
