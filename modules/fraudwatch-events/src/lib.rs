//! Append-only audit trail for the fraud-detection pipeline.
//!
//! Producers submit typed facts (dialogue turns, risk verdicts, evidence,
//! plans, adjudications). Each one is checked against the type registry and
//! the validation gate, then written once and never changed. Corrections are
//! new events. Readers scan by correlation key, type, payload or verdict, and
//! replay a lead's or conversation's history in order.

pub mod catalog;
pub mod config;
pub mod error;
pub mod log;
pub mod query;
pub mod registry;
pub mod store;
pub mod types;
pub mod validation;

pub use config::StoreConfig;
pub use error::{EventStoreError, Result};
pub use log::{Appended, EventLog, MemoryEventLog, PgEventLog};
pub use query::{LogPosition, PayloadPredicate, Scan, ScanOrder, Tail, TimeRange, VerdictFilter};
pub use registry::{RegistryChange, TypeRegistry};
pub use store::EventStore;
pub use types::{EventMeta, EventReceipt, EventTypeSpec, NewEvent, StoredEvent, Verdict};
pub use validation::{PayloadRule, ValidationGate};
