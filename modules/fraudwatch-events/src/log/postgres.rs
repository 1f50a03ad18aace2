//! Postgres event log, the production backend.
//!
//! Every append is a single INSERT, so the row and all of its index entries
//! commit together and readers under READ COMMITTED never see half an event.
//! Tailing orders rows by writing transaction (`tx`, an `xid8`) and holds
//! back anything an in-flight transaction could still precede. Seq values
//! burned by failed inserts leave holes that the tail simply steps over.

use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Row};
use tracing::debug;
use uuid::Uuid;

use super::{idempotency_key, Appended, EventLog};
use crate::catalog::SCORE_CHAT;
use crate::config::StoreConfig;
use crate::error::{EventStoreError, Result};
use crate::query::{LogPosition, PayloadPredicate, Scan, Tail, VerdictFilter};
use crate::types::{EventTypeSpec, NewEvent, StoredEvent};

const EVENT_COLUMNS: &str =
    "event_id, seq, ts, event_type, run_id, lead_id, platform, payload, artifact_path, step_idx";

const PRIMARY_KEY: &str = "events_pkey";
const IDEMPOTENCY_INDEX: &str = "events_idempotency_key_idx";

#[derive(Clone)]
pub struct PgEventLog {
    pool: PgPool,
}

impl PgEventLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect using `config`, running the embedded migrations if asked to.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let url = config.database_url.as_deref().ok_or_else(|| {
            EventStoreError::Config("DATABASE_URL is required for the Postgres event log".into())
        })?;
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(url)
            .await?;

        let log = Self::new(pool);
        if config.run_migrations {
            log.migrate().await?;
        }
        Ok(log)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run the embedded SQL migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| EventStoreError::Database(e.into()))?;
        Ok(())
    }

    async fn find_by_idempotency_key(&self, event_type: &str, key: &str) -> Result<StoredEvent> {
        let sql = format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM events
            WHERE event_type = $1 AND payload->>'idempotency_key' = $2
            "#
        );
        let row = sqlx::query_as::<_, StoredEvent>(&sql)
            .bind(event_type)
            .bind(key)
            .fetch_one(&self.pool)
            .await?;
        Ok(row)
    }
}

#[async_trait]
impl EventLog for PgEventLog {
    async fn append(&self, event_id: Uuid, event: &NewEvent) -> Result<Appended> {
        let result = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO events
                (event_id, ts, event_type, run_id, lead_id, platform, payload, artifact_path, step_idx)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING seq
            "#,
        )
        .bind(event_id)
        .bind(event.meta.ts)
        .bind(&event.event_type)
        .bind(&event.meta.run_id)
        .bind(&event.meta.lead_id)
        .bind(&event.meta.platform)
        .bind(&event.payload)
        .bind(&event.meta.artifact_path)
        .bind(event.meta.step_idx)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(seq) => Ok(Appended::Inserted { seq }),
            Err(sqlx::Error::Database(db))
                if db.is_unique_violation() && db.constraint() == Some(IDEMPOTENCY_INDEX) =>
            {
                let key = idempotency_key(&event.payload).unwrap_or_default();
                debug!(event_type = %event.event_type, key, "Idempotency key already recorded");
                let existing = self.find_by_idempotency_key(&event.event_type, key).await?;
                Ok(Appended::Deduplicated(existing))
            }
            Err(sqlx::Error::Database(db))
                if db.is_unique_violation() && db.constraint() == Some(PRIMARY_KEY) =>
            {
                Err(EventStoreError::EventIdConflict(event_id))
            }
            Err(sqlx::Error::Database(db)) if db.is_foreign_key_violation() => {
                Err(EventStoreError::Referential {
                    event_type: event.event_type.clone(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn upsert_type(&self, spec: &EventTypeSpec) -> Result<()> {
        let required: Vec<String> = spec.required_keys.iter().cloned().collect();
        let optional: Vec<String> = spec.optional_keys.iter().cloned().collect();

        sqlx::query(
            r#"
            INSERT INTO event_types
                (event_type, description, schema_generation, versioned,
                 required_keys, optional_keys, example_payload, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (event_type) DO UPDATE SET
                description       = EXCLUDED.description,
                schema_generation = EXCLUDED.schema_generation,
                versioned         = EXCLUDED.versioned,
                required_keys     = EXCLUDED.required_keys,
                optional_keys     = EXCLUDED.optional_keys,
                example_payload   = EXCLUDED.example_payload
            "#,
        )
        .bind(&spec.event_type)
        .bind(&spec.description)
        .bind(&spec.schema_generation)
        .bind(spec.versioned)
        .bind(&required)
        .bind(&optional)
        .bind(&spec.example_payload)
        .bind(spec.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_types(&self) -> Result<Vec<EventTypeSpec>> {
        let rows = sqlx::query(
            r#"
            SELECT event_type, description, schema_generation, versioned,
                   required_keys, optional_keys, example_payload, created_at
            FROM event_types
            ORDER BY event_type
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let specs = rows
            .iter()
            .map(spec_from_row)
            .collect::<std::result::Result<Vec<_>, sqlx::Error>>()?;
        Ok(specs)
    }

    async fn read_event(&self, event_id: Uuid) -> Result<Option<StoredEvent>> {
        let sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE event_id = $1");
        let row = sqlx::query_as::<_, StoredEvent>(&sql)
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row)
    }

    async fn read_from(&self, after: LogPosition, limit: usize) -> Result<Tail> {
        // `tx` below the snapshot's xmin means every transaction that could
        // still commit a row sorts after this page. Burned seqs are skipped.
        let sql = format!(
            r#"
            SELECT {EVENT_COLUMNS}, tx::text::bigint AS tx_id
            FROM events
            WHERE (tx, seq) > ($1::bigint::text::xid8, $2)
              AND tx < pg_snapshot_xmin(pg_current_snapshot())
            ORDER BY tx ASC, seq ASC
            LIMIT $3
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(after.tx)
            .bind(after.seq)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        let mut next = after;
        let mut events = Vec::with_capacity(rows.len());
        for row in &rows {
            let event = StoredEvent::from_row(row)?;
            next = LogPosition::new(row.try_get("tx_id")?, event.seq);
            events.push(event);
        }

        Ok(Tail { events, next })
    }

    async fn scan_by_correlation(&self, key: &str, scan: &Scan) -> Result<Vec<StoredEvent>> {
        let sql = format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM events
            WHERE (lead_id = $1 OR (payload ? 'conv_id' AND payload->>'conv_id' = $1))
              AND ($2::timestamptz IS NULL OR ts >= $2)
              AND ($3::timestamptz IS NULL OR ts < $3)
            ORDER BY ts {order}, seq {order}
            LIMIT $4
            "#,
            order = scan.order.sql()
        );
        let rows = sqlx::query_as::<_, StoredEvent>(&sql)
            .bind(key)
            .bind(scan.range.from)
            .bind(scan.range.until)
            .bind(scan.sql_limit())
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }

    async fn scan_by_type(&self, event_type: &str, scan: &Scan) -> Result<Vec<StoredEvent>> {
        let sql = format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM events
            WHERE event_type = $1
              AND ($2::timestamptz IS NULL OR ts >= $2)
              AND ($3::timestamptz IS NULL OR ts < $3)
            ORDER BY ts {order}, seq {order}
            LIMIT $4
            "#,
            order = scan.order.sql()
        );
        let rows = sqlx::query_as::<_, StoredEvent>(&sql)
            .bind(event_type)
            .bind(scan.range.from)
            .bind(scan.range.until)
            .bind(scan.sql_limit())
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }

    async fn scan_by_payload(&self, predicate: &PayloadPredicate) -> Result<Vec<StoredEvent>> {
        let sql = format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM events
            WHERE payload @> $1
              AND ($2::text IS NULL OR event_type = $2)
              AND ($3::timestamptz IS NULL OR ts >= $3)
              AND ($4::timestamptz IS NULL OR ts < $4)
            ORDER BY ts {order}, seq {order}
            LIMIT $5
            "#,
            order = predicate.scan.order.sql()
        );
        let rows = sqlx::query_as::<_, StoredEvent>(&sql)
            .bind(&predicate.contains)
            .bind(&predicate.event_type)
            .bind(predicate.scan.range.from)
            .bind(predicate.scan.range.until)
            .bind(predicate.scan.sql_limit())
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }

    async fn scan_verdicts(&self, filter: &VerdictFilter) -> Result<Vec<StoredEvent>> {
        // The type literal must appear verbatim for the partial index to apply.
        let sql = format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM events
            WHERE event_type = '{SCORE_CHAT}'
              AND ($1::text IS NULL OR payload->>'verdict' = $1)
              AND ($2::timestamptz IS NULL OR ts >= $2)
              AND ($3::timestamptz IS NULL OR ts < $3)
            ORDER BY ts {order}, seq {order}
            LIMIT $4
            "#,
            order = filter.scan.order.sql()
        );
        let rows = sqlx::query_as::<_, StoredEvent>(&sql)
            .bind(filter.verdict.map(|v| v.as_str()))
            .bind(filter.scan.range.from)
            .bind(filter.scan.range.until)
            .bind(filter.scan.sql_limit())
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }
}

fn spec_from_row(row: &PgRow) -> std::result::Result<EventTypeSpec, sqlx::Error> {
    let required: Vec<String> = row.try_get("required_keys")?;
    let optional: Vec<String> = row.try_get("optional_keys")?;
    Ok(EventTypeSpec {
        event_type: row.try_get("event_type")?,
        description: row.try_get("description")?,
        schema_generation: row.try_get("schema_generation")?,
        versioned: row.try_get("versioned")?,
        required_keys: required.into_iter().collect(),
        optional_keys: optional.into_iter().collect(),
        example_payload: row.try_get("example_payload")?,
        created_at: row.try_get("created_at")?,
    })
}

// ---------------------------------------------------------------------------
// sqlx::FromRow for StoredEvent
// ---------------------------------------------------------------------------

impl<'r> sqlx::FromRow<'r, PgRow> for StoredEvent {
    fn from_row(row: &'r PgRow) -> std::result::Result<Self, sqlx::Error> {
        Ok(StoredEvent {
            event_id: row.try_get("event_id")?,
            seq: row.try_get("seq")?,
            ts: row.try_get("ts")?,
            event_type: row.try_get("event_type")?,
            run_id: row.try_get("run_id")?,
            lead_id: row.try_get("lead_id")?,
            platform: row.try_get("platform")?,
            payload: row.try_get("payload")?,
            artifact_path: row.try_get("artifact_path")?,
            step_idx: row.try_get("step_idx")?,
        })
    }
}
