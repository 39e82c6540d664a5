//! EventLog: which events each consumer has already handled.
//!
//! Consumers check the log before applying side effects and write to it
//! after the effect succeeds. The `(event_id, consumer_service)` uniqueness
//! constraint makes concurrent duplicate writes safe: the loser observes
//! [`RecordOutcome::AlreadyProcessed`] instead of an error.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use taskpulse_common::EventLogStatus;

/// One row of the event log.
#[derive(Debug, Clone, PartialEq)]
pub struct EventLogEntry {
    pub event_id: Uuid,
    pub event_type: String,
    pub consumer_service: String,
    pub processed_at: DateTime<Utc>,
    pub status: EventLogStatus,
    pub error: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl EventLogEntry {
    pub fn processed(
        event_id: Uuid,
        event_type: &str,
        consumer_service: &str,
        retention: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            event_id,
            event_type: event_type.to_string(),
            consumer_service: consumer_service.to_string(),
            processed_at: now,
            status: EventLogStatus::Processed,
            error: None,
            expires_at: now + retention,
        }
    }

    pub fn failed(
        event_id: Uuid,
        event_type: &str,
        consumer_service: &str,
        error: impl Into<String>,
        retention: Duration,
    ) -> Self {
        Self {
            status: EventLogStatus::Failed,
            error: Some(error.into()),
            ..Self::processed(event_id, event_type, consumer_service, retention)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// The row was written (new, or a failed row upgraded).
    Inserted,
    /// A processed row already existed; nothing was written.
    AlreadyProcessed,
}

#[async_trait]
pub trait EventLog: Send + Sync {
    /// Look up the record for one event and consumer.
    async fn get(&self, event_id: Uuid, consumer_service: &str) -> Result<Option<EventLogEntry>>;

    /// Write a record. A `processed` row is never overwritten; a `failed`
    /// row is replaced by a later write for the same key.
    async fn record(&self, entry: &EventLogEntry) -> Result<RecordOutcome>;

    /// Delete records whose `expires_at <= now`. Returns the number removed.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64>;

    /// True when a `processed` record exists. Failed records do not count.
    async fn is_processed(&self, event_id: Uuid, consumer_service: &str) -> Result<bool> {
        Ok(self
            .get(event_id, consumer_service)
            .await?
            .is_some_and(|e| e.status == EventLogStatus::Processed))
    }
}

#[async_trait]
impl<L: EventLog + ?Sized> EventLog for Arc<L> {
    async fn get(&self, event_id: Uuid, consumer_service: &str) -> Result<Option<EventLogEntry>> {
        (**self).get(event_id, consumer_service).await
    }

    async fn record(&self, entry: &EventLogEntry) -> Result<RecordOutcome> {
        (**self).record(entry).await
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        (**self).purge_expired(now).await
    }
}

// ---------------------------------------------------------------------------
// Postgres
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PgEventLog {
    pool: PgPool,
}

impl PgEventLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run the embedded `event_log` migrations.
    pub async fn migrate(&self) -> Result<()> {
        let mut migrator = sqlx::migrate!("./migrations");
        // Other crates apply their own migrations to the same database.
        migrator.set_ignore_missing(true);
        migrator
            .run(&self.pool)
            .await
            .context("event_log migrations failed")?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct EventLogRow {
    event_id: Uuid,
    event_type: String,
    consumer_service: String,
    processed_at: DateTime<Utc>,
    status: String,
    error: Option<String>,
    expires_at: DateTime<Utc>,
}

impl TryFrom<EventLogRow> for EventLogEntry {
    type Error = anyhow::Error;

    fn try_from(row: EventLogRow) -> Result<Self> {
        Ok(Self {
            event_id: row.event_id,
            event_type: row.event_type,
            consumer_service: row.consumer_service,
            processed_at: row.processed_at,
            status: row.status.parse().map_err(anyhow::Error::msg)?,
            error: row.error,
            expires_at: row.expires_at,
        })
    }
}

#[async_trait]
impl EventLog for PgEventLog {
    async fn get(&self, event_id: Uuid, consumer_service: &str) -> Result<Option<EventLogEntry>> {
        let row = sqlx::query_as::<_, EventLogRow>(
            r#"
            SELECT event_id, event_type, consumer_service, processed_at, status, error, expires_at
            FROM event_log
            WHERE event_id = $1 AND consumer_service = $2
            "#,
        )
        .bind(event_id)
        .bind(consumer_service)
        .fetch_optional(&self.pool)
        .await?;

        row.map(EventLogEntry::try_from).transpose()
    }

    async fn record(&self, entry: &EventLogEntry) -> Result<RecordOutcome> {
        // The conditional upsert only touches failed rows, so a processed row
        // yields no RETURNING row and the caller sees AlreadyProcessed.
        let written = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO event_log
                (event_id, event_type, consumer_service, processed_at, status, error, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (event_id, consumer_service) DO UPDATE
            SET event_type   = EXCLUDED.event_type,
                processed_at = EXCLUDED.processed_at,
                status       = EXCLUDED.status,
                error        = EXCLUDED.error,
                expires_at   = EXCLUDED.expires_at
            WHERE event_log.status = 'failed'
            RETURNING event_id
            "#,
        )
        .bind(entry.event_id)
        .bind(&entry.event_type)
        .bind(&entry.consumer_service)
        .bind(entry.processed_at)
        .bind(entry.status.as_str())
        .bind(&entry.error)
        .bind(entry.expires_at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match written {
            Some(_) => RecordOutcome::Inserted,
            None => RecordOutcome::AlreadyProcessed,
        })
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM event_log WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
