//! Notification delivery log.
//!
//! Records are created `pending` before a dispatch and move once to `sent`
//! or `failed`; terminal records are never modified again. A retry is a new
//! record pointing at the failed one through `retry_of`. `(event_id,
//! channel, attempt)` is unique, so a second writer for the same attempt
//! is turned away rather than dispatching twice.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use taskpulse_common::{Notification, RetryPolicy};

#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Insert a pending record. Returns false if this attempt already exists.
    async fn create_pending(&self, notification: &Notification) -> Result<bool>;

    /// Move a pending record to `sent`. Returns false if it was not pending.
    async fn mark_sent(&self, id: Uuid, sent_at: DateTime<Utc>) -> Result<bool>;

    /// Move a pending record to `failed`. Returns false if it was not pending.
    async fn mark_failed(&self, id: Uuid, failed_at: DateTime<Utc>, error: &str) -> Result<bool>;

    async fn get(&self, id: Uuid) -> Result<Option<Notification>>;

    /// All attempts caused by one reminder event.
    async fn for_event(&self, event_id: Uuid) -> Result<Vec<Notification>>;

    /// Failed records with `attempt < policy.max_attempts` that no retry
    /// points at yet and whose backoff under `policy` has elapsed by `now`,
    /// earliest eligible first.
    async fn retry_candidates(
        &self,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Notification>>;
}

#[async_trait]
impl<S: NotificationStore + ?Sized> NotificationStore for Arc<S> {
    async fn create_pending(&self, notification: &Notification) -> Result<bool> {
        (**self).create_pending(notification).await
    }

    async fn mark_sent(&self, id: Uuid, sent_at: DateTime<Utc>) -> Result<bool> {
        (**self).mark_sent(id, sent_at).await
    }

    async fn mark_failed(&self, id: Uuid, failed_at: DateTime<Utc>, error: &str) -> Result<bool> {
        (**self).mark_failed(id, failed_at, error).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<Notification>> {
        (**self).get(id).await
    }

    async fn for_event(&self, event_id: Uuid) -> Result<Vec<Notification>> {
        (**self).for_event(event_id).await
    }

    async fn retry_candidates(
        &self,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Notification>> {
        (**self).retry_candidates(policy, now, limit).await
    }
}

// ---------------------------------------------------------------------------
// Postgres
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PgNotificationStore {
    pool: PgPool,
}

impl PgNotificationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<()> {
        let mut migrator = sqlx::migrate!("./migrations");
        migrator.set_ignore_missing(true);
        migrator
            .run(&self.pool)
            .await
            .context("notifications migrations failed")?;
        Ok(())
    }
}

const COLUMNS: &str = "id, user_id, task_id, reminder_id, event_id, channel, status, recipient, \
                       subject, message, attempt, retry_of, created_at, sent_at, failed_at, error";

#[derive(sqlx::FromRow)]
struct NotificationRow {
    id: Uuid,
    user_id: String,
    task_id: Option<Uuid>,
    reminder_id: Option<Uuid>,
    event_id: Uuid,
    channel: String,
    status: String,
    recipient: Option<String>,
    subject: String,
    message: String,
    attempt: i32,
    retry_of: Option<Uuid>,
    created_at: DateTime<Utc>,
    sent_at: Option<DateTime<Utc>>,
    failed_at: Option<DateTime<Utc>>,
    error: Option<String>,
}

impl TryFrom<NotificationRow> for Notification {
    type Error = anyhow::Error;

    fn try_from(row: NotificationRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            task_id: row.task_id,
            reminder_id: row.reminder_id,
            event_id: row.event_id,
            channel: row.channel.parse().map_err(anyhow::Error::msg)?,
            status: row.status.parse().map_err(anyhow::Error::msg)?,
            recipient: row.recipient,
            subject: row.subject,
            message: row.message,
            attempt: u32::try_from(row.attempt).context("negative attempt number")?,
            retry_of: row.retry_of,
            created_at: row.created_at,
            sent_at: row.sent_at,
            failed_at: row.failed_at,
            error: row.error,
        })
    }
}

#[async_trait]
impl NotificationStore for PgNotificationStore {
    async fn create_pending(&self, n: &Notification) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO notifications
                (id, user_id, task_id, reminder_id, event_id, channel, status, recipient,
                 subject, message, attempt, retry_of, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, 'pending', $7, $8, $9, $10, $11, $12)
            ON CONFLICT (event_id, channel, attempt) DO NOTHING
            "#,
        )
        .bind(n.id)
        .bind(&n.user_id)
        .bind(n.task_id)
        .bind(n.reminder_id)
        .bind(n.event_id)
        .bind(n.channel.as_str())
        .bind(&n.recipient)
        .bind(&n.subject)
        .bind(&n.message)
        .bind(i32::try_from(n.attempt).context("attempt number out of range")?)
        .bind(n.retry_of)
        .bind(n.created_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_sent(&self, id: Uuid, sent_at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE notifications SET status = 'sent', sent_at = $2 WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .bind(sent_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_failed(&self, id: Uuid, failed_at: DateTime<Utc>, error: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET status = 'failed', failed_at = $2, error = $3
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(failed_at)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Notification>> {
        let row = sqlx::query_as::<_, NotificationRow>(&format!(
            "SELECT {COLUMNS} FROM notifications WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Notification::try_from).transpose()
    }

    async fn for_event(&self, event_id: Uuid) -> Result<Vec<Notification>> {
        let rows = sqlx::query_as::<_, NotificationRow>(&format!(
            "SELECT {COLUMNS} FROM notifications WHERE event_id = $1 ORDER BY channel, attempt"
        ))
        .bind(event_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Notification::try_from).collect()
    }

    async fn retry_candidates(
        &self,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Notification>> {
        // Same backoff as RetryPolicy::delay_after, capped at max_delay.
        let rows = sqlx::query_as::<_, NotificationRow>(&format!(
            r#"
            SELECT {COLUMNS} FROM (
                SELECT n.*,
                       n.failed_at + make_interval(
                           secs => LEAST($2 * power($3, n.attempt - 1), $4)
                       ) AS retry_at
                FROM notifications n
                WHERE n.status = 'failed'
                  AND n.attempt < $1
                  AND NOT EXISTS (SELECT 1 FROM notifications r WHERE r.retry_of = n.id)
            ) c
            WHERE c.retry_at <= $5
            ORDER BY c.retry_at, c.id
            LIMIT $6
            "#
        ))
        .bind(i32::try_from(policy.max_attempts).unwrap_or(i32::MAX))
        .bind(policy.base_delay.as_secs_f64())
        .bind(f64::from(policy.multiplier))
        .bind(policy.max_delay.as_secs_f64())
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Notification::try_from).collect()
    }
}
