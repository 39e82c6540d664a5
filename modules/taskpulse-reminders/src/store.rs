//! Reminder storage. The task service owns `tasks`, `reminders` and `users`;
//! the scheduler only reads them and sets `reminders.sent_at`.
//!
//! Dispatch is claim, publish, then commit or roll back. A claim marks
//! `sent_at` inside an open transaction, so a concurrent scan blocks on the
//! row and then sees it taken. A rolled-back claim leaves the reminder for
//! the next tick.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::warn;
use uuid::Uuid;

use taskpulse_common::events::ReminderDue;
use taskpulse_common::reminder::{trigger_at, MAX_REMIND_BEFORE_SECS};
use taskpulse_common::{ChannelKind, Recipient, RemindBefore};

/// A reminder ready to fire, joined with what the notification needs.
#[derive(Debug, Clone, PartialEq)]
pub struct DueReminder {
    pub reminder_id: Uuid,
    pub task_id: Uuid,
    pub user_id: String,
    pub title: String,
    pub due_at: DateTime<Utc>,
    pub remind_before: RemindBefore,
    pub channels: Vec<ChannelKind>,
    pub recipient: Recipient,
}

impl DueReminder {
    pub fn remind_at(&self) -> DateTime<Utc> {
        trigger_at(self.due_at, self.remind_before)
    }

    pub fn to_event(&self) -> ReminderDue {
        ReminderDue {
            reminder_id: self.reminder_id,
            task_id: self.task_id,
            user_id: self.user_id.clone(),
            title: self.title.clone(),
            due_at: self.due_at,
            remind_at: self.remind_at(),
            channels: self.channels.clone(),
            recipient: self.recipient.clone(),
        }
    }
}

/// An exclusive hold on one reminder's `sent_at`.
#[async_trait]
pub trait ReminderClaim: Send {
    async fn commit(self: Box<Self>) -> Result<()>;
    async fn rollback(self: Box<Self>) -> Result<()>;
}

#[async_trait]
pub trait ReminderStore: Send + Sync {
    /// Unsent reminders of pending tasks with `due_at - remind_before <= now
    /// < due_at`, earliest trigger first. Offsets outside the accepted range
    /// are never returned.
    async fn find_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<DueReminder>>;

    /// Set `sent_at = now` if still unsent. `None` when another run holds or
    /// has already sent it.
    async fn claim(&self, reminder_id: Uuid, now: DateTime<Utc>) -> Result<Option<Box<dyn ReminderClaim>>>;
}

// ---------------------------------------------------------------------------
// Postgres
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PgReminderStore {
    pool: PgPool,
}

impl PgReminderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct DueReminderRow {
    reminder_id: Uuid,
    task_id: Uuid,
    user_id: String,
    title: String,
    due_at: DateTime<Utc>,
    remind_before_seconds: i64,
    channels: Vec<String>,
    email: Option<String>,
    push_token: Option<String>,
}

impl DueReminderRow {
    fn into_due(self) -> Option<DueReminder> {
        let Some(remind_before) = RemindBefore::from_secs(self.remind_before_seconds) else {
            warn!(
                reminder_id = %self.reminder_id,
                seconds = self.remind_before_seconds,
                "Skipping reminder with invalid offset"
            );
            return None;
        };
        let mut channels = Vec::with_capacity(self.channels.len());
        for raw in &self.channels {
            match raw.parse::<ChannelKind>() {
                Ok(kind) if !channels.contains(&kind) => channels.push(kind),
                Ok(_) => {}
                Err(e) => warn!(reminder_id = %self.reminder_id, error = %e, "Ignoring unknown channel"),
            }
        }
        Some(DueReminder {
            reminder_id: self.reminder_id,
            task_id: self.task_id,
            user_id: self.user_id,
            title: self.title,
            due_at: self.due_at,
            remind_before,
            channels,
            recipient: Recipient {
                email: self.email,
                push_token: self.push_token,
            },
        })
    }
}

#[async_trait]
impl ReminderStore for PgReminderStore {
    async fn find_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<DueReminder>> {
        let rows = sqlx::query_as::<_, DueReminderRow>(
            r#"
            SELECT r.id AS reminder_id,
                   t.id AS task_id,
                   t.user_id,
                   t.title,
                   t.due_at,
                   r.remind_before_seconds,
                   r.channels,
                   u.email,
                   u.push_token
            FROM reminders r
            JOIN tasks t ON t.id = r.task_id
            LEFT JOIN users u ON u.id = t.user_id
            WHERE r.sent_at IS NULL
              AND t.status = 'pending'
              AND r.remind_before_seconds BETWEEN 1 AND $3
              AND t.due_at > $1
              AND t.due_at - make_interval(secs => LEAST(r.remind_before_seconds, $3)) <= $1
            ORDER BY t.due_at - make_interval(secs => LEAST(r.remind_before_seconds, $3))
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit)
        .bind(MAX_REMIND_BEFORE_SECS)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().filter_map(DueReminderRow::into_due).collect())
    }

    async fn claim(&self, reminder_id: Uuid, now: DateTime<Utc>) -> Result<Option<Box<dyn ReminderClaim>>> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query("UPDATE reminders SET sent_at = $2 WHERE id = $1 AND sent_at IS NULL")
            .bind(reminder_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }
        Ok(Some(Box::new(PgClaim { tx })))
    }
}

struct PgClaim {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl ReminderClaim for PgClaim {
    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
