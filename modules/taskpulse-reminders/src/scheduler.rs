//! One scan: find due reminders, then for each one claim it, publish
//! `reminder.due.v1`, and commit the claim. A publish the publisher refuses
//! rolls the claim back so the next scan tries again. A buffered publish
//! counts as handed off.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use taskpulse_common::reminder::is_due;
use taskpulse_common::EventEnvelope;
use taskpulse_events::{EventPublisher, PublishStatus};
use taskpulse_service::ServiceMetrics;

use crate::store::{DueReminder, ReminderStore};

pub const SERVICE_NAME: &str = "reminder-scheduler";

/// Namespace for reminder event ids. Each reminder maps to one event id, so
/// a reminder published twice is deduplicated downstream.
const REMINDER_EVENT_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a4e_8d3b_4b7a_9e51_0c2d_7a9f_3e16);

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanReport {
    pub found: usize,
    pub dispatched: usize,
    /// Claimed by a concurrent scan.
    pub skipped: usize,
    /// Publish refused; left unsent for the next scan.
    pub failed: usize,
}

pub struct ReminderScheduler {
    store: Arc<dyn ReminderStore>,
    publisher: Arc<EventPublisher>,
    batch_size: i64,
    metrics: Option<ServiceMetrics>,
}

impl ReminderScheduler {
    pub fn new(store: Arc<dyn ReminderStore>, publisher: Arc<EventPublisher>, batch_size: i64) -> Self {
        Self {
            store,
            publisher,
            batch_size,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: ServiceMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn event_id_for(reminder_id: Uuid) -> Uuid {
        Uuid::new_v5(&REMINDER_EVENT_NAMESPACE, reminder_id.as_bytes())
    }

    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<ScanReport> {
        let due = self.store.find_due(now, self.batch_size).await?;
        let mut report = ScanReport {
            found: due.len(),
            ..ScanReport::default()
        };

        for reminder in due {
            if !is_due(reminder.due_at, reminder.remind_before, now) {
                debug!(reminder_id = %reminder.reminder_id, "Reminder no longer due");
                report.skipped += 1;
                continue;
            }
            match self.dispatch(&reminder, now).await {
                Ok(Outcome::Dispatched) => report.dispatched += 1,
                Ok(Outcome::Claimed) => report.skipped += 1,
                Ok(Outcome::Refused) => report.failed += 1,
                Err(e) => {
                    error!(
                        reminder_id = %reminder.reminder_id,
                        error = %e,
                        "Reminder claim failed, leaving it for the next scan"
                    );
                    report.failed += 1;
                }
            }
        }

        if report.found > 0 {
            info!(
                found = report.found,
                dispatched = report.dispatched,
                skipped = report.skipped,
                failed = report.failed,
                "Reminder scan finished"
            );
        }
        Ok(report)
    }

    async fn dispatch(&self, reminder: &DueReminder, now: DateTime<Utc>) -> Result<Outcome> {
        let Some(claim) = self.store.claim(reminder.reminder_id, now).await? else {
            debug!(reminder_id = %reminder.reminder_id, "Reminder claimed elsewhere");
            return Ok(Outcome::Claimed);
        };

        let envelope = EventEnvelope::at(
            Self::event_id_for(reminder.reminder_id),
            now,
            reminder.to_event(),
        );
        match self.publisher.publish(&envelope).await {
            Ok(status) => {
                claim.commit().await?;
                if let Some(metrics) = &self.metrics {
                    metrics.reminders_dispatched.inc();
                }
                info!(
                    reminder_id = %reminder.reminder_id,
                    task_id = %reminder.task_id,
                    event_id = %envelope.event_id,
                    buffered = status == PublishStatus::Buffered,
                    "Reminder dispatched"
                );
                Ok(Outcome::Dispatched)
            }
            Err(e) => {
                warn!(reminder_id = %reminder.reminder_id, error = %e, "Publish refused, releasing reminder");
                claim.rollback().await?;
                Ok(Outcome::Refused)
            }
        }
    }
}

enum Outcome {
    Dispatched,
    /// Taken by a concurrent scan.
    Claimed,
    Refused,
}
