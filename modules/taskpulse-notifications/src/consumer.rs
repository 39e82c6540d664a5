//! Notification Consumer.
//!
//! Handles `reminder.due.v1`: one dispatch per requested channel, each
//! isolated from the others, then one EventLog record for the whole event.
//! Failed channels are left to the retry sweep.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, error, info, warn};

use taskpulse_common::events::ReminderDue;
use taskpulse_common::{DomainEvent, EventEnvelope, NotificationStatus, RawEnvelope};
use taskpulse_events::{EventLog, EventLogEntry};
use taskpulse_service::{Disposition, EventHandler};

use crate::delivery::{first_attempt, Delivery};
use crate::message::render_reminder;

pub const CONSUMER: &str = "notification-service";

const INTERRUPTED: &str = "delivery interrupted before its outcome was recorded";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReminderOutcome {
    pub sent: usize,
    pub failed: usize,
    /// Channels attempted by an earlier, unacknowledged delivery.
    pub skipped: usize,
}

pub struct NotificationConsumer {
    delivery: Arc<Delivery>,
    log: Arc<dyn EventLog>,
    retention: chrono::Duration,
}

impl NotificationConsumer {
    pub fn new(delivery: Arc<Delivery>, log: Arc<dyn EventLog>, retention_days: u32) -> Self {
        Self {
            delivery,
            log,
            retention: chrono::Duration::days(i64::from(retention_days)),
        }
    }

    /// Attempt every requested channel once. A channel that already has a
    /// first-attempt record is not dispatched again; a record left pending by
    /// a crash is settled as failed so the retry sweep can pick it up.
    pub async fn notify(&self, event: &EventEnvelope<ReminderDue>) -> Result<ReminderOutcome> {
        let reminder = &event.data;
        let store = self.delivery.store();
        let earlier = store.for_event(event.event_id).await?;
        let message = render_reminder(reminder);
        let channels: BTreeSet<_> = reminder.channels.iter().copied().collect();

        let mut outcome = ReminderOutcome::default();
        for channel in channels {
            if let Some(prior) = earlier
                .iter()
                .find(|n| n.channel == channel && n.attempt == 1)
            {
                if prior.status == NotificationStatus::Pending {
                    store.mark_failed(prior.id, Utc::now(), INTERRUPTED).await?;
                }
                debug!(event_id = %event.event_id, %channel, "Channel already attempted");
                outcome.skipped += 1;
                continue;
            }

            let pending = first_attempt(event, channel, &message);
            if !store.create_pending(&pending).await? {
                outcome.skipped += 1;
                continue;
            }
            match self.delivery.attempt(pending).await?.status {
                NotificationStatus::Sent => outcome.sent += 1,
                _ => outcome.failed += 1,
            }
        }
        Ok(outcome)
    }

    async fn record(&self, entry: EventLogEntry) -> Disposition {
        match self.log.record(&entry).await {
            Ok(_) => Disposition::Ack,
            Err(e) => {
                error!(event_id = %entry.event_id, error = %e, "Failed to write event log, not acknowledging");
                Disposition::Retry
            }
        }
    }
}

#[async_trait]
impl EventHandler for NotificationConsumer {
    fn consumer(&self) -> &'static str {
        CONSUMER
    }

    async fn handle(&self, envelope: RawEnvelope) -> Disposition {
        if envelope.event_type != ReminderDue::EVENT_TYPE {
            debug!(event_type = envelope.event_type.as_str(), "Ignoring event");
            return Disposition::Ack;
        }
        let event_id = envelope.event_id;

        let event = match envelope.decode::<ReminderDue>() {
            Ok(event) => event,
            Err(e) => {
                warn!(%event_id, error = %e, "Malformed reminder event");
                let entry = EventLogEntry::failed(
                    event_id,
                    ReminderDue::EVENT_TYPE,
                    CONSUMER,
                    e.to_string(),
                    self.retention,
                );
                return match self.record(entry).await {
                    Disposition::Ack => Disposition::DeadLetter,
                    other => other,
                };
            }
        };

        match self.log.is_processed(event_id, CONSUMER).await {
            Ok(true) => {
                info!(%event_id, "Duplicate delivery, already processed");
                return Disposition::Ack;
            }
            Ok(false) => {}
            Err(e) => {
                error!(%event_id, error = %e, "Event log lookup failed");
                return Disposition::Retry;
            }
        }

        match self.notify(&event).await {
            Ok(outcome) => {
                info!(
                    %event_id,
                    reminder_id = %event.data.reminder_id,
                    sent = outcome.sent,
                    failed = outcome.failed,
                    skipped = outcome.skipped,
                    "Reminder handled"
                );
                self.record(EventLogEntry::processed(
                    event_id,
                    ReminderDue::EVENT_TYPE,
                    CONSUMER,
                    self.retention,
                ))
                .await
            }
            Err(e) => {
                error!(%event_id, error = %e, "Notification store unavailable");
                Disposition::Retry
            }
        }
    }
}
