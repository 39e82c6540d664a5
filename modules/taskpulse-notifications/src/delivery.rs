//! One dispatch attempt on one channel: dispatch to the provider, settle the
//! pending record, publish the outcome event.
//!
//! Dispatch failures are data. They end up in the record's `error` column and
//! in a `notification.failed.v1` event, never as an `Err`. Only store
//! failures propagate.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use taskpulse_common::events::{NotificationFailed, NotificationSent, ReminderDue};
use taskpulse_common::{
    ChannelKind, DomainEvent, EventEnvelope, Notification, NotificationStatus, RetryPolicy,
};
use taskpulse_events::EventPublisher;
use taskpulse_service::ServiceMetrics;

use crate::message::RenderedMessage;
use crate::notify::{Channels, DispatchError};
use crate::store::NotificationStore;

/// A pending first-attempt record for one channel of a reminder.
pub fn first_attempt(
    event: &EventEnvelope<ReminderDue>,
    channel: ChannelKind,
    message: &RenderedMessage,
) -> Notification {
    let reminder = &event.data;
    Notification {
        id: Uuid::new_v4(),
        user_id: reminder.user_id.clone(),
        task_id: Some(reminder.task_id),
        reminder_id: Some(reminder.reminder_id),
        event_id: event.event_id,
        channel,
        status: NotificationStatus::Pending,
        recipient: reminder.recipient.address_for(channel).map(str::to_string),
        subject: message.subject.clone(),
        message: message.body.clone(),
        attempt: 1,
        retry_of: None,
        created_at: Utc::now(),
        sent_at: None,
        failed_at: None,
        error: None,
    }
}

/// A pending record retrying `failed`.
pub fn retry_of(failed: &Notification) -> Notification {
    Notification {
        id: Uuid::new_v4(),
        status: NotificationStatus::Pending,
        attempt: failed.attempt + 1,
        retry_of: Some(failed.id),
        created_at: Utc::now(),
        sent_at: None,
        failed_at: None,
        error: None,
        ..failed.clone()
    }
}

pub struct Delivery {
    channels: Channels,
    store: Arc<dyn NotificationStore>,
    publisher: Arc<EventPublisher>,
    retry: RetryPolicy,
    metrics: Option<ServiceMetrics>,
}

impl Delivery {
    pub fn new(
        channels: Channels,
        store: Arc<dyn NotificationStore>,
        publisher: Arc<EventPublisher>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            channels,
            store,
            publisher,
            retry,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: ServiceMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn store(&self) -> &Arc<dyn NotificationStore> {
        &self.store
    }

    /// Dispatch an already-persisted pending record and settle it. Returns the
    /// settled record.
    pub async fn attempt(&self, mut notification: Notification) -> Result<Notification> {
        let message = RenderedMessage {
            subject: notification.subject.clone(),
            body: notification.message.clone(),
        };
        let outcome = match notification.recipient.as_deref() {
            Some(recipient) => {
                self.channels
                    .for_kind(notification.channel)
                    .dispatch(recipient, &message)
                    .await
            }
            None => Err(DispatchError::MissingRecipient(notification.channel)),
        };

        let now = Utc::now();
        match outcome {
            Ok(()) => {
                self.store.mark_sent(notification.id, now).await?;
                notification.status = NotificationStatus::Sent;
                notification.sent_at = Some(now);
                info!(
                    notification_id = %notification.id,
                    channel = %notification.channel,
                    attempt = notification.attempt,
                    "Notification sent"
                );
                self.publish(EventEnvelope::new(NotificationSent {
                    notification_id: notification.id,
                    user_id: notification.user_id.clone(),
                    task_id: notification.task_id,
                    reminder_id: notification.reminder_id,
                    channel: notification.channel,
                    attempt: notification.attempt,
                    sent_at: now,
                }))
                .await;
            }
            Err(e) => {
                let reason = e.to_string();
                self.store.mark_failed(notification.id, now, &reason).await?;
                notification.status = NotificationStatus::Failed;
                notification.failed_at = Some(now);
                notification.error = Some(reason.clone());

                let will_retry = self.retry.allows_retry_after(notification.attempt);
                warn!(
                    notification_id = %notification.id,
                    channel = %notification.channel,
                    attempt = notification.attempt,
                    will_retry,
                    error = %reason,
                    "Notification failed"
                );
                self.publish(EventEnvelope::new(NotificationFailed {
                    notification_id: notification.id,
                    user_id: notification.user_id.clone(),
                    task_id: notification.task_id,
                    reminder_id: notification.reminder_id,
                    channel: notification.channel,
                    attempt: notification.attempt,
                    error: reason,
                    failed_at: now,
                    will_retry,
                }))
                .await;
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_notification(notification.channel.as_str(), notification.status.as_str());
        }
        Ok(notification)
    }

    async fn publish<T: DomainEvent>(&self, envelope: EventEnvelope<T>) {
        // The delivery already happened; a lost outcome event must not cause
        // the dispatch to be repeated.
        if let Err(e) = self.publisher.publish(&envelope).await {
            error!(event_id = %envelope.event_id, error = %e, "Failed to publish notification outcome");
        }
    }
}
