//! Recurring Task Consumer.
//!
//! For each `task.completed.v1` with `has_recurrence` set: skip if already
//! logged, re-read the task's recurrence, compute the next due date from
//! `completed_at`, create the next occurrence, then log and acknowledge.
//! The log write happens after the task is created and before the ack, so
//! a failed log write leaves the message unacknowledged.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use taskpulse_common::events::TaskCompleted;
use taskpulse_common::{compute_next, DomainEvent, EventEnvelope, RawEnvelope};
use taskpulse_events::{EventLog, EventLogEntry};
use taskpulse_service::{Disposition, EventHandler};

use crate::task_service::{CreateTaskRequest, TaskService, TaskServiceError};

pub const CONSUMER: &str = "recurring-task-service";

pub struct RecurringTaskConsumer {
    tasks: Arc<dyn TaskService>,
    log: Arc<dyn EventLog>,
    retention: chrono::Duration,
}

impl RecurringTaskConsumer {
    pub fn new(tasks: Arc<dyn TaskService>, log: Arc<dyn EventLog>, retention_days: u32) -> Self {
        Self {
            tasks,
            log,
            retention: chrono::Duration::days(i64::from(retention_days)),
        }
    }

    async fn process(&self, envelope: EventEnvelope<TaskCompleted>) -> Disposition {
        let event_id = envelope.event_id;
        let event = &envelope.data;

        if !event.has_recurrence {
            debug!(%event_id, task_id = %event.task_id, "Task has no recurrence");
            return Disposition::Ack;
        }

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

        let task = match self.tasks.get_task(event.task_id).await {
            Ok(Some(task)) => task,
            Ok(None) => {
                info!(%event_id, task_id = %event.task_id, "Completed task no longer exists, skipping");
                return self.finish(event_id).await;
            }
            Err(e) => return self.task_service_failure(event_id, e).await,
        };

        let Some(recurrence) = task.recurrence.as_ref() else {
            info!(%event_id, task_id = %task.id, "Recurrence removed since completion, skipping");
            return self.finish(event_id).await;
        };
        if !recurrence.active {
            info!(%event_id, task_id = %task.id, "Recurrence inactive, not generating next occurrence");
            return self.finish(event_id).await;
        }

        let next_due = match recurrence
            .config
            .validate()
            .and_then(|rule| compute_next(event.completed_at, &rule))
        {
            Ok(next_due) => next_due,
            Err(e) => {
                warn!(%event_id, task_id = %task.id, error = %e, "Invalid recurrence configuration");
                return self.dead_letter(event_id, &e.to_string()).await;
            }
        };

        let request = CreateTaskRequest::next_occurrence(&task, recurrence.config.clone(), next_due);
        match self.tasks.create_task(&request, event_id).await {
            Ok(new_task_id) => {
                info!(
                    %event_id,
                    task_id = %task.id,
                    new_task_id = %new_task_id,
                    due_at = %next_due,
                    "Created next occurrence"
                );
                self.finish(event_id).await
            }
            Err(e) => self.task_service_failure(event_id, e).await,
        }
    }

    async fn task_service_failure(&self, event_id: Uuid, err: TaskServiceError) -> Disposition {
        if err.is_transient() {
            warn!(%event_id, error = %err, "Task service unavailable, leaving for redelivery");
            Disposition::Retry
        } else {
            warn!(%event_id, error = %err, "Task service rejected next occurrence");
            self.dead_letter(event_id, &err.to_string()).await
        }
    }

    /// Log success and acknowledge. Without the log write the message must
    /// be redelivered.
    async fn finish(&self, event_id: Uuid) -> Disposition {
        let entry = EventLogEntry::processed(event_id, TaskCompleted::EVENT_TYPE, CONSUMER, self.retention);
        match self.log.record(&entry).await {
            Ok(_) => Disposition::Ack,
            Err(e) => {
                error!(%event_id, error = %e, "Failed to write event log, not acknowledging");
                Disposition::Retry
            }
        }
    }

    async fn dead_letter(&self, event_id: Uuid, reason: &str) -> Disposition {
        let entry = EventLogEntry::failed(
            event_id,
            TaskCompleted::EVENT_TYPE,
            CONSUMER,
            reason,
            self.retention,
        );
        if let Err(e) = self.log.record(&entry).await {
            error!(%event_id, error = %e, "Failed to record dead-lettered event");
            return Disposition::Retry;
        }
        Disposition::DeadLetter
    }
}

#[async_trait]
impl EventHandler for RecurringTaskConsumer {
    fn consumer(&self) -> &'static str {
        CONSUMER
    }

    async fn handle(&self, envelope: RawEnvelope) -> Disposition {
        if envelope.event_type != TaskCompleted::EVENT_TYPE {
            debug!(event_type = envelope.event_type.as_str(), "Ignoring event");
            return Disposition::Ack;
        }

        match envelope.decode::<TaskCompleted>() {
            Ok(completed) => self.process(completed).await,
            Err(e) => {
                warn!(event_id = %envelope.event_id, error = %e, "Malformed task.completed event");
                self.dead_letter(envelope.event_id, &e.to_string()).await
            }
        }
    }
}
