use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use taskpulse_common::{Priority, RecurrenceConfig, ReminderSpec, TaskSnapshot};

/// Body of a task-creation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateTaskRequest {
    pub user_id: String,
    pub title: String,
    pub description: Option<String>,
    pub priority: Priority,
    pub tags: Vec<String>,
    pub due_at: Option<DateTime<Utc>>,
    pub recurrence: Option<RecurrenceConfig>,
    pub reminders: Vec<ReminderSpec>,
    /// The completed task this occurrence follows.
    pub generated_from: Option<Uuid>,
}

impl CreateTaskRequest {
    /// The next occurrence of `task`, due at `due_at`. Reminder offsets are
    /// relative, so copying them re-anchors them to the new due date.
    pub fn next_occurrence(
        task: &TaskSnapshot,
        recurrence: RecurrenceConfig,
        due_at: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: task.user_id.clone(),
            title: task.title.clone(),
            description: task.description.clone(),
            priority: task.priority,
            tags: task.tags.clone(),
            due_at: Some(due_at),
            recurrence: Some(recurrence),
            reminders: task.reminders.iter().map(|r| r.spec()).collect(),
            generated_from: Some(task.id),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TaskServiceError {
    /// The request will never succeed as sent (4xx).
    #[error("task service rejected request ({status}): {body}")]
    Validation { status: u16, body: String },

    #[error("task service unavailable: {0}")]
    Transient(String),

    #[error("task service timed out after {0:?}")]
    Timeout(Duration),

    #[error("task service circuit open")]
    CircuitOpen,
}

impl TaskServiceError {
    /// Retrying (now or on redelivery) may succeed.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Validation { .. })
    }
}

/// The task-owning service, as seen from this consumer.
#[async_trait]
pub trait TaskService: Send + Sync {
    /// Current state of a task, including its recurrence. `None` if deleted.
    async fn get_task(&self, task_id: Uuid) -> Result<Option<TaskSnapshot>, TaskServiceError>;

    /// Create a task. `idempotency_key` lets the service drop duplicates.
    async fn create_task(
        &self,
        request: &CreateTaskRequest,
        idempotency_key: Uuid,
    ) -> Result<Uuid, TaskServiceError>;
}

#[async_trait]
impl<T: TaskService + ?Sized> TaskService for Arc<T> {
    async fn get_task(&self, task_id: Uuid) -> Result<Option<TaskSnapshot>, TaskServiceError> {
        (**self).get_task(task_id).await
    }

    async fn create_task(
        &self,
        request: &CreateTaskRequest,
        idempotency_key: Uuid,
    ) -> Result<Uuid, TaskServiceError> {
        (**self).create_task(request, idempotency_key).await
    }
}
