//! In-memory task service for consumer tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use uuid::Uuid;

use taskpulse_common::{Recurrence, Reminder, TaskSnapshot, TaskStatus};
use taskpulse_events::lifecycle;
use taskpulse_events::testing::MemoryBus;
use taskpulse_events::EventPublisher;

use crate::task_service::{CreateTaskRequest, TaskService, TaskServiceError};

/// Holds tasks in memory and publishes `task.created.v1` for each one it
/// creates, like the real service. Creation honours idempotency keys.
pub struct MemoryTaskService {
    tasks: Mutex<HashMap<Uuid, TaskSnapshot>>,
    created: Mutex<Vec<(CreateTaskRequest, Uuid)>>,
    by_key: Mutex<HashMap<Uuid, Uuid>>,
    get_failures: Mutex<VecDeque<TaskServiceError>>,
    create_failures: Mutex<VecDeque<TaskServiceError>>,
    publisher: EventPublisher,
    bus: Arc<MemoryBus>,
}

impl MemoryTaskService {
    pub fn new() -> Self {
        let bus = Arc::new(MemoryBus::new());
        Self {
            tasks: Mutex::new(HashMap::new()),
            created: Mutex::new(Vec::new()),
            by_key: Mutex::new(HashMap::new()),
            get_failures: Mutex::new(VecDeque::new()),
            create_failures: Mutex::new(VecDeque::new()),
            publisher: EventPublisher::new(bus.clone(), 100),
            bus,
        }
    }

    pub fn insert(&self, task: TaskSnapshot) {
        self.tasks.lock().unwrap().insert(task.id, task);
    }

    pub fn task(&self, id: Uuid) -> Option<TaskSnapshot> {
        self.tasks.lock().unwrap().get(&id).cloned()
    }

    /// Deactivate the recurrence of a stored task.
    pub fn stop_recurrence(&self, id: Uuid) {
        if let Some(recurrence) = self
            .tasks
            .lock()
            .unwrap()
            .get_mut(&id)
            .and_then(|t| t.recurrence.as_mut())
        {
            recurrence.active = false;
        }
    }

    /// Requests that produced a new task, with the key each was sent with.
    pub fn created(&self) -> Vec<(CreateTaskRequest, Uuid)> {
        self.created.lock().unwrap().clone()
    }

    /// The next `get_task` calls fail with these errors, in order.
    pub fn fail_next_get(&self, errors: impl IntoIterator<Item = TaskServiceError>) {
        self.get_failures.lock().unwrap().extend(errors);
    }

    /// The next `create_task` calls fail with these errors, in order.
    pub fn fail_next_create(&self, errors: impl IntoIterator<Item = TaskServiceError>) {
        self.create_failures.lock().unwrap().extend(errors);
    }

    /// Events the service published.
    pub fn bus(&self) -> &MemoryBus {
        &self.bus
    }
}

impl Default for MemoryTaskService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskService for MemoryTaskService {
    async fn get_task(&self, task_id: Uuid) -> Result<Option<TaskSnapshot>, TaskServiceError> {
        if let Some(e) = self.get_failures.lock().unwrap().pop_front() {
            return Err(e);
        }
        Ok(self.task(task_id))
    }

    async fn create_task(
        &self,
        request: &CreateTaskRequest,
        idempotency_key: Uuid,
    ) -> Result<Uuid, TaskServiceError> {
        if let Some(e) = self.create_failures.lock().unwrap().pop_front() {
            return Err(e);
        }
        if let Some(existing) = self.by_key.lock().unwrap().get(&idempotency_key) {
            return Ok(*existing);
        }

        let id = Uuid::new_v4();
        let task = TaskSnapshot {
            id,
            user_id: request.user_id.clone(),
            title: request.title.clone(),
            description: request.description.clone(),
            status: TaskStatus::Pending,
            priority: request.priority,
            tags: request.tags.clone(),
            due_at: request.due_at,
            recurrence: request.recurrence.clone().map(|config| Recurrence {
                id: Uuid::new_v4(),
                task_id: id,
                config,
                next_due_at: None,
                active: true,
            }),
            reminders: request
                .reminders
                .iter()
                .map(|spec| Reminder {
                    id: Uuid::new_v4(),
                    task_id: id,
                    remind_before: spec.remind_before,
                    channels: spec.channels.clone(),
                    sent_at: None,
                })
                .collect(),
        };

        self.publisher
            .publish(&lifecycle::task_created(&task, request.generated_from))
            .await
            .map_err(|e| TaskServiceError::Transient(e.to_string()))?;

        self.by_key.lock().unwrap().insert(idempotency_key, id);
        self.created.lock().unwrap().push((request.clone(), idempotency_key));
        self.insert(task);
        Ok(id)
    }
}
