//! Recurring Task Consumer: turns `task.completed.v1` events for recurring
//! tasks into the task's next occurrence.

pub mod breaker;
pub mod config;
pub mod consumer;
pub mod http;
pub mod task_service;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use config::RecurringConfig;
pub use consumer::{RecurringTaskConsumer, CONSUMER};
pub use http::HttpTaskService;
pub use task_service::{CreateTaskRequest, TaskService, TaskServiceError};
