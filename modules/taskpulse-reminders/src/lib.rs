//! Reminder Scheduler: periodically turns reminders whose trigger time has
//! arrived into `reminder.due.v1` events.

pub mod config;
pub mod scheduler;
pub mod store;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use config::SchedulerConfig;
pub use scheduler::{ReminderScheduler, ScanReport, SERVICE_NAME};
pub use store::{DueReminder, PgReminderStore, ReminderClaim, ReminderStore};
