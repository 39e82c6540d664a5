// In-memory ReminderStore. A claim hides the reminder from other claims
// until it is committed (sent_at set) or rolled back (released).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use taskpulse_common::reminder::is_due;
use taskpulse_common::TaskStatus;

use crate::store::{DueReminder, ReminderClaim, ReminderStore};

#[derive(Debug, Clone)]
struct Row {
    reminder: DueReminder,
    task_status: TaskStatus,
    sent_at: Option<DateTime<Utc>>,
    held: bool,
}

#[derive(Default)]
pub struct MemoryReminderStore {
    rows: Arc<Mutex<HashMap<Uuid, Row>>>,
    fail_reads: AtomicBool,
    fail_commits: Arc<AtomicBool>,
}

impl MemoryReminderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, reminder: DueReminder) {
        self.insert_with_status(reminder, TaskStatus::Pending);
    }

    pub fn insert_with_status(&self, reminder: DueReminder, task_status: TaskStatus) {
        self.rows.lock().unwrap().insert(
            reminder.reminder_id,
            Row {
                reminder,
                task_status,
                sent_at: None,
                held: false,
            },
        );
    }

    pub fn sent_at(&self, reminder_id: Uuid) -> Option<DateTime<Utc>> {
        self.rows
            .lock()
            .unwrap()
            .get(&reminder_id)
            .and_then(|row| row.sent_at)
    }

    pub fn is_held(&self, reminder_id: Uuid) -> bool {
        self.rows
            .lock()
            .unwrap()
            .get(&reminder_id)
            .is_some_and(|row| row.held)
    }

    /// While true, committing a claim errors and releases it unsent.
    pub fn set_fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// While true, `find_due` errors as if the database were down.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ReminderStore for MemoryReminderStore {
    async fn find_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<DueReminder>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            bail!("MemoryReminderStore: reads disabled");
        }
        let rows = self.rows.lock().unwrap();
        let mut due: Vec<DueReminder> = rows
            .values()
            .filter(|row| row.sent_at.is_none() && row.task_status == TaskStatus::Pending)
            .filter(|row| is_due(row.reminder.due_at, row.reminder.remind_before, now))
            .map(|row| row.reminder.clone())
            .collect();
        due.sort_by_key(|r| (r.remind_at(), r.reminder_id));
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn claim(&self, reminder_id: Uuid, now: DateTime<Utc>) -> Result<Option<Box<dyn ReminderClaim>>> {
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(&reminder_id) {
            Some(row) if row.sent_at.is_none() && !row.held => {
                row.held = true;
                Ok(Some(Box::new(MemoryClaim {
                    rows: self.rows.clone(),
                    fail: self.fail_commits.clone(),
                    reminder_id,
                    sent_at: now,
                })))
            }
            _ => Ok(None),
        }
    }
}

struct MemoryClaim {
    rows: Arc<Mutex<HashMap<Uuid, Row>>>,
    fail: Arc<AtomicBool>,
    reminder_id: Uuid,
    sent_at: DateTime<Utc>,
}

#[async_trait]
impl ReminderClaim for MemoryClaim {
    async fn commit(self: Box<Self>) -> Result<()> {
        let failing = self.fail.load(Ordering::SeqCst);
        if let Some(row) = self.rows.lock().unwrap().get_mut(&self.reminder_id) {
            row.held = false;
            if !failing {
                row.sent_at = Some(self.sent_at);
            }
        }
        if failing {
            bail!("MemoryReminderStore: commit failed");
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        if let Some(row) = self.rows.lock().unwrap().get_mut(&self.reminder_id) {
            row.held = false;
        }
        Ok(())
    }
}
