//! Envelope builders for the task lifecycle events the owning service emits
//! after each state change.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use taskpulse_common::events::{TaskCompleted, TaskCreated, TaskDeleted, TaskUpdated};
use taskpulse_common::{EventEnvelope, TaskSnapshot};

pub fn task_created(task: &TaskSnapshot, generated_from: Option<Uuid>) -> EventEnvelope<TaskCreated> {
    EventEnvelope::new(TaskCreated {
        task_id: task.id,
        user_id: task.user_id.clone(),
        title: task.title.clone(),
        description: task.description.clone(),
        priority: task.priority,
        tags: task.tags.clone(),
        due_at: task.due_at,
        recurrence: task.recurrence.as_ref().map(|r| r.config.clone()),
        reminders: task.reminders.iter().map(|r| r.spec()).collect(),
        generated_from,
    })
}

pub fn task_updated(task: &TaskSnapshot, changed_fields: Vec<String>) -> EventEnvelope<TaskUpdated> {
    EventEnvelope::new(TaskUpdated {
        task_id: task.id,
        user_id: task.user_id.clone(),
        changed_fields,
        due_at: task.due_at,
    })
}

/// `has_recurrence` is set whenever a recurrence is attached, active or not.
/// Consumers re-read the recurrence and honour `active` at processing time.
pub fn task_completed(task: &TaskSnapshot, completed_at: DateTime<Utc>) -> EventEnvelope<TaskCompleted> {
    EventEnvelope::new(TaskCompleted {
        task_id: task.id,
        user_id: task.user_id.clone(),
        completed_at,
        has_recurrence: task.recurrence.is_some(),
        recurrence_id: task.recurrence.as_ref().map(|r| r.id),
    })
}

pub fn task_deleted(task: &TaskSnapshot) -> EventEnvelope<TaskDeleted> {
    EventEnvelope::new(TaskDeleted {
        task_id: task.id,
        user_id: task.user_id.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use taskpulse_common::{
        ChannelKind, Priority, Recurrence, RecurrenceConfig, RemindBefore, Reminder, TaskStatus,
    };

    fn recurring_task(active: bool) -> TaskSnapshot {
        let id = Uuid::new_v4();
        TaskSnapshot {
            id,
            user_id: "user-7".into(),
            title: "Water plants".into(),
            description: Some("Balcony".into()),
            status: TaskStatus::Pending,
            priority: Priority::High,
            tags: vec!["home".into()],
            due_at: Some(Utc.with_ymd_and_hms(2026, 1, 7, 15, 0, 0).unwrap()),
            recurrence: Some(Recurrence {
                id: Uuid::new_v4(),
                task_id: id,
                config: RecurrenceConfig::weekly(1, [0, 2, 4]),
                next_due_at: None,
                active,
            }),
            reminders: vec![Reminder {
                id: Uuid::new_v4(),
                task_id: id,
                remind_before: RemindBefore::hours(1),
                channels: vec![ChannelKind::Email],
                sent_at: None,
            }],
        }
    }

    #[test]
    fn created_copies_recurrence_and_reminder_schedule() {
        let task = recurring_task(true);
        let envelope = task_created(&task, None);

        assert_eq!(envelope.event_type, "task.created.v1");
        assert_eq!(envelope.data.recurrence, Some(RecurrenceConfig::weekly(1, [0, 2, 4])));
        assert_eq!(envelope.data.reminders.len(), 1);
        assert_eq!(envelope.data.reminders[0].remind_before, RemindBefore::hours(1));
        assert_eq!(envelope.partition_key(), "user-7");
    }

    #[test]
    fn completed_flags_attached_recurrence() {
        let at = Utc.with_ymd_and_hms(2026, 1, 7, 15, 0, 0).unwrap();
        let stopped = task_completed(&recurring_task(false), at);
        assert!(stopped.data.has_recurrence);
        assert!(stopped.data.recurrence_id.is_some());

        let mut plain = recurring_task(true);
        plain.recurrence = None;
        let completed = task_completed(&plain, at);
        assert!(!completed.data.has_recurrence);
        assert_eq!(completed.data.completed_at, at);
    }
}
