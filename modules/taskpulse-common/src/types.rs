use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::recurrence::RecurrenceConfig;
use crate::reminder::RemindBefore;

// ---------------------------------------------------------------------------
// Task (owned by the task service; only the fields this pipeline reads)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

/// Point-in-time view of a task as returned by the task service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: Uuid,
    pub user_id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub due_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub recurrence: Option<Recurrence>,
    #[serde(default)]
    pub reminders: Vec<Reminder>,
}

/// Recurrence configuration attached to a task. At most one per task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recurrence {
    pub id: Uuid,
    pub task_id: Uuid,
    #[serde(flatten)]
    pub config: RecurrenceConfig,
    #[serde(default)]
    pub next_due_at: Option<DateTime<Utc>>,
    pub active: bool,
}

// ---------------------------------------------------------------------------
// Reminders
// ---------------------------------------------------------------------------

/// Reminder as stored by the task service. `sent_at` is the dispatch marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reminder {
    pub id: Uuid,
    pub task_id: Uuid,
    pub remind_before: RemindBefore,
    pub channels: Vec<ChannelKind>,
    #[serde(default)]
    pub sent_at: Option<DateTime<Utc>>,
}

impl Reminder {
    /// The schedule part of the reminder, detached from any task.
    pub fn spec(&self) -> ReminderSpec {
        ReminderSpec {
            remind_before: self.remind_before,
            channels: self.channels.clone(),
        }
    }
}

/// Reminder schedule used when creating a task. Relative to the task's due date,
/// so copying it onto a new occurrence re-anchors it automatically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderSpec {
    pub remind_before: RemindBefore,
    pub channels: Vec<ChannelKind>,
}

/// Where a user can be reached. Resolved by the scheduler at scan time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub push_token: Option<String>,
}

impl Recipient {
    /// The address for a given channel, if the user has one on file.
    pub fn address_for(&self, channel: ChannelKind) -> Option<&str> {
        match channel {
            ChannelKind::Email => self.email.as_deref(),
            ChannelKind::Push => self.push_token.as_deref(),
        }
        .filter(|s| !s.trim().is_empty())
    }
}

// ---------------------------------------------------------------------------
// Notification channels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Email,
    Push,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 2] = [ChannelKind::Email, ChannelKind::Push];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Push => "push",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "email" => Ok(Self::Email),
            "push" => Ok(Self::Push),
            other => Err(format!("unknown notification channel: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Notification delivery log
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Failed,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }

    /// Sent and failed records are immutable.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Sent | Self::Failed)
    }
}

impl fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown notification status: {other}")),
        }
    }
}

/// One dispatch attempt on one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: String,
    pub task_id: Option<Uuid>,
    pub reminder_id: Option<Uuid>,
    /// The reminder event that caused the first attempt.
    pub event_id: Uuid,
    pub channel: ChannelKind,
    pub status: NotificationStatus,
    pub recipient: Option<String>,
    pub subject: String,
    pub message: String,
    /// 1 for the first attempt, incremented by each retry record.
    pub attempt: u32,
    /// The failed record this attempt retries.
    pub retry_of: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Event log
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLogStatus {
    Processed,
    Failed,
}

impl EventLogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processed => "processed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for EventLogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventLogStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processed" => Ok(Self::Processed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown event log status: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_kind_parses_case_insensitively() {
        assert_eq!("EMAIL".parse::<ChannelKind>().unwrap(), ChannelKind::Email);
        assert_eq!(" push ".parse::<ChannelKind>().unwrap(), ChannelKind::Push);
        assert!("sms".parse::<ChannelKind>().is_err());
    }

    #[test]
    fn recipient_ignores_blank_addresses() {
        let recipient = Recipient {
            email: Some("  ".into()),
            push_token: Some("tok-1".into()),
        };
        assert_eq!(recipient.address_for(ChannelKind::Email), None);
        assert_eq!(recipient.address_for(ChannelKind::Push), Some("tok-1"));
    }

    #[test]
    fn only_sent_and_failed_are_terminal() {
        assert!(!NotificationStatus::Pending.is_terminal());
        assert!(NotificationStatus::Sent.is_terminal());
        assert!(NotificationStatus::Failed.is_terminal());
    }
}
