//! Versioned event envelopes for every domain event in the pipeline.
//!
//! Pure data. Each payload type implements [`DomainEvent`], which binds it to
//! its versioned type tag, its topic, and its partition key (the owning user).
//! On the wire every event is an [`EventEnvelope`]:
//!
//! ```json
//! {
//!   "event_id": "<uuid>",
//!   "event_type": "task.completed.v1",
//!   "schema_version": "1.0",
//!   "timestamp": "<ISO-8601 UTC>",
//!   "data": { ... }
//! }
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::recurrence::RecurrenceConfig;
use crate::types::{ChannelKind, Priority, Recipient, ReminderSpec};

pub const SCHEMA_VERSION: &str = "1.0";
const SCHEMA_MAJOR: &str = "1";

// ---------------------------------------------------------------------------
// Topics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    #[serde(rename = "task-events")]
    TaskEvents,
    #[serde(rename = "reminders")]
    Reminders,
    #[serde(rename = "notifications")]
    Notifications,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskEvents => "task-events",
            Self::Reminders => "reminders",
            Self::Notifications => "notifications",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// A payload type that can travel inside an [`EventEnvelope`].
pub trait DomainEvent: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Versioned type tag, e.g. `task.completed.v1`.
    const EVENT_TYPE: &'static str;
    const TOPIC: Topic;

    /// Routing key for the broker. Events of one user share a partition.
    fn partition_key(&self) -> &str;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope<T> {
    pub event_id: Uuid,
    pub event_type: String,
    pub schema_version: String,
    pub timestamp: DateTime<Utc>,
    pub data: T,
}

/// An envelope whose payload has not been decoded yet.
pub type RawEnvelope = EventEnvelope<serde_json::Value>;

impl<T: DomainEvent> EventEnvelope<T> {
    /// Wrap a payload with a fresh event id and the current time.
    pub fn new(data: T) -> Self {
        Self::at(Uuid::new_v4(), Utc::now(), data)
    }

    /// Wrap a payload with an explicit id and timestamp.
    pub fn at(event_id: Uuid, timestamp: DateTime<Utc>, data: T) -> Self {
        Self {
            event_id,
            event_type: T::EVENT_TYPE.to_string(),
            schema_version: SCHEMA_VERSION.to_string(),
            timestamp,
            data,
        }
    }

    pub fn topic(&self) -> Topic {
        T::TOPIC
    }

    pub fn partition_key(&self) -> &str {
        self.data.partition_key()
    }

    /// Erase the payload type, keeping the envelope fields.
    pub fn to_raw(&self) -> Result<RawEnvelope, serde_json::Error> {
        Ok(EventEnvelope {
            event_id: self.event_id,
            event_type: self.event_type.clone(),
            schema_version: self.schema_version.clone(),
            timestamp: self.timestamp,
            data: serde_json::to_value(&self.data)?,
        })
    }
}

impl RawEnvelope {
    /// Parse an envelope from its JSON wire form.
    pub fn from_json(value: serde_json::Value) -> Result<Self, EventDecodeError> {
        serde_json::from_value(value).map_err(EventDecodeError::Envelope)
    }

    /// Decode the payload as `T`, checking the type tag and schema version.
    pub fn decode<T: DomainEvent>(&self) -> Result<EventEnvelope<T>, EventDecodeError> {
        if self.event_type != T::EVENT_TYPE {
            return Err(EventDecodeError::WrongType {
                expected: T::EVENT_TYPE,
                actual: self.event_type.clone(),
            });
        }
        let major = self.schema_version.split('.').next().unwrap_or_default();
        if major != SCHEMA_MAJOR {
            return Err(EventDecodeError::UnsupportedVersion(
                self.schema_version.clone(),
            ));
        }

        let data = serde_json::from_value(self.data.clone()).map_err(|source| {
            EventDecodeError::Payload {
                event_type: T::EVENT_TYPE,
                source,
            }
        })?;

        Ok(EventEnvelope {
            event_id: self.event_id,
            event_type: self.event_type.clone(),
            schema_version: self.schema_version.clone(),
            timestamp: self.timestamp,
            data,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EventDecodeError {
    #[error("expected event type {expected}, got {actual}")]
    WrongType {
        expected: &'static str,
        actual: String,
    },

    #[error("unsupported schema version {0}")]
    UnsupportedVersion(String),

    #[error("malformed {event_type} payload: {source}")]
    Payload {
        event_type: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("malformed event envelope: {0}")]
    Envelope(#[source] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Task lifecycle (topic: task-events)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskCreated {
    pub task_id: Uuid,
    pub user_id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub due_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub recurrence: Option<RecurrenceConfig>,
    #[serde(default)]
    pub reminders: Vec<ReminderSpec>,
    /// The completed task this occurrence was generated from, if any.
    #[serde(default)]
    pub generated_from: Option<Uuid>,
}

impl DomainEvent for TaskCreated {
    const EVENT_TYPE: &'static str = "task.created.v1";
    const TOPIC: Topic = Topic::TaskEvents;

    fn partition_key(&self) -> &str {
        &self.user_id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskUpdated {
    pub task_id: Uuid,
    pub user_id: String,
    #[serde(default)]
    pub changed_fields: Vec<String>,
    #[serde(default)]
    pub due_at: Option<DateTime<Utc>>,
}

impl DomainEvent for TaskUpdated {
    const EVENT_TYPE: &'static str = "task.updated.v1";
    const TOPIC: Topic = Topic::TaskEvents;

    fn partition_key(&self) -> &str {
        &self.user_id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskCompleted {
    pub task_id: Uuid,
    pub user_id: String,
    pub completed_at: DateTime<Utc>,
    #[serde(default)]
    pub has_recurrence: bool,
    #[serde(default)]
    pub recurrence_id: Option<Uuid>,
}

impl DomainEvent for TaskCompleted {
    const EVENT_TYPE: &'static str = "task.completed.v1";
    const TOPIC: Topic = Topic::TaskEvents;

    fn partition_key(&self) -> &str {
        &self.user_id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDeleted {
    pub task_id: Uuid,
    pub user_id: String,
}

impl DomainEvent for TaskDeleted {
    const EVENT_TYPE: &'static str = "task.deleted.v1";
    const TOPIC: Topic = Topic::TaskEvents;

    fn partition_key(&self) -> &str {
        &self.user_id
    }
}

// ---------------------------------------------------------------------------
// Reminders (topic: reminders)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReminderDue {
    pub reminder_id: Uuid,
    pub task_id: Uuid,
    pub user_id: String,
    pub title: String,
    pub due_at: DateTime<Utc>,
    pub remind_at: DateTime<Utc>,
    pub channels: Vec<ChannelKind>,
    #[serde(default)]
    pub recipient: Recipient,
}

impl DomainEvent for ReminderDue {
    const EVENT_TYPE: &'static str = "reminder.due.v1";
    const TOPIC: Topic = Topic::Reminders;

    fn partition_key(&self) -> &str {
        &self.user_id
    }
}

// ---------------------------------------------------------------------------
// Notification outcomes (topic: notifications)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationSent {
    pub notification_id: Uuid,
    pub user_id: String,
    #[serde(default)]
    pub task_id: Option<Uuid>,
    #[serde(default)]
    pub reminder_id: Option<Uuid>,
    pub channel: ChannelKind,
    pub attempt: u32,
    pub sent_at: DateTime<Utc>,
}

impl DomainEvent for NotificationSent {
    const EVENT_TYPE: &'static str = "notification.sent.v1";
    const TOPIC: Topic = Topic::Notifications;

    fn partition_key(&self) -> &str {
        &self.user_id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationFailed {
    pub notification_id: Uuid,
    pub user_id: String,
    #[serde(default)]
    pub task_id: Option<Uuid>,
    #[serde(default)]
    pub reminder_id: Option<Uuid>,
    pub channel: ChannelKind,
    pub attempt: u32,
    pub error: String,
    pub failed_at: DateTime<Utc>,
    /// Whether the retry sweep will attempt this delivery again.
    pub will_retry: bool,
}

impl DomainEvent for NotificationFailed {
    const EVENT_TYPE: &'static str = "notification.failed.v1";
    const TOPIC: Topic = Topic::Notifications;

    fn partition_key(&self) -> &str {
        &self.user_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn completed() -> TaskCompleted {
        TaskCompleted {
            task_id: Uuid::nil(),
            user_id: "user-1".into(),
            completed_at: Utc.with_ymd_and_hms(2026, 1, 7, 15, 0, 0).unwrap(),
            has_recurrence: true,
            recurrence_id: None,
        }
    }

    #[test]
    fn envelope_serializes_to_wire_shape() {
        let envelope = EventEnvelope::at(
            Uuid::nil(),
            Utc.with_ymd_and_hms(2026, 1, 7, 15, 0, 1).unwrap(),
            completed(),
        );
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["event_type"], "task.completed.v1");
        assert_eq!(value["schema_version"], "1.0");
        assert_eq!(value["timestamp"], "2026-01-07T15:00:01Z");
        assert_eq!(value["data"]["user_id"], "user-1");
        assert_eq!(value["data"]["has_recurrence"], true);
    }

    #[test]
    fn raw_envelope_decodes_matching_type() {
        let envelope = EventEnvelope::new(completed());
        let raw = envelope.to_raw().unwrap();
        let decoded = raw.decode::<TaskCompleted>().unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn decode_rejects_other_event_types() {
        let raw = EventEnvelope::new(completed()).to_raw().unwrap();
        let err = raw.decode::<ReminderDue>().unwrap_err();
        assert!(matches!(
            err,
            EventDecodeError::WrongType {
                expected: "reminder.due.v1",
                ..
            }
        ));
    }

    #[test]
    fn decode_rejects_unknown_major_version() {
        let mut raw = EventEnvelope::new(completed()).to_raw().unwrap();
        raw.schema_version = "2.0".into();
        assert!(matches!(
            raw.decode::<TaskCompleted>(),
            Err(EventDecodeError::UnsupportedVersion(v)) if v == "2.0"
        ));

        raw.schema_version = "1.3".into();
        assert!(raw.decode::<TaskCompleted>().is_ok());
    }

    #[test]
    fn decode_reports_malformed_payload() {
        let raw = RawEnvelope::from_json(json!({
            "event_id": Uuid::new_v4(),
            "event_type": "task.completed.v1",
            "schema_version": "1.0",
            "timestamp": "2026-01-07T15:00:00Z",
            "data": { "task_id": "not-a-uuid" }
        }))
        .unwrap();
        assert!(matches!(
            raw.decode::<TaskCompleted>(),
            Err(EventDecodeError::Payload { .. })
        ));
    }

    #[test]
    fn missing_has_recurrence_defaults_to_false() {
        let raw = RawEnvelope::from_json(json!({
            "event_id": Uuid::new_v4(),
            "event_type": "task.completed.v1",
            "schema_version": "1.0",
            "timestamp": "2026-01-07T15:00:00Z",
            "data": {
                "task_id": Uuid::new_v4(),
                "user_id": "u",
                "completed_at": "2026-01-07T15:00:00Z"
            }
        }))
        .unwrap();
        assert!(!raw.decode::<TaskCompleted>().unwrap().data.has_recurrence);
    }

    #[test]
    fn every_event_routes_by_user() {
        let envelope = EventEnvelope::new(completed());
        assert_eq!(envelope.partition_key(), "user-1");
        assert_eq!(envelope.topic(), Topic::TaskEvents);
        assert_eq!(ReminderDue::TOPIC.as_str(), "reminders");
        assert_eq!(NotificationFailed::TOPIC.as_str(), "notifications");
    }
}
