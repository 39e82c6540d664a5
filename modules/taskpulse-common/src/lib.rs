pub mod config;
pub mod error;
pub mod events;
pub mod recurrence;
pub mod reminder;
pub mod retry;
pub mod types;

pub use config::ServiceConfig;
pub use error::ConfigError;
pub use events::{DomainEvent, EventDecodeError, EventEnvelope, RawEnvelope, Topic};
pub use recurrence::{
    compute_next, next_occurrence, RecurrenceConfig, RecurrenceError, RecurrencePattern,
    RecurrenceRule,
};
pub use reminder::RemindBefore;
pub use retry::RetryPolicy;
pub use types::*;
