//! Event plumbing shared by every taskpulse service.
//!
//! - [`event_log`]: the idempotency store consumers check before applying side effects.
//! - [`bus`]: the broker seam (Dapr pub/sub over HTTP in production).
//! - [`publisher`]: envelope publishing with a bounded fallback buffer.
//! - [`lifecycle`]: envelope builders for task lifecycle events.

pub mod bus;
pub mod event_log;
pub mod lifecycle;
pub mod publisher;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use bus::{BusError, DaprBus, EventBus, OutboundMessage};
pub use event_log::{EventLog, EventLogEntry, PgEventLog, RecordOutcome};
pub use publisher::{EventPublisher, FlushReport, PublishError, PublishStatus};
