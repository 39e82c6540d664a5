//! Notification Consumer: delivers `reminder.due.v1` events over email and
//! push, records every attempt, and retries failed deliveries out of band.

pub mod config;
pub mod consumer;
pub mod delivery;
pub mod message;
pub mod notify;
pub mod retry_sweep;
pub mod store;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use config::NotificationConfig;
pub use consumer::{NotificationConsumer, ReminderOutcome, CONSUMER};
pub use delivery::Delivery;
pub use message::{render_reminder, RenderedMessage};
pub use notify::{ChannelDispatcher, Channels, DispatchError, EmailRelay, PushGateway};
pub use retry_sweep::{RetrySweep, SweepReport};
pub use store::{NotificationStore, PgNotificationStore};
