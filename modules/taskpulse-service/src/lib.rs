//! Plumbing every taskpulse microservice shares: tracing setup, metrics,
//! health, Dapr subscription delivery, server lifecycle and periodic sweeps.

pub mod health;
pub mod metrics;
pub mod periodic;
pub mod server;
pub mod subscription;
pub mod telemetry;

pub use health::{BrokerCheck, HealthCheck, PostgresCheck};
pub use metrics::ServiceMetrics;
pub use subscription::{Disposition, EventHandler, Subscription};
