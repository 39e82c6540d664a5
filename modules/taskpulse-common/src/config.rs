use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use tracing::info;

use crate::error::ConfigError;

/// Settings every taskpulse service shares, loaded from environment variables.
/// Service-specific settings live next to each service and reuse the helpers
/// below.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub service_name: String,

    // Postgres
    pub database_url: String,

    // Broker sidecar
    pub dapr_http_endpoint: String,
    pub pubsub_name: String,

    // HTTP server
    pub http_host: String,
    pub http_port: u16,

    // Consumers
    pub consumer_workers: usize,
    pub event_log_retention_days: u32,

    // Publisher
    pub publish_buffer_capacity: usize,
    pub publish_flush_interval: Duration,

    pub shutdown_grace: Duration,
}

impl ServiceConfig {
    /// Load shared configuration. Reads `.env` first if one exists.
    pub fn from_env(service_name: &str) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        Ok(Self {
            service_name: service_name.to_string(),
            database_url: required_env("DATABASE_URL")?,
            dapr_http_endpoint: env_or("DAPR_HTTP_ENDPOINT", "http://localhost:3500"),
            pubsub_name: env_or("PUBSUB_NAME", "taskpulse-pubsub"),
            http_host: env_or("HTTP_HOST", "0.0.0.0"),
            http_port: env_parse("HTTP_PORT", 8080)?,
            consumer_workers: at_least_one("CONSUMER_WORKERS", env_parse("CONSUMER_WORKERS", 4)?)?,
            event_log_retention_days: env_parse("EVENT_LOG_RETENTION_DAYS", 30)?,
            publish_buffer_capacity: at_least_one(
                "PUBLISH_BUFFER_CAPACITY",
                env_parse("PUBLISH_BUFFER_CAPACITY", 1000)?,
            )?,
            publish_flush_interval: Duration::from_millis(env_parse(
                "PUBLISH_FLUSH_INTERVAL_MS",
                1000,
            )?),
            shutdown_grace: Duration::from_secs(env_parse("SHUTDOWN_GRACE_SECS", 10)?),
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }

    /// Log the loaded configuration with credentials masked.
    pub fn log_redacted(&self) {
        info!(
            service = self.service_name.as_str(),
            database_url = redact_url(&self.database_url).as_str(),
            dapr = self.dapr_http_endpoint.as_str(),
            pubsub = self.pubsub_name.as_str(),
            bind = self.bind_addr().as_str(),
            workers = self.consumer_workers,
            buffer_capacity = self.publish_buffer_capacity,
            retention_days = self.event_log_retention_days,
            "Configuration loaded"
        );
    }
}

// ---------------------------------------------------------------------------
// Env helpers
// ---------------------------------------------------------------------------

pub fn required_env(key: &str) -> Result<String, ConfigError> {
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::Missing(key.to_string())),
    }
}

pub fn env_or(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Optional variable; unset or blank means `None`.
pub fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

pub fn env_parse<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    parse_value(key, env::var(key).ok(), default)
}

/// Parse a raw variable value, falling back to `default` when unset or blank.
pub fn parse_value<T>(key: &str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match raw {
        Some(v) if !v.trim().is_empty() => {
            v.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                key: key.to_string(),
                value: v.clone(),
                reason: e.to_string(),
            })
        }
        _ => Ok(default),
    }
}

pub fn at_least_one<T>(key: &str, value: T) -> Result<T, ConfigError>
where
    T: PartialOrd + From<u8> + Display,
{
    if value < T::from(1) {
        return Err(ConfigError::Invalid {
            key: key.to_string(),
            value: value.to_string(),
            reason: "must be at least 1".to_string(),
        });
    }
    Ok(value)
}

/// Mask the password component of a connection URL.
pub fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let Some((credentials, host)) = rest.rsplit_once('@') else {
        return url.to_string();
    };
    match credentials.split_once(':') {
        Some((user, _)) => format!("{scheme}://{user}:***@{host}"),
        None => url.to_string(),
    }
}
