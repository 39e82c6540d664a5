use std::time::Duration;

use tracing::info;

use taskpulse_common::config::{at_least_one, env_or, env_parse, required_env};
use taskpulse_common::{ConfigError, RetryPolicy};

#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub api_url: String,
    pub api_key: String,
    pub from: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct PushConfig {
    pub api_url: String,
    pub api_key: String,
    pub timeout: Duration,
}

/// Channel credentials and the failed-notification retry policy.
#[derive(Debug, Clone)]
pub struct NotificationConfig {
    pub email: EmailConfig,
    pub push: PushConfig,
    pub retry: RetryPolicy,
    pub retry_sweep_interval: Duration,
    pub retry_batch_size: i64,
}

impl NotificationConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            email: EmailConfig {
                api_url: required_env("EMAIL_API_URL")?,
                api_key: required_env("EMAIL_API_KEY")?,
                from: env_or("EMAIL_FROM", "TaskPulse <reminders@taskpulse.app>"),
                timeout: Duration::from_secs(env_parse("EMAIL_TIMEOUT_SECS", 30)?),
            },
            push: PushConfig {
                api_url: required_env("PUSH_API_URL")?,
                api_key: required_env("PUSH_API_KEY")?,
                timeout: Duration::from_secs(env_parse("PUSH_TIMEOUT_SECS", 10)?),
            },
            retry: RetryPolicy::new(
                at_least_one(
                    "NOTIFICATION_RETRY_MAX_ATTEMPTS",
                    env_parse("NOTIFICATION_RETRY_MAX_ATTEMPTS", 3u32)?,
                )?,
                Duration::from_secs(env_parse("NOTIFICATION_RETRY_BASE_SECS", 60)?),
                env_parse("NOTIFICATION_RETRY_MULTIPLIER", 4u32)?,
            ),
            retry_sweep_interval: Duration::from_secs(at_least_one(
                "NOTIFICATION_RETRY_SWEEP_SECS",
                env_parse("NOTIFICATION_RETRY_SWEEP_SECS", 300u64)?,
            )?),
            retry_batch_size: at_least_one(
                "NOTIFICATION_RETRY_BATCH_SIZE",
                env_parse("NOTIFICATION_RETRY_BATCH_SIZE", 100i64)?,
            )?,
        })
    }

    pub fn log_redacted(&self) {
        info!(
            email_api = self.email.api_url.as_str(),
            email_from = self.email.from.as_str(),
            email_timeout_secs = self.email.timeout.as_secs(),
            push_api = self.push.api_url.as_str(),
            push_timeout_secs = self.push.timeout.as_secs(),
            retry_max_attempts = self.retry.max_attempts,
            retry_base_secs = self.retry.base_delay.as_secs(),
            retry_multiplier = self.retry.multiplier,
            "Notification channels configured"
        );
    }
}
