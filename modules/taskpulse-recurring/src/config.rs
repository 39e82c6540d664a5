use std::time::Duration;

use tracing::info;

use taskpulse_common::config::{at_least_one, env_opt, env_parse, required_env};
use taskpulse_common::{ConfigError, RetryPolicy};

/// Settings for the task-service client.
#[derive(Debug, Clone)]
pub struct RecurringConfig {
    pub task_service_url: String,
    pub task_service_token: Option<String>,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub breaker_threshold: u32,
    pub breaker_cooldown: Duration,
}

impl RecurringConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let max_attempts = at_least_one(
            "TASK_SERVICE_MAX_ATTEMPTS",
            env_parse("TASK_SERVICE_MAX_ATTEMPTS", 3u32)?,
        )?;
        let backoff = Duration::from_millis(env_parse("TASK_SERVICE_BACKOFF_MS", 500u64)?);

        Ok(Self {
            task_service_url: required_env("TASK_SERVICE_URL")?
                .trim_end_matches('/')
                .to_string(),
            task_service_token: env_opt("TASK_SERVICE_TOKEN"),
            timeout: Duration::from_secs(at_least_one(
                "TASK_SERVICE_TIMEOUT_SECS",
                env_parse("TASK_SERVICE_TIMEOUT_SECS", 60u64)?,
            )?),
            retry: RetryPolicy::new(max_attempts, backoff, 2),
            breaker_threshold: at_least_one(
                "TASK_SERVICE_BREAKER_THRESHOLD",
                env_parse("TASK_SERVICE_BREAKER_THRESHOLD", 5u32)?,
            )?,
            breaker_cooldown: Duration::from_secs(env_parse(
                "TASK_SERVICE_BREAKER_COOLDOWN_SECS",
                30u64,
            )?),
        })
    }

    pub fn log_redacted(&self) {
        info!(
            task_service_url = self.task_service_url.as_str(),
            token_set = self.task_service_token.is_some(),
            timeout_secs = self.timeout.as_secs(),
            max_attempts = self.retry.max_attempts,
            breaker_threshold = self.breaker_threshold,
            "Task service client configured"
        );
    }
}
