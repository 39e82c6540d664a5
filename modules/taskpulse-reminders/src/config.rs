use std::time::Duration;

use taskpulse_common::config::{at_least_one, env_parse};
use taskpulse_common::ConfigError;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub scan_interval: Duration,
    pub batch_size: i64,
}

impl SchedulerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            scan_interval: Duration::from_secs(at_least_one(
                "REMINDER_SCAN_INTERVAL_SECS",
                env_parse("REMINDER_SCAN_INTERVAL_SECS", 300u64)?,
            )?),
            batch_size: at_least_one(
                "REMINDER_BATCH_SIZE",
                env_parse("REMINDER_BATCH_SIZE", 500i64)?,
            )?,
        })
    }
}
