//! Exponential backoff policy shared by the task-service client and the
//! failed-notification retry sweep.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: u32,
    /// Cap on any single delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, multiplier: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            multiplier: multiplier.max(1),
            max_delay: Duration::from_secs(24 * 60 * 60),
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Delay to wait after attempt number `attempt` (1-based) has failed.
    /// `base * multiplier^(attempt-1)`, capped at `max_delay`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = self.multiplier.saturating_pow(exponent);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Like [`delay_after`](Self::delay_after) plus up to 10% random jitter,
    /// so synchronized retries from several workers spread out.
    pub fn jittered_delay_after(&self, attempt: u32) -> Duration {
        let delay = self.delay_after(attempt);
        let jitter_cap = (delay.as_millis() / 10) as u64;
        if jitter_cap == 0 {
            return delay;
        }
        let jitter = rand::rng().random_range(0..=jitter_cap);
        delay + Duration::from_millis(jitter)
    }

    /// When attempt number `attempt`, which failed at `failed_at`, may be
    /// tried again.
    pub fn retry_at(&self, failed_at: DateTime<Utc>, attempt: u32) -> Option<DateTime<Utc>> {
        let delay = chrono::Duration::from_std(self.delay_after(attempt)).ok()?;
        failed_at.checked_add_signed(delay)
    }

    /// Whether another attempt is allowed after `attempt` failed.
    pub fn allows_retry_after(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(500), 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_exponentially() {
        let policy = RetryPolicy::new(5, Duration::from_secs(60), 4);
        assert_eq!(policy.delay_after(1), Duration::from_secs(60));
        assert_eq!(policy.delay_after(2), Duration::from_secs(240));
        assert_eq!(policy.delay_after(3), Duration::from_secs(960));
    }

    #[test]
    fn delay_is_capped() {
        let policy =
            RetryPolicy::new(50, Duration::from_secs(1), 10).with_max_delay(Duration::from_secs(30));
        assert_eq!(policy.delay_after(2), Duration::from_secs(10));
        assert_eq!(policy.delay_after(3), Duration::from_secs(30));
        assert_eq!(policy.delay_after(40), Duration::from_secs(30));
    }

    #[test]
    fn retry_time_follows_the_failure() {
        use chrono::TimeZone;

        let policy = RetryPolicy::new(3, Duration::from_secs(60), 4);
        let failed_at = Utc.with_ymd_and_hms(2026, 1, 9, 14, 0, 0).unwrap();
        assert_eq!(policy.retry_at(failed_at, 1), Some(failed_at + chrono::Duration::seconds(60)));
        assert_eq!(policy.retry_at(failed_at, 2), Some(failed_at + chrono::Duration::seconds(240)));
    }

    #[test]
    fn jitter_stays_within_ten_percent() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1000), 2);
        for _ in 0..50 {
            let d = policy.jittered_delay_after(2);
            assert!(d >= Duration::from_millis(2000));
            assert!(d <= Duration::from_millis(2200));
        }
    }

    #[test]
    fn attempts_are_bounded() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10), 2);
        assert!(policy.allows_retry_after(1));
        assert!(policy.allows_retry_after(2));
        assert!(!policy.allows_retry_after(3));
    }

    #[test]
    fn zero_attempts_means_one() {
        let policy = RetryPolicy::new(0, Duration::from_millis(10), 0);
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.multiplier, 1);
    }
}
