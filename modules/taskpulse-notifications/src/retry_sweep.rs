//! Failed-notification retry sweep.
//!
//! A failed record with `attempt < max_attempts` and no retry yet becomes
//! eligible once `failed_at + base * multiplier^(attempt-1)` has passed. The
//! sweep writes a new pending record pointing at it and dispatches that.
//! Records at `max_attempts` stay failed for good.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use taskpulse_common::{Notification, NotificationStatus};

use crate::delivery::{retry_of, Delivery};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub retried: usize,
    pub sent: usize,
    pub failed: usize,
}

pub struct RetrySweep {
    delivery: Arc<Delivery>,
    batch_size: i64,
}

impl RetrySweep {
    pub fn new(delivery: Arc<Delivery>, batch_size: i64) -> Self {
        Self {
            delivery,
            batch_size,
        }
    }

    /// When `failed` becomes eligible for another attempt.
    pub fn eligible_at(&self, failed: &Notification) -> Option<DateTime<Utc>> {
        self.delivery
            .retry_policy()
            .retry_at(failed.failed_at?, failed.attempt)
    }

    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let policy = self.delivery.retry_policy();
        let store = self.delivery.store();
        let candidates = store
            .retry_candidates(policy, now, self.batch_size)
            .await?;

        let mut report = SweepReport::default();
        for failed in candidates {
            match self.eligible_at(&failed) {
                Some(at) if at <= now => {}
                _ => continue,
            }

            let next = retry_of(&failed);
            if !store.create_pending(&next).await? {
                debug!(notification_id = %failed.id, "Retry already claimed");
                continue;
            }
            report.retried += 1;
            match self.delivery.attempt(next).await?.status {
                NotificationStatus::Sent => report.sent += 1,
                _ => report.failed += 1,
            }
        }

        if report.retried > 0 {
            info!(
                retried = report.retried,
                sent = report.sent,
                failed = report.failed,
                "Notification retry sweep finished"
            );
        }
        Ok(report)
    }
}
