//! Interval-driven background loops that stop cleanly on shutdown.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use taskpulse_events::EventLog;

pub const EVENT_LOG_PURGE_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Run `tick` every `interval` until `shutdown` becomes true. A tick in
/// progress always runs to completion; errors are logged and the loop goes on.
pub async fn run_periodic<F, Fut>(
    name: &'static str,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut tick: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = tick().await {
                    warn!(task = name, error = %e, "Periodic task failed");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    debug!(task = name, "Periodic task stopped");
}

/// Hourly sweep deleting expired EventLog records.
pub async fn run_event_log_purge(
    log: Arc<dyn EventLog>,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
) {
    run_periodic("event_log_purge", interval, shutdown, || {
        let log = log.clone();
        async move {
            let removed = log.purge_expired(Utc::now()).await?;
            if removed > 0 {
                info!(removed, "Purged expired event log records");
            }
            Ok(())
        }
    })
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::Duration as ChronoDuration;
    use taskpulse_events::testing::MemoryEventLog;
    use taskpulse_events::EventLogEntry;
    use uuid::Uuid;

    #[tokio::test]
    async fn ticks_until_shutdown() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = watch::channel(false);

        let counter = ticks.clone();
        let handle = tokio::spawn(run_periodic("test", Duration::from_millis(10), rx, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(anyhow::anyhow!("errors do not stop the loop"))
            }
        }));

        tokio::time::sleep(Duration::from_millis(80)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert!(ticks.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn purge_sweep_removes_expired_entries() {
        let log = Arc::new(MemoryEventLog::new());
        let mut expired = EventLogEntry::processed(
            Uuid::new_v4(),
            "task.completed.v1",
            "recurring-task-service",
            ChronoDuration::days(30),
        );
        expired.expires_at = Utc::now() - ChronoDuration::minutes(1);
        log.record(&expired).await.unwrap();
        log.record(&EventLogEntry::processed(
            Uuid::new_v4(),
            "task.completed.v1",
            "recurring-task-service",
            ChronoDuration::days(30),
        ))
        .await
        .unwrap();

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run_event_log_purge(log.clone(), Duration::from_millis(10), rx));
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(log.entries().len(), 1);
    }
}
