//! Failed-notification retry sweep.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

use taskpulse_common::events::{NotificationFailed, NotificationSent};
use taskpulse_common::{ChannelKind, Notification, NotificationStatus, RetryPolicy};
use taskpulse_events::testing::MemoryBus;
use taskpulse_events::EventPublisher;
use taskpulse_notifications::testing::{MemoryNotificationStore, ScriptedChannel};
use taskpulse_notifications::{Channels, Delivery, DispatchError, RetrySweep};

struct Harness {
    push: Arc<ScriptedChannel>,
    store: Arc<MemoryNotificationStore>,
    bus: Arc<MemoryBus>,
    sweep: RetrySweep,
}

fn harness() -> Harness {
    let email = Arc::new(ScriptedChannel::new(ChannelKind::Email));
    let push = Arc::new(ScriptedChannel::new(ChannelKind::Push));
    let store = Arc::new(MemoryNotificationStore::new());
    let bus = Arc::new(MemoryBus::new());
    let delivery = Arc::new(Delivery::new(
        Channels::new(email, push.clone()),
        store.clone(),
        Arc::new(EventPublisher::new(bus.clone(), 100)),
        RetryPolicy::new(3, Duration::from_secs(60), 4),
    ));
    Harness {
        push,
        store,
        bus,
        sweep: RetrySweep::new(delivery, 50),
    }
}

fn failed_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 9, 14, 0, 0).unwrap()
}

fn failed_push(attempt: u32) -> Notification {
    Notification {
        id: Uuid::new_v4(),
        user_id: "user-3".into(),
        task_id: Some(Uuid::new_v4()),
        reminder_id: Some(Uuid::new_v4()),
        event_id: Uuid::new_v4(),
        channel: ChannelKind::Push,
        status: NotificationStatus::Failed,
        recipient: Some("device-token-xyz".into()),
        subject: "Reminder: Call the bank".into(),
        message: "Your task \"Call the bank\" is due at 2026-01-09 15:00 UTC.".into(),
        attempt,
        retry_of: None,
        created_at: failed_at(),
        sent_at: None,
        failed_at: Some(failed_at()),
        error: Some("service unavailable: status 503".into()),
    }
}

#[tokio::test]
async fn not_retried_before_backoff_elapses() {
    let h = harness();
    h.store.insert(failed_push(1));

    let report = h.sweep.run_once(failed_at() + chrono::Duration::seconds(59)).await.unwrap();

    assert_eq!(report.retried, 0);
    assert_eq!(h.store.all().len(), 1);
}

#[tokio::test]
async fn retry_creates_linked_record_and_publishes_outcome() {
    let h = harness();
    let original = failed_push(1);
    h.store.insert(original.clone());

    let report = h.sweep.run_once(failed_at() + chrono::Duration::seconds(60)).await.unwrap();
    assert_eq!(report.retried, 1);
    assert_eq!(report.sent, 1);

    let records = h.store.all();
    assert_eq!(records.len(), 2);
    let retry = records.iter().find(|n| n.retry_of == Some(original.id)).unwrap();
    assert_eq!(retry.attempt, 2);
    assert_eq!(retry.status, NotificationStatus::Sent);
    assert_eq!(retry.event_id, original.event_id);

    // The failed record itself is untouched.
    let still = records.iter().find(|n| n.id == original.id).unwrap();
    assert_eq!(still.status, NotificationStatus::Failed);

    let sent = h.bus.events_of::<NotificationSent>();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].data.attempt, 2);
}

#[tokio::test]
async fn second_retry_waits_four_times_longer() {
    let h = harness();
    h.store.insert(failed_push(2));

    let early = h.sweep.run_once(failed_at() + chrono::Duration::seconds(239)).await.unwrap();
    assert_eq!(early.retried, 0);

    let due = h.sweep.run_once(failed_at() + chrono::Duration::seconds(240)).await.unwrap();
    assert_eq!(due.retried, 1);
}

#[tokio::test]
async fn final_attempt_failure_is_permanent() {
    let h = harness();
    h.push.fail_always(Some(DispatchError::Unavailable("status 503".into())));
    h.store.insert(failed_push(2));

    let report = h.sweep.run_once(failed_at() + chrono::Duration::hours(1)).await.unwrap();
    assert_eq!(report.failed, 1);

    let failed = h.bus.events_of::<NotificationFailed>();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].data.attempt, 3);
    assert!(!failed[0].data.will_retry);

    let again = h.sweep.run_once(failed_at() + chrono::Duration::days(1)).await.unwrap();
    assert_eq!(again.retried, 0);
    assert_eq!(h.store.all().len(), 2);
}

#[tokio::test]
async fn each_failure_is_retried_once() {
    let h = harness();
    h.store.insert(failed_push(1));
    let later = failed_at() + chrono::Duration::minutes(5);

    assert_eq!(h.sweep.run_once(later).await.unwrap().retried, 1);
    assert_eq!(h.sweep.run_once(later).await.unwrap().retried, 0);
}

#[tokio::test]
async fn backoff_backlog_does_not_hide_eligible_failures() {
    let h = harness();
    // A full batch of older second attempts, none due until +240s.
    for _ in 0..50 {
        h.store.insert(failed_push(2));
    }
    let fresh = Notification {
        failed_at: Some(failed_at() + chrono::Duration::seconds(1)),
        ..failed_push(1)
    };
    h.store.insert(fresh.clone());

    let report = h.sweep.run_once(failed_at() + chrono::Duration::minutes(2)).await.unwrap();

    assert_eq!(report.retried, 1);
    assert!(h.store.all().iter().any(|n| n.retry_of == Some(fresh.id)));
}
