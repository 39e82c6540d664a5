// In-memory doubles for the notification pipeline.
//
// - MemoryNotificationStore (NotificationStore): Vec-backed, can fail writes
// - ScriptedChannel (ChannelDispatcher): records sends, replays scripted errors

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use taskpulse_common::{ChannelKind, Notification, NotificationStatus, RetryPolicy};

use crate::message::RenderedMessage;
use crate::notify::{ChannelDispatcher, DispatchError};
use crate::store::NotificationStore;

// ---------------------------------------------------------------------------
// MemoryNotificationStore
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryNotificationStore {
    records: Mutex<Vec<Notification>>,
    fail_writes: AtomicBool,
}

impl MemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn all(&self) -> Vec<Notification> {
        self.records.lock().unwrap().clone()
    }

    pub fn by_channel(&self, channel: ChannelKind) -> Vec<Notification> {
        self.all()
            .into_iter()
            .filter(|n| n.channel == channel)
            .collect()
    }

    /// Insert a record as-is, bypassing the pending-first rule.
    pub fn insert(&self, notification: Notification) {
        self.records.lock().unwrap().push(notification);
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("MemoryNotificationStore: writes disabled");
        }
        Ok(())
    }

    fn settle(&self, id: Uuid, apply: impl FnOnce(&mut Notification)) -> Result<bool> {
        self.check_writable()?;
        let mut records = self.records.lock().unwrap();
        match records
            .iter_mut()
            .find(|n| n.id == id && n.status == NotificationStatus::Pending)
        {
            Some(n) => {
                apply(n);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl NotificationStore for MemoryNotificationStore {
    async fn create_pending(&self, notification: &Notification) -> Result<bool> {
        self.check_writable()?;
        let mut records = self.records.lock().unwrap();
        let taken = records.iter().any(|n| {
            n.event_id == notification.event_id
                && n.channel == notification.channel
                && n.attempt == notification.attempt
        });
        if taken {
            return Ok(false);
        }
        records.push(Notification {
            status: NotificationStatus::Pending,
            ..notification.clone()
        });
        Ok(true)
    }

    async fn mark_sent(&self, id: Uuid, sent_at: DateTime<Utc>) -> Result<bool> {
        self.settle(id, |n| {
            n.status = NotificationStatus::Sent;
            n.sent_at = Some(sent_at);
        })
    }

    async fn mark_failed(&self, id: Uuid, failed_at: DateTime<Utc>, error: &str) -> Result<bool> {
        self.settle(id, |n| {
            n.status = NotificationStatus::Failed;
            n.failed_at = Some(failed_at);
            n.error = Some(error.to_string());
        })
    }

    async fn get(&self, id: Uuid) -> Result<Option<Notification>> {
        Ok(self.all().into_iter().find(|n| n.id == id))
    }

    async fn for_event(&self, event_id: Uuid) -> Result<Vec<Notification>> {
        Ok(self
            .all()
            .into_iter()
            .filter(|n| n.event_id == event_id)
            .collect())
    }

    async fn retry_candidates(
        &self,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Notification>> {
        let all = self.all();
        let mut candidates: Vec<(DateTime<Utc>, Notification)> = all
            .iter()
            .filter(|n| n.status == NotificationStatus::Failed && n.attempt < policy.max_attempts)
            .filter(|n| !all.iter().any(|r| r.retry_of == Some(n.id)))
            .filter_map(|n| {
                let at = policy.retry_at(n.failed_at?, n.attempt)?;
                (at <= now).then(|| (at, n.clone()))
            })
            .collect();
        candidates.sort_by_key(|(at, n)| (*at, n.id));
        candidates.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(candidates.into_iter().map(|(_, n)| n).collect())
    }
}

// ---------------------------------------------------------------------------
// ScriptedChannel
// ---------------------------------------------------------------------------

/// A channel that succeeds unless told otherwise. Scripted errors are
/// returned one per dispatch; `fail_always` overrides the script.
pub struct ScriptedChannel {
    kind: ChannelKind,
    sent: Mutex<Vec<(String, RenderedMessage)>>,
    script: Mutex<VecDeque<DispatchError>>,
    always: Mutex<Option<DispatchError>>,
}

impl ScriptedChannel {
    pub fn new(kind: ChannelKind) -> Self {
        Self {
            kind,
            sent: Mutex::new(Vec::new()),
            script: Mutex::new(VecDeque::new()),
            always: Mutex::new(None),
        }
    }

    pub fn fail_next(&self, errors: impl IntoIterator<Item = DispatchError>) {
        self.script.lock().unwrap().extend(errors);
    }

    pub fn fail_always(&self, error: Option<DispatchError>) {
        *self.always.lock().unwrap() = error;
    }

    /// Successful deliveries, as (recipient, message).
    pub fn sent(&self) -> Vec<(String, RenderedMessage)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChannelDispatcher for ScriptedChannel {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    async fn dispatch(&self, recipient: &str, message: &RenderedMessage) -> Result<(), DispatchError> {
        if let Some(e) = self.always.lock().unwrap().clone() {
            return Err(e);
        }
        if let Some(e) = self.script.lock().unwrap().pop_front() {
            return Err(e);
        }
        self.sent
            .lock()
            .unwrap()
            .push((recipient.to_string(), message.clone()));
        Ok(())
    }

    async fn check(&self) -> Result<(), String> {
        match self.always.lock().unwrap().as_ref() {
            Some(DispatchError::AuthenticationFailed(reason)) => Err(reason.clone()),
            _ => Ok(()),
        }
    }
}
