// In-memory doubles for the event plumbing.
//
// - MemoryBus (EventBus): records messages, can be switched unavailable or rejecting
// - MemoryEventLog (EventLog): HashMap-backed, can be told to fail writes

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use taskpulse_common::{DomainEvent, EventEnvelope, EventLogStatus, RawEnvelope};

use crate::bus::{BusError, EventBus, OutboundMessage};
use crate::event_log::{EventLog, EventLogEntry, RecordOutcome};

// ---------------------------------------------------------------------------
// MemoryBus
// ---------------------------------------------------------------------------

pub struct MemoryBus {
    messages: Mutex<Vec<OutboundMessage>>,
    available: AtomicBool,
    rejecting: AtomicBool,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            available: AtomicBool::new(true),
            rejecting: AtomicBool::new(false),
        }
    }

    /// While false, every send fails transiently.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// While true, every send is rejected outright.
    pub fn set_rejecting(&self, rejecting: bool) {
        self.rejecting.store(rejecting, Ordering::SeqCst);
    }

    pub fn messages(&self) -> Vec<OutboundMessage> {
        self.messages.lock().unwrap().clone()
    }

    pub fn envelopes(&self) -> Vec<RawEnvelope> {
        self.messages()
            .iter()
            .map(|m| m.envelope().unwrap())
            .collect()
    }

    /// Every published event of type `T`, decoded.
    pub fn events_of<T: DomainEvent>(&self) -> Vec<EventEnvelope<T>> {
        self.envelopes()
            .iter()
            .filter(|e| e.event_type == T::EVENT_TYPE)
            .map(|e| e.decode::<T>().unwrap())
            .collect()
    }

    pub fn clear(&self) {
        self.messages.lock().unwrap().clear();
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for MemoryBus {
    async fn send(&self, message: &OutboundMessage) -> Result<(), BusError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(BusError::Unavailable("memory bus switched off".into()));
        }
        if self.rejecting.load(Ordering::SeqCst) {
            return Err(BusError::Rejected {
                status: 400,
                body: "memory bus rejecting".into(),
            });
        }
        self.messages.lock().unwrap().push(message.clone());
        Ok(())
    }

    async fn health(&self) -> Result<(), BusError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BusError::Unavailable("memory bus switched off".into()))
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryEventLog
// ---------------------------------------------------------------------------

pub struct MemoryEventLog {
    entries: Mutex<HashMap<(Uuid, String), EventLogEntry>>,
    fail_writes: AtomicBool,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// While true, `record` returns an error as if the database were down.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn entries(&self) -> Vec<EventLogEntry> {
        self.entries.lock().unwrap().values().cloned().collect()
    }

    pub fn entry(&self, event_id: Uuid, consumer_service: &str) -> Option<EventLogEntry> {
        self.entries
            .lock()
            .unwrap()
            .get(&(event_id, consumer_service.to_string()))
            .cloned()
    }
}

impl Default for MemoryEventLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventLog for MemoryEventLog {
    async fn get(&self, event_id: Uuid, consumer_service: &str) -> Result<Option<EventLogEntry>> {
        Ok(self.entry(event_id, consumer_service))
    }

    async fn record(&self, entry: &EventLogEntry) -> Result<RecordOutcome> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("MemoryEventLog: writes disabled");
        }
        let mut entries = self.entries.lock().unwrap();
        let key = (entry.event_id, entry.consumer_service.clone());
        match entries.get(&key) {
            Some(existing) if existing.status == EventLogStatus::Processed => {
                Ok(RecordOutcome::AlreadyProcessed)
            }
            _ => {
                entries.insert(key, entry.clone());
                Ok(RecordOutcome::Inserted)
            }
        }
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        Ok((before - entries.len()) as u64)
    }
}
