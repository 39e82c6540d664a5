//! EventPublisher: hands envelopes to the broker, falling back to a bounded
//! in-process buffer while the broker is unreachable.
//!
//! Ordering: once anything is buffered, new events queue behind it even if
//! the broker has recovered, so the flush loop replays in insertion order.
//! The buffer lock is never held across a broker call. While a flush is
//! draining, new events queue behind the drain. Only one flush drains at a
//! time.
//!
//! Failure classes:
//! - serialization errors are fatal and never buffered
//! - broker rejections (4xx) are fatal
//! - transient broker errors buffer the message
//! - a full buffer is surfaced as [`PublishError::BufferFull`] so the caller
//!   can refuse the originating operation instead of losing the event

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use prometheus::IntGauge;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use taskpulse_common::{DomainEvent, EventEnvelope};

use crate::bus::{BusError, EventBus, OutboundMessage};

const SHUTDOWN_RETRY_PAUSE: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishStatus {
    /// The broker accepted the event.
    Delivered,
    /// The broker was unreachable; the event waits in the buffer.
    Buffered,
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("failed to serialize {event_type} event {event_id}: {source}")]
    Serialization {
        event_id: Uuid,
        event_type: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("broker rejected {event_type} event {event_id}: {source}")]
    Rejected {
        event_id: Uuid,
        event_type: String,
        #[source]
        source: BusError,
    },

    #[error("publish buffer full ({capacity} events), event {event_id} not accepted")]
    BufferFull { event_id: Uuid, capacity: usize },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub delivered: usize,
    /// Messages the broker rejected outright during the flush.
    pub dropped: usize,
    /// Messages still waiting in the buffer.
    pub remaining: usize,
}

pub struct EventPublisher {
    bus: Arc<dyn EventBus>,
    buffer: Mutex<Buffer>,
    capacity: usize,
    depth_gauge: Option<IntGauge>,
}

struct Buffer {
    queue: VecDeque<OutboundMessage>,
    /// A flush is sending the front of the queue.
    draining: bool,
}

/// Clears `draining` if a flush ends without doing so itself, e.g. when its
/// future is dropped by a timeout mid-send.
struct DrainGuard<'a> {
    publisher: &'a EventPublisher,
    armed: bool,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.publisher.buffer().draining = false;
        }
    }
}

impl EventPublisher {
    pub fn new(bus: Arc<dyn EventBus>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            bus,
            buffer: Mutex::new(Buffer {
                queue: VecDeque::with_capacity(capacity.min(1024)),
                draining: false,
            }),
            capacity,
            depth_gauge: None,
        }
    }

    /// Mirror the buffer depth into a gauge.
    pub fn with_depth_gauge(mut self, gauge: IntGauge) -> Self {
        gauge.set(0);
        self.depth_gauge = Some(gauge);
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub async fn buffer_depth(&self) -> usize {
        self.buffer().queue.len()
    }

    fn buffer(&self) -> MutexGuard<'_, Buffer> {
        self.buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Broker reachability, for health checks.
    pub async fn broker_health(&self) -> Result<(), BusError> {
        self.bus.health().await
    }

    /// Serialize and publish an envelope to its topic, keyed by its owner.
    pub async fn publish<T: DomainEvent>(
        &self,
        envelope: &EventEnvelope<T>,
    ) -> Result<PublishStatus, PublishError> {
        let body = serde_json::to_vec(envelope).map_err(|source| {
            error!(
                event_id = %envelope.event_id,
                event_type = T::EVENT_TYPE,
                error = %source,
                "Dropping event that cannot be serialized"
            );
            PublishError::Serialization {
                event_id: envelope.event_id,
                event_type: T::EVENT_TYPE,
                source,
            }
        })?;

        self.publish_message(OutboundMessage {
            topic: T::TOPIC,
            partition_key: envelope.partition_key().to_string(),
            event_id: envelope.event_id,
            event_type: envelope.event_type.clone(),
            body,
        })
        .await
    }

    /// Publish an already-serialized message.
    pub async fn publish_message(
        &self,
        message: OutboundMessage,
    ) -> Result<PublishStatus, PublishError> {
        {
            let mut buffer = self.buffer();
            if buffer.draining || !buffer.queue.is_empty() {
                return self.enqueue(&mut buffer.queue, message);
            }
        }

        match self.bus.send(&message).await {
            Ok(()) => {
                debug!(
                    event_id = %message.event_id,
                    event_type = message.event_type.as_str(),
                    topic = %message.topic,
                    "Event published"
                );
                Ok(PublishStatus::Delivered)
            }
            Err(e) if e.is_transient() => {
                warn!(
                    event_id = %message.event_id,
                    event_type = message.event_type.as_str(),
                    error = %e,
                    "Broker unavailable, buffering event"
                );
                self.enqueue(&mut self.buffer().queue, message)
            }
            Err(e) => {
                error!(
                    event_id = %message.event_id,
                    event_type = message.event_type.as_str(),
                    error = %e,
                    "Broker rejected event"
                );
                Err(PublishError::Rejected {
                    event_id: message.event_id,
                    event_type: message.event_type,
                    source: e,
                })
            }
        }
    }

    fn enqueue(
        &self,
        buffer: &mut VecDeque<OutboundMessage>,
        message: OutboundMessage,
    ) -> Result<PublishStatus, PublishError> {
        if buffer.len() >= self.capacity {
            error!(
                event_id = %message.event_id,
                event_type = message.event_type.as_str(),
                capacity = self.capacity,
                "Publish buffer full, rejecting event"
            );
            return Err(PublishError::BufferFull {
                event_id: message.event_id,
                capacity: self.capacity,
            });
        }
        buffer.push_back(message);
        self.record_depth(buffer.len());
        Ok(PublishStatus::Buffered)
    }

    /// Send buffered messages in order until the buffer is empty or the broker
    /// fails transiently.
    pub async fn flush(&self) -> FlushReport {
        let mut report = FlushReport::default();
        {
            let mut buffer = self.buffer();
            if buffer.draining || buffer.queue.is_empty() {
                report.remaining = buffer.queue.len();
                return report;
            }
            buffer.draining = true;
        }
        let mut guard = DrainGuard {
            publisher: self,
            armed: true,
        };

        loop {
            let next = {
                let mut buffer = self.buffer();
                let next = buffer.queue.front().cloned();
                if next.is_none() {
                    buffer.draining = false;
                    guard.armed = false;
                }
                next
            };
            let Some(message) = next else {
                break;
            };

            let result = self.bus.send(&message).await;
            let mut buffer = self.buffer();
            match result {
                Ok(()) => {
                    buffer.queue.pop_front();
                    report.delivered += 1;
                }
                Err(e) if e.is_transient() => {
                    debug!(
                        error = %e,
                        pending = buffer.queue.len(),
                        "Broker still unavailable"
                    );
                    buffer.draining = false;
                    guard.armed = false;
                    break;
                }
                Err(e) => {
                    error!(
                        event_id = %message.event_id,
                        event_type = message.event_type.as_str(),
                        error = %e,
                        "Broker rejected buffered event, dropping it"
                    );
                    buffer.queue.pop_front();
                    report.dropped += 1;
                }
            }
            self.record_depth(buffer.queue.len());
        }

        let buffer = self.buffer();
        report.remaining = buffer.queue.len();
        self.record_depth(buffer.queue.len());
        drop(buffer);
        if report.delivered > 0 {
            info!(
                delivered = report.delivered,
                remaining = report.remaining,
                "Flushed buffered events"
            );
        }
        report
    }

    /// Flush on a fixed interval until `shutdown` flips to true.
    pub async fn run_flush_loop(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.buffer_depth().await > 0 {
                        self.flush().await;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("Publish flush loop stopped");
    }

    /// Best-effort drain at shutdown, bounded by `grace`.
    pub async fn shutdown_flush(&self, grace: Duration) -> FlushReport {
        let deadline = Instant::now() + grace;
        let mut total = FlushReport::default();

        loop {
            match tokio::time::timeout_at(deadline, self.flush()).await {
                Ok(report) => {
                    total.delivered += report.delivered;
                    total.dropped += report.dropped;
                    total.remaining = report.remaining;
                }
                Err(_) => {
                    total.remaining = self.buffer_depth().await;
                    break;
                }
            }
            if total.remaining == 0 || Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep_until((Instant::now() + SHUTDOWN_RETRY_PAUSE).min(deadline)).await;
        }

        if total.remaining > 0 {
            error!(
                lost = total.remaining,
                "Shutdown grace period elapsed with events still buffered"
            );
        } else {
            info!(delivered = total.delivered, "Publish buffer drained");
        }
        total
    }

    fn record_depth(&self, depth: usize) {
        if let Some(gauge) = &self.depth_gauge {
            gauge.set(depth as i64);
        }
    }
}
