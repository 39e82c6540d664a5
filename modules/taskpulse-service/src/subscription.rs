//! Dapr pub/sub delivery.
//!
//! The sidecar discovers subscriptions via `GET /dapr/subscribe` and pushes
//! each message to the subscription's route as a CloudEvent whose `data` is
//! our envelope. The handler's [`Disposition`] becomes the response status:
//! `SUCCESS` acknowledges, `RETRY` asks for redelivery, `DROP` dead-letters.
//!
//! Concurrency is bounded by a semaphore; a permit holder handles exactly one
//! message start to finish.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use taskpulse_common::{RawEnvelope, Topic};

use crate::metrics::ServiceMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Handled (or deliberately skipped). Do not redeliver.
    Ack,
    /// Not handled. Redeliver later.
    Retry,
    /// Will never succeed. Set aside.
    DeadLetter,
}

impl Disposition {
    pub fn as_dapr_status(&self) -> &'static str {
        match self {
            Self::Ack => "SUCCESS",
            Self::Retry => "RETRY",
            Self::DeadLetter => "DROP",
        }
    }

    pub fn as_label(&self) -> &'static str {
        match self {
            Self::Ack => "ack",
            Self::Retry => "retry",
            Self::DeadLetter => "dead_letter",
        }
    }
}

/// One consumer's message handling.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Consumer name, used as the EventLog key and metric label.
    fn consumer(&self) -> &'static str;

    async fn handle(&self, envelope: RawEnvelope) -> Disposition;
}

#[derive(Clone)]
pub struct Subscription {
    pub topic: Topic,
    pub route: &'static str,
    pub handler: Arc<dyn EventHandler>,
}

impl Subscription {
    pub fn new(topic: Topic, route: &'static str, handler: Arc<dyn EventHandler>) -> Self {
        Self {
            topic,
            route,
            handler,
        }
    }

    pub fn dead_letter_topic(&self) -> String {
        format!("{}-dlq", self.topic)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubscriptionDescriptor {
    pubsubname: String,
    topic: String,
    route: String,
    dead_letter_topic: String,
}

#[derive(Clone)]
struct DeliveryState {
    subscription: Subscription,
    metrics: ServiceMetrics,
    permits: Arc<Semaphore>,
}

/// Routes for `GET /dapr/subscribe` plus one `POST` route per subscription.
pub fn router(
    pubsub_name: &str,
    subscriptions: Vec<Subscription>,
    metrics: ServiceMetrics,
    workers: usize,
) -> Router {
    let descriptors: Vec<SubscriptionDescriptor> = subscriptions
        .iter()
        .map(|s| SubscriptionDescriptor {
            pubsubname: pubsub_name.to_string(),
            topic: s.topic.to_string(),
            route: s.route.to_string(),
            dead_letter_topic: s.dead_letter_topic(),
        })
        .collect();
    let descriptors = Arc::new(descriptors);

    let permits = Arc::new(Semaphore::new(workers.max(1)));
    let mut router = Router::new().route(
        "/dapr/subscribe",
        get(move || {
            let descriptors = descriptors.clone();
            async move { Json(descriptors.as_ref().clone()) }
        }),
    );

    for subscription in subscriptions {
        let route = subscription.route;
        let state = DeliveryState {
            subscription,
            metrics: metrics.clone(),
            permits: permits.clone(),
        };
        router = router.route(route, post(deliver).with_state(state));
    }

    router
}

async fn deliver(State(state): State<DeliveryState>, body: Bytes) -> Json<Value> {
    let disposition = process(&state, &body).await;
    Json(json!({ "status": disposition.as_dapr_status() }))
}

async fn process(state: &DeliveryState, body: &[u8]) -> Disposition {
    let handler = &state.subscription.handler;
    let consumer = handler.consumer();

    let envelope = match decode_delivery(body) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(consumer, error = %e, "Dropping undecodable delivery");
            state
                .metrics
                .record_delivery(consumer, "unknown", Disposition::DeadLetter, Default::default());
            return Disposition::DeadLetter;
        }
    };

    let Ok(_permit) = state.permits.clone().acquire_owned().await else {
        return Disposition::Retry;
    };

    state
        .metrics
        .record_lag(consumer, state.subscription.topic.as_str(), envelope.timestamp);

    let event_type = envelope.event_type.clone();
    let event_id = envelope.event_id;
    let started = Instant::now();
    let disposition = handler.handle(envelope).await;

    debug!(
        consumer,
        event_id = %event_id,
        event_type = event_type.as_str(),
        outcome = disposition.as_label(),
        "Delivery handled"
    );
    state
        .metrics
        .record_delivery(consumer, &event_type, disposition, started.elapsed());
    disposition
}

fn decode_delivery(body: &[u8]) -> Result<RawEnvelope, String> {
    let value: Value = serde_json::from_slice(body).map_err(|e| format!("body is not JSON: {e}"))?;
    let envelope = unwrap_cloud_event(value)?;
    RawEnvelope::from_json(envelope).map_err(|e| e.to_string())
}

/// Extract the envelope from a CloudEvent. Bodies that are not CloudEvents
/// are taken to be the envelope itself.
pub fn unwrap_cloud_event(body: Value) -> Result<Value, String> {
    let is_cloud_event = body.get("specversion").is_some() && body.get("data").is_some();
    if !is_cloud_event {
        return Ok(body);
    }

    match body.get("data") {
        Some(Value::String(s)) => {
            serde_json::from_str(s).map_err(|e| format!("CloudEvent data is not JSON: {e}"))
        }
        Some(data) => Ok(data.clone()),
        None => Err("CloudEvent has no data".to_string()),
    }
}
