//! DaprBus against a local stand-in for the sidecar's HTTP API.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use uuid::Uuid;

use taskpulse_common::events::TaskDeleted;
use taskpulse_common::{EventEnvelope, Topic};
use taskpulse_events::{BusError, DaprBus, EventBus, OutboundMessage};

#[derive(Clone, Default)]
struct Sidecar {
    received: Arc<Mutex<Vec<(String, String, String, Bytes)>>>,
}

async fn publish(
    State(sidecar): State<Sidecar>,
    Path((pubsub, topic)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> StatusCode {
    match topic.as_str() {
        "reminders" => StatusCode::SERVICE_UNAVAILABLE,
        "notifications" => StatusCode::BAD_REQUEST,
        _ => {
            let key = query.get("metadata.partitionKey").cloned().unwrap_or_default();
            sidecar.received.lock().unwrap().push((pubsub, topic, key, body));
            StatusCode::NO_CONTENT
        }
    }
}

async fn spawn_sidecar() -> (String, Sidecar) {
    let sidecar = Sidecar::default();
    let app = Router::new()
        .route("/v1.0/publish/{pubsub}/{topic}", post(publish))
        .route("/v1.0/healthz", get(|| async { StatusCode::NO_CONTENT }))
        .with_state(sidecar.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), sidecar)
}

fn message(topic: Topic) -> OutboundMessage {
    let envelope = EventEnvelope::new(TaskDeleted {
        task_id: Uuid::new_v4(),
        user_id: "user-42".into(),
    });
    OutboundMessage {
        topic,
        partition_key: "user-42".into(),
        event_id: envelope.event_id,
        event_type: envelope.event_type.clone(),
        body: serde_json::to_vec(&envelope).unwrap(),
    }
}

#[tokio::test]
async fn publishes_to_topic_with_partition_key() {
    let (endpoint, sidecar) = spawn_sidecar().await;
    let bus = DaprBus::new(&endpoint, "taskpulse-pubsub").unwrap();
    let msg = message(Topic::TaskEvents);

    bus.send(&msg).await.unwrap();

    let received = sidecar.received.lock().unwrap();
    assert_eq!(received.len(), 1);
    let (pubsub, topic, key, body) = &received[0];
    assert_eq!(pubsub, "taskpulse-pubsub");
    assert_eq!(topic, "task-events");
    assert_eq!(key, "user-42");
    assert_eq!(body.as_ref(), msg.body.as_slice());
}

#[tokio::test]
async fn server_errors_are_transient() {
    let (endpoint, _) = spawn_sidecar().await;
    let bus = DaprBus::new(&endpoint, "taskpulse-pubsub").unwrap();

    let err = bus.send(&message(Topic::Reminders)).await.unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn client_errors_are_rejections() {
    let (endpoint, _) = spawn_sidecar().await;
    let bus = DaprBus::new(&endpoint, "taskpulse-pubsub").unwrap();

    let err = bus.send(&message(Topic::Notifications)).await.unwrap_err();
    assert!(matches!(err, BusError::Rejected { status: 400, .. }));
}

#[tokio::test]
async fn unreachable_sidecar_is_transient() {
    let bus = DaprBus::new("http://127.0.0.1:1", "taskpulse-pubsub").unwrap();
    let err = bus.send(&message(Topic::TaskEvents)).await.unwrap_err();
    assert!(err.is_transient());
    assert!(bus.health().await.is_err());
}

#[tokio::test]
async fn health_checks_sidecar() {
    let (endpoint, _) = spawn_sidecar().await;
    let bus = DaprBus::new(&endpoint, "taskpulse-pubsub").unwrap();
    bus.health().await.unwrap();
}
