//! Dapr delivery routes driven through the full service app.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use taskpulse_common::events::TaskDeleted;
use taskpulse_common::{EventEnvelope, RawEnvelope, Topic};
use taskpulse_service::server::app;
use taskpulse_service::subscription::router;
use taskpulse_service::{Disposition, EventHandler, HealthCheck, ServiceMetrics, Subscription};

struct Recording {
    seen: Mutex<Vec<RawEnvelope>>,
    reply: Disposition,
}

#[async_trait]
impl EventHandler for Recording {
    fn consumer(&self) -> &'static str {
        "test-consumer"
    }

    async fn handle(&self, envelope: RawEnvelope) -> Disposition {
        self.seen.lock().unwrap().push(envelope);
        self.reply
    }
}

struct Down;

#[async_trait]
impl HealthCheck for Down {
    fn name(&self) -> &'static str {
        "broker"
    }

    async fn check(&self) -> Result<(), String> {
        Err("connection refused".into())
    }
}

fn build(reply: Disposition, checks: Vec<Arc<dyn HealthCheck>>) -> (Router, Arc<Recording>) {
    let handler = Arc::new(Recording {
        seen: Mutex::new(Vec::new()),
        reply,
    });
    let metrics = ServiceMetrics::new().unwrap();
    let routes = router(
        "taskpulse-pubsub",
        vec![Subscription::new(Topic::TaskEvents, "/events/task", handler.clone())],
        metrics.clone(),
        2,
    );
    (app(routes, checks, metrics), handler)
}

fn envelope() -> EventEnvelope<TaskDeleted> {
    EventEnvelope::new(TaskDeleted {
        task_id: Uuid::new_v4(),
        user_id: "user-1".into(),
    })
}

async fn post(app: Router, path: &str, body: Vec<u8>) -> (StatusCode, Value) {
    let response = app
        .oneshot(
            Request::post(path)
                .header("content-type", "application/cloudevents+json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

async fn get(app: Router, path: &str) -> (StatusCode, String) {
    let response = app
        .oneshot(Request::get(path).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

#[tokio::test]
async fn lists_subscriptions_with_dead_letter_topic() {
    let (app, _) = build(Disposition::Ack, vec![]);
    let (status, body) = get(app, "/dapr/subscribe").await;

    assert_eq!(status, StatusCode::OK);
    let subs: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(
        subs,
        json!([{
            "pubsubname": "taskpulse-pubsub",
            "topic": "task-events",
            "route": "/events/task",
            "deadLetterTopic": "task-events-dlq",
        }])
    );
}

#[tokio::test]
async fn cloud_event_delivery_reaches_handler() {
    let (app, handler) = build(Disposition::Ack, vec![]);
    let envelope = envelope();
    let cloud_event = json!({
        "specversion": "1.0",
        "id": "abc",
        "source": "task-service",
        "type": "com.dapr.event.sent",
        "datacontenttype": "application/json",
        "data": envelope,
    });

    let (status, body) = post(app, "/events/task", serde_json::to_vec(&cloud_event).unwrap()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "SUCCESS" }));
    let seen = handler.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].event_id, envelope.event_id);
}

#[tokio::test]
async fn handler_disposition_becomes_dapr_status() {
    let (app, _) = build(Disposition::Retry, vec![]);
    let (_, body) = post(app, "/events/task", serde_json::to_vec(&envelope()).unwrap()).await;
    assert_eq!(body, json!({ "status": "RETRY" }));

    let (app, _) = build(Disposition::DeadLetter, vec![]);
    let (_, body) = post(app, "/events/task", serde_json::to_vec(&envelope()).unwrap()).await;
    assert_eq!(body, json!({ "status": "DROP" }));
}

#[tokio::test]
async fn malformed_body_is_dropped_without_reaching_handler() {
    let (app, handler) = build(Disposition::Ack, vec![]);
    let (status, body) = post(app, "/events/task", b"{not json".to_vec()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "DROP" }));
    assert!(handler.seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn metrics_count_deliveries() {
    let (app, _) = build(Disposition::Ack, vec![]);
    post(app.clone(), "/events/task", serde_json::to_vec(&envelope()).unwrap()).await;

    let (status, text) = get(app, "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert!(text.contains(
        r#"taskpulse_events_processed_total{consumer="test-consumer",event_type="task.deleted.v1",outcome="ack"} 1"#
    ));
    assert!(text.contains("taskpulse_consumer_lag_seconds"));
}

#[tokio::test]
async fn health_reports_failing_dependency() {
    let (app, _) = build(Disposition::Ack, vec![Arc::new(Down)]);

    let (status, body) = get(app.clone(), "/health").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body.contains("connection refused"));

    let (status, _) = get(app, "/healthz").await;
    assert_eq!(status, StatusCode::OK);
}
