//! Email relay and push gateway against a stub provider.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::Value;

use taskpulse_notifications::config::{EmailConfig, PushConfig};
use taskpulse_notifications::{
    ChannelDispatcher, DispatchError, EmailRelay, PushGateway, RenderedMessage,
};

#[derive(Default)]
struct Provider {
    /// Status the send endpoint answers with; 202 when unset.
    status: Mutex<Option<u16>>,
    delay: Mutex<Option<Duration>>,
    bodies: Mutex<Vec<Value>>,
    auth: Mutex<Vec<String>>,
}

async fn accept(State(p): State<Arc<Provider>>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if let Some(auth) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        p.auth.lock().unwrap().push(auth.to_string());
    }
    p.bodies.lock().unwrap().push(body);
    let delay = *p.delay.lock().unwrap();
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
    let status = p.status.lock().unwrap().unwrap_or(202);
    (StatusCode::from_u16(status).unwrap(), "provider says no").into_response()
}

async fn account(headers: HeaderMap) -> StatusCode {
    match headers.get("authorization").and_then(|v| v.to_str().ok()) {
        Some("Bearer good-key") => StatusCode::OK,
        _ => StatusCode::UNAUTHORIZED,
    }
}

async fn start_provider() -> (String, Arc<Provider>) {
    let provider = Arc::new(Provider::default());
    let app = Router::new()
        .route("/messages", post(accept))
        .route("/push", post(accept))
        .route("/account", get(account))
        .route("/status", get(account))
        .with_state(provider.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), provider)
}

fn email(base: &str, key: &str, timeout: Duration) -> EmailRelay {
    EmailRelay::new(&EmailConfig {
        api_url: base.to_string(),
        api_key: key.to_string(),
        from: "TaskPulse <reminders@taskpulse.app>".into(),
        timeout,
    })
    .unwrap()
}

fn push(base: &str, key: &str) -> PushGateway {
    PushGateway::new(&PushConfig {
        api_url: base.to_string(),
        api_key: key.to_string(),
        timeout: Duration::from_secs(5),
    })
    .unwrap()
}

fn message() -> RenderedMessage {
    RenderedMessage {
        subject: "Reminder: Book dentist".into(),
        body: "Your task \"Book dentist\" is due at 2026-02-01 10:00 UTC.".into(),
    }
}

#[tokio::test]
async fn email_posts_message_with_bearer_key() {
    let (base, provider) = start_provider().await;
    let relay = email(&base, "good-key", Duration::from_secs(5));

    relay.dispatch("ada@example.com", &message()).await.unwrap();

    let bodies = provider.bodies.lock().unwrap();
    assert_eq!(bodies[0]["to"], "ada@example.com");
    assert_eq!(bodies[0]["subject"], "Reminder: Book dentist");
    assert_eq!(bodies[0]["from"], "TaskPulse <reminders@taskpulse.app>");
    assert_eq!(*provider.auth.lock().unwrap(), vec!["Bearer good-key".to_string()]);
}

#[tokio::test]
async fn email_failure_modes_are_classified() {
    let (base, provider) = start_provider().await;
    let relay = email(&base, "good-key", Duration::from_secs(5));

    *provider.status.lock().unwrap() = Some(401);
    assert!(matches!(
        relay.dispatch("ada@example.com", &message()).await,
        Err(DispatchError::AuthenticationFailed(_))
    ));

    *provider.status.lock().unwrap() = Some(422);
    assert!(matches!(
        relay.dispatch("ada@example.com", &message()).await,
        Err(DispatchError::InvalidRecipient(_))
    ));

    *provider.status.lock().unwrap() = Some(503);
    assert!(matches!(
        relay.dispatch("ada@example.com", &message()).await,
        Err(DispatchError::Unavailable(_))
    ));
}

#[tokio::test]
async fn email_rejects_implausible_address_locally() {
    let (base, provider) = start_provider().await;
    let relay = email(&base, "good-key", Duration::from_secs(5));

    let err = relay.dispatch("not-an-address", &message()).await.unwrap_err();
    assert_eq!(err, DispatchError::InvalidRecipient("not-an-address".into()));
    assert!(provider.bodies.lock().unwrap().is_empty());
}

#[tokio::test]
async fn email_timeout_is_reported() {
    let (base, provider) = start_provider().await;
    *provider.delay.lock().unwrap() = Some(Duration::from_millis(500));
    let relay = email(&base, "good-key", Duration::from_millis(50));

    let err = relay.dispatch("ada@example.com", &message()).await.unwrap_err();
    assert!(matches!(err, DispatchError::Timeout(_)));
}

#[tokio::test]
async fn push_failure_modes_are_classified() {
    let (base, provider) = start_provider().await;
    let gateway = push(&base, "good-key");

    *provider.status.lock().unwrap() = Some(410);
    assert!(matches!(
        gateway.dispatch("device-token-123", &message()).await,
        Err(DispatchError::ExpiredToken(_))
    ));

    *provider.status.lock().unwrap() = Some(400);
    assert!(matches!(
        gateway.dispatch("device-token-123", &message()).await,
        Err(DispatchError::MalformedToken(_))
    ));

    *provider.status.lock().unwrap() = Some(502);
    assert!(matches!(
        gateway.dispatch("device-token-123", &message()).await,
        Err(DispatchError::Unavailable(_))
    ));
}

#[tokio::test]
async fn push_rejects_malformed_token_locally() {
    let (base, provider) = start_provider().await;
    let gateway = push(&base, "good-key");

    let err = gateway.dispatch("bad token", &message()).await.unwrap_err();
    assert!(matches!(err, DispatchError::MalformedToken(_)));
    assert!(provider.bodies.lock().unwrap().is_empty());
}

#[tokio::test]
async fn unreachable_provider_is_unavailable() {
    let gateway = push("http://127.0.0.1:1", "good-key");
    let err = gateway.dispatch("device-token-123", &message()).await.unwrap_err();
    assert!(matches!(err, DispatchError::Unavailable(_)));
}

#[tokio::test]
async fn credential_checks() {
    let (base, _provider) = start_provider().await;

    assert!(email(&base, "good-key", Duration::from_secs(5)).check().await.is_ok());
    assert!(push(&base, "good-key").check().await.is_ok());

    let err = email(&base, "stale-key", Duration::from_secs(5)).check().await.unwrap_err();
    assert!(err.contains("credentials"));
    assert!(push(&base, "stale-key").check().await.is_err());
}
