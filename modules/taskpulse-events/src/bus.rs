//! Broker seam. Production traffic goes through the Dapr sidecar's pub/sub
//! HTTP API; tests use the in-memory bus from [`crate::testing`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use uuid::Uuid;

use taskpulse_common::{RawEnvelope, Topic};

/// A serialized envelope ready for the broker.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub topic: Topic,
    pub partition_key: String,
    pub event_id: Uuid,
    pub event_type: String,
    pub body: Vec<u8>,
}

impl OutboundMessage {
    /// Parse the body back into an envelope.
    pub fn envelope(&self) -> Result<RawEnvelope, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// Connection failure, timeout, or a 5xx from the broker. Worth retrying.
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    /// The broker refused the message. Retrying will not help.
    #[error("broker rejected message ({status}): {body}")]
    Rejected { status: u16, body: String },
}

impl BusError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

#[async_trait]
pub trait EventBus: Send + Sync {
    async fn send(&self, message: &OutboundMessage) -> Result<(), BusError>;

    /// Broker reachability, for health checks.
    async fn health(&self) -> Result<(), BusError>;
}

// ---------------------------------------------------------------------------
// Dapr
// ---------------------------------------------------------------------------

const PUBLISH_TIMEOUT: Duration = Duration::from_secs(10);

/// Publishes through a Dapr sidecar:
/// `POST {endpoint}/v1.0/publish/{pubsub}/{topic}?metadata.partitionKey={key}`.
pub struct DaprBus {
    endpoint: String,
    pubsub: String,
    http: reqwest::Client,
}

impl DaprBus {
    pub fn new(endpoint: &str, pubsub: &str) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(PUBLISH_TIMEOUT)
            .build()?;
        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            pubsub: pubsub.to_string(),
            http,
        })
    }

    fn publish_url(&self, topic: Topic) -> String {
        format!("{}/v1.0/publish/{}/{}", self.endpoint, self.pubsub, topic)
    }
}

#[async_trait]
impl EventBus for DaprBus {
    async fn send(&self, message: &OutboundMessage) -> Result<(), BusError> {
        let resp = self
            .http
            .post(self.publish_url(message.topic))
            .query(&[("metadata.partitionKey", message.partition_key.as_str())])
            .header(CONTENT_TYPE, "application/json")
            .body(message.body.clone())
            .send()
            .await
            .map_err(|e| BusError::Unavailable(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }

        let body = resp.text().await.unwrap_or_default();
        if status.is_server_error() || status.as_u16() == 408 || status.as_u16() == 429 {
            Err(BusError::Unavailable(format!("status {status}: {body}")))
        } else {
            Err(BusError::Rejected {
                status: status.as_u16(),
                body,
            })
        }
    }

    async fn health(&self) -> Result<(), BusError> {
        let resp = self
            .http
            .get(format!("{}/v1.0/healthz", self.endpoint))
            .send()
            .await
            .map_err(|e| BusError::Unavailable(e.to_string()))?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(BusError::Unavailable(format!(
                "sidecar health returned {}",
                resp.status()
            )))
        }
    }
}
