use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use tracing::warn;

use taskpulse_common::ChannelKind;

use super::backend::{ChannelDispatcher, DispatchError};
use crate::config::PushConfig;
use crate::message::RenderedMessage;

#[derive(Serialize)]
struct PushMessage<'a> {
    token: &'a str,
    title: &'a str,
    body: &'a str,
}

/// Mobile push gateway reached over HTTP (`POST {api}/push`).
pub struct PushGateway {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    timeout: Duration,
}

impl PushGateway {
    pub fn new(config: &PushConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            http: reqwest::Client::builder().timeout(config.timeout).build()?,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            timeout: config.timeout,
        })
    }

    fn well_formed(token: &str) -> bool {
        token.len() >= 8 && token.chars().all(|c| c.is_ascii_graphic())
    }
}

#[async_trait]
impl ChannelDispatcher for PushGateway {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Push
    }

    async fn dispatch(&self, recipient: &str, message: &RenderedMessage) -> Result<(), DispatchError> {
        if !Self::well_formed(recipient) {
            return Err(DispatchError::MalformedToken(
                "token is too short or contains invalid characters".to_string(),
            ));
        }

        let resp = self
            .http
            .post(format!("{}/push", self.api_url))
            .bearer_auth(&self.api_key)
            .json(&PushMessage {
                token: recipient,
                title: &message.subject,
                body: &message.body,
            })
            .send()
            .await
            .map_err(|e| DispatchError::from_transport(e, self.timeout))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        warn!(status = %status, body = %body, "Push gateway returned non-success");

        Err(match status {
            StatusCode::GONE | StatusCode::NOT_FOUND => DispatchError::ExpiredToken(body),
            StatusCode::BAD_REQUEST => DispatchError::MalformedToken(body),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                DispatchError::AuthenticationFailed(format!("status {}: {}", status.as_u16(), body))
            }
            _ => DispatchError::Unavailable(format!("status {}: {}", status.as_u16(), body)),
        })
    }

    async fn check(&self) -> Result<(), String> {
        let resp = self
            .http
            .get(format!("{}/status", self.api_url))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        match resp.status() {
            s if s.is_success() => Ok(()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err("push gateway rejected credentials".to_string())
            }
            s => Err(format!("push gateway returned {s}")),
        }
    }
}
