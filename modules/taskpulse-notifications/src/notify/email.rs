use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use tracing::warn;

use taskpulse_common::ChannelKind;

use super::backend::{ChannelDispatcher, DispatchError};
use crate::config::EmailConfig;
use crate::message::RenderedMessage;

#[derive(Serialize)]
struct SendEmail<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    text: &'a str,
}

/// Transactional email relay reached over HTTP (`POST {api}/messages`).
pub struct EmailRelay {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    from: String,
    timeout: Duration,
}

impl EmailRelay {
    pub fn new(config: &EmailConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            http: reqwest::Client::builder().timeout(config.timeout).build()?,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            from: config.from.clone(),
            timeout: config.timeout,
        })
    }

    fn plausible_address(address: &str) -> bool {
        match address.split_once('@') {
            Some((local, domain)) => {
                !local.is_empty()
                    && domain.contains('.')
                    && !address.chars().any(char::is_whitespace)
            }
            None => false,
        }
    }
}

#[async_trait]
impl ChannelDispatcher for EmailRelay {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Email
    }

    async fn dispatch(&self, recipient: &str, message: &RenderedMessage) -> Result<(), DispatchError> {
        if !Self::plausible_address(recipient) {
            return Err(DispatchError::InvalidRecipient(recipient.to_string()));
        }

        let resp = self
            .http
            .post(format!("{}/messages", self.api_url))
            .bearer_auth(&self.api_key)
            .json(&SendEmail {
                from: &self.from,
                to: recipient,
                subject: &message.subject,
                text: &message.body,
            })
            .send()
            .await
            .map_err(|e| DispatchError::from_transport(e, self.timeout))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        warn!(status = %status, body = %body, "Email relay returned non-success");

        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                DispatchError::AuthenticationFailed(format!("status {}: {}", status.as_u16(), body))
            }
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                DispatchError::InvalidRecipient(format!("{recipient}: {body}"))
            }
            _ => DispatchError::Unavailable(format!("status {}: {}", status.as_u16(), body)),
        })
    }

    async fn check(&self) -> Result<(), String> {
        let resp = self
            .http
            .get(format!("{}/account", self.api_url))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        match resp.status() {
            s if s.is_success() => Ok(()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err("email relay rejected credentials".to_string())
            }
            s => Err(format!("email relay returned {s}")),
        }
    }
}
