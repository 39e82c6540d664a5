use std::time::Duration;

use async_trait::async_trait;

use taskpulse_common::ChannelKind;

use crate::message::RenderedMessage;

/// Why a single dispatch failed. The display text is what lands in the
/// notification's `error` column.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("connection timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("device token expired: {0}")]
    ExpiredToken(String),

    #[error("malformed device token: {0}")]
    MalformedToken(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("missing recipient: user has no {0} address on file")]
    MissingRecipient(ChannelKind),
}

impl DispatchError {
    pub(crate) fn from_transport(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            Self::Timeout(timeout)
        } else {
            Self::Unavailable(err.to_string())
        }
    }
}

/// One delivery channel.
#[async_trait]
pub trait ChannelDispatcher: Send + Sync {
    fn kind(&self) -> ChannelKind;

    /// Deliver one message to `recipient` (an email address or device token).
    async fn dispatch(&self, recipient: &str, message: &RenderedMessage) -> Result<(), DispatchError>;

    /// Whether the provider is reachable and accepts our credentials.
    async fn check(&self) -> Result<(), String>;
}
