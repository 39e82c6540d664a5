use std::sync::Arc;

use async_trait::async_trait;

use taskpulse_common::ChannelKind;
use taskpulse_service::HealthCheck;

use super::backend::ChannelDispatcher;

/// The closed set of delivery channels, one dispatcher per [`ChannelKind`].
#[derive(Clone)]
pub struct Channels {
    email: Arc<dyn ChannelDispatcher>,
    push: Arc<dyn ChannelDispatcher>,
}

impl Channels {
    pub fn new(email: Arc<dyn ChannelDispatcher>, push: Arc<dyn ChannelDispatcher>) -> Self {
        Self { email, push }
    }

    pub fn for_kind(&self, kind: ChannelKind) -> &Arc<dyn ChannelDispatcher> {
        match kind {
            ChannelKind::Email => &self.email,
            ChannelKind::Push => &self.push,
        }
    }

    /// One health check per channel, reporting credential validity.
    pub fn health_checks(&self) -> Vec<Arc<dyn HealthCheck>> {
        ChannelKind::ALL
            .iter()
            .map(|kind| {
                Arc::new(ChannelCheck {
                    dispatcher: self.for_kind(*kind).clone(),
                }) as Arc<dyn HealthCheck>
            })
            .collect()
    }
}

struct ChannelCheck {
    dispatcher: Arc<dyn ChannelDispatcher>,
}

#[async_trait]
impl HealthCheck for ChannelCheck {
    fn name(&self) -> &'static str {
        self.dispatcher.kind().as_str()
    }

    async fn check(&self) -> Result<(), String> {
        self.dispatcher.check().await
    }
}
