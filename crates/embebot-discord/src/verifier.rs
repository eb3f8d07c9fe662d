use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use embebot_core::RestError;
use embebot_gateway::Verifier;
use embebot_store::RetryTask;

use crate::rest::DiscordApi;

/// Confirms that a relayed message's original embeds stayed suppressed,
/// re-suppressing them when Discord regenerated the preview.
pub struct EmbedVerifier {
    api: Arc<dyn DiscordApi>,
}

impl EmbedVerifier {
    pub fn new(api: Arc<dyn DiscordApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Verifier for EmbedVerifier {
    async fn check(&self, task: &RetryTask) -> Result<bool, RestError> {
        let message = self.api.get_message(&task.channel_id, &task.target_id).await?;
        let held = message.embeds_suppressed();
        debug!(message_id = %task.target_id, held, embeds = message.embeds.len(), "checked suppression");
        Ok(held)
    }

    async fn correct(&self, task: &RetryTask) -> Result<(), RestError> {
        self.api.suppress_embeds(&task.channel_id, &task.target_id).await
    }
}
