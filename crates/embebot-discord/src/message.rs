use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use embebot_core::model::Message;
use embebot_gateway::{DispatchContext, HandlerError, MessageHandler};
use embebot_store::GuildSettingsRepo;

use crate::matcher::{anything_enabled, reply_content, UrlMatcher};
use crate::rest::DiscordApi;

/// Replies to guild messages containing supported links with embed-friendly
/// rewrites, suppresses the original embeds, and queues a check that the
/// suppression stuck.
pub struct MessageRelay {
    api: Arc<dyn DiscordApi>,
    settings: GuildSettingsRepo,
    matcher: Arc<UrlMatcher>,
}

impl MessageRelay {
    pub fn new(api: Arc<dyn DiscordApi>, settings: GuildSettingsRepo, matcher: Arc<UrlMatcher>) -> Self {
        Self {
            api,
            settings,
            matcher,
        }
    }
}

#[async_trait]
impl MessageHandler for MessageRelay {
    #[instrument(skip_all, fields(message_id = %message.id, channel_id = %message.channel_id))]
    async fn on_message(&self, ctx: DispatchContext, message: Message) -> Result<(), HandlerError> {
        let Some(guild) = &message.guild_id else {
            return Ok(());
        };

        let settings = self.settings.load(guild)?;
        if !anything_enabled(&settings) {
            debug!("no services enabled");
            return Ok(());
        }

        let rewrites = self.matcher.rewrites(&message.content, &settings);
        if rewrites.is_empty() {
            return Ok(());
        }

        if let Err(e) = self.api.suppress_embeds(&message.channel_id, &message.id).await {
            warn!(error = %e, kind = e.error_kind(), "initial embed suppression failed");
        }

        let content = reply_content(&rewrites);
        self.api
            .send_reply(&message.channel_id, &message.id, Some(guild), &content)
            .await?;
        info!(links = rewrites.len(), "posted rewritten links");

        let queued = ctx
            .gateway
            .enqueue_verification(message.id.clone(), message.channel_id.clone())
            .await?;
        if !queued {
            debug!("verification already pending");
        }
        Ok(())
    }
}
