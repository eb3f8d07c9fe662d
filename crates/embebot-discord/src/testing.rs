use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use embebot_core::ids::{ApplicationId, ChannelId, GuildId, InteractionId, MessageId, UserId};
use embebot_core::model::{InteractionResponse, Message, User};
use embebot_core::RestError;
use embebot_gateway::actor::channel;
use embebot_gateway::{DispatchContext, GatewayCommand};

use crate::commands::CommandDefinition;
use crate::rest::DiscordApi;

type Pairs = Arc<Mutex<Vec<(String, String)>>>;

/// In-memory stand-in for Discord that records every call.
pub struct MockApi {
    pub stored: Mutex<Message>,
    pub get_error: Mutex<Option<RestError>>,
    pub suppress_error: Mutex<Option<RestError>>,
    pub reply_error: Mutex<Option<RestError>>,
    pub suppressed: Mutex<Vec<(String, String)>>,
    pub replies: Mutex<Vec<(String, String)>>,
    pub callbacks: Mutex<Vec<(String, InteractionResponse)>>,
    pub registered: Mutex<Vec<String>>,
}

impl Default for MockApi {
    fn default() -> Self {
        Self {
            stored: Mutex::new(message("c1", "m1", "")),
            get_error: Mutex::new(None),
            suppress_error: Mutex::new(None),
            reply_error: Mutex::new(None),
            suppressed: Mutex::new(Vec::new()),
            replies: Mutex::new(Vec::new()),
            callbacks: Mutex::new(Vec::new()),
            registered: Mutex::new(Vec::new()),
        }
    }
}

fn message(channel: &str, id: &str, content: &str) -> Message {
    Message {
        id: MessageId::from_raw(id),
        channel_id: ChannelId::from_raw(channel),
        guild_id: None,
        author: User {
            id: UserId::from_raw("bot"),
            username: "embebot".into(),
            bot: true,
        },
        content: content.into(),
        embeds: Vec::new(),
        flags: 0,
    }
}

fn fail(slot: &Mutex<Option<RestError>>) -> Result<(), RestError> {
    match slot.lock().clone() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[async_trait]
impl DiscordApi for MockApi {
    async fn get_message(&self, _channel: &ChannelId, _message: &MessageId) -> Result<Message, RestError> {
        fail(&self.get_error)?;
        Ok(self.stored.lock().clone())
    }

    async fn send_reply(
        &self,
        channel: &ChannelId,
        _reply_to: &MessageId,
        _guild: Option<&GuildId>,
        content: &str,
    ) -> Result<Message, RestError> {
        fail(&self.reply_error)?;
        self.replies
            .lock()
            .push((channel.to_string(), content.to_string()));
        Ok(message(channel.as_str(), "reply", content))
    }

    async fn edit_message(
        &self,
        channel: &ChannelId,
        id: &MessageId,
        content: &str,
    ) -> Result<Message, RestError> {
        Ok(message(channel.as_str(), id.as_str(), content))
    }

    async fn suppress_embeds(&self, channel: &ChannelId, id: &MessageId) -> Result<(), RestError> {
        fail(&self.suppress_error)?;
        self.suppressed
            .lock()
            .push((channel.to_string(), id.to_string()));
        Ok(())
    }

    async fn respond_to_interaction(
        &self,
        id: &InteractionId,
        _token: &str,
        response: &InteractionResponse,
    ) -> Result<(), RestError> {
        self.callbacks.lock().push((id.to_string(), response.clone()));
        Ok(())
    }

    async fn register_commands(
        &self,
        _application: &ApplicationId,
        commands: &[CommandDefinition],
    ) -> Result<(), RestError> {
        self.registered
            .lock()
            .extend(commands.iter().map(|c| c.name.to_string()));
        Ok(())
    }
}

/// A dispatch context backed by a task that accepts every verification
/// request and records `(target, channel)` pairs.
pub fn context() -> (DispatchContext, Pairs) {
    let (gateway, mut rx) = channel();
    let queued: Pairs = Arc::default();
    let sink = queued.clone();
    tokio::spawn(async move {
        while let Some(cmd) = rx.recv().await {
            if let GatewayCommand::EnqueueVerification {
                target_id,
                channel_id,
                reply,
            } = cmd
            {
                sink.lock().push((target_id.to_string(), channel_id.to_string()));
                let _ = reply.send(Ok(true));
            }
        }
    });
    (DispatchContext { gateway }, queued)
}
