use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn, Instrument};

use embebot_core::model::{Interaction, Message, Ready};

use crate::actor::GatewayHandle;
use crate::error::HandlerError;

/// What handlers get alongside the event.
#[derive(Clone)]
pub struct DispatchContext {
    pub gateway: GatewayHandle,
}

#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn on_message(&self, ctx: DispatchContext, message: Message) -> Result<(), HandlerError>;
}

#[async_trait]
pub trait InteractionHandler: Send + Sync {
    async fn on_interaction(
        &self,
        ctx: DispatchContext,
        interaction: Interaction,
    ) -> Result<(), HandlerError>;
}

/// Routing result the session acts on.
#[derive(Debug)]
pub enum Routed {
    Ready(Ready),
    Resumed,
    Spawned,
    Ignored,
}

pub struct DispatchRouter {
    ctx: DispatchContext,
    tracker: TaskTracker,
    messages: Option<Arc<dyn MessageHandler>>,
    interactions: Option<Arc<dyn InteractionHandler>>,
}

impl DispatchRouter {
    pub fn new(
        ctx: DispatchContext,
        tracker: TaskTracker,
        messages: Option<Arc<dyn MessageHandler>>,
        interactions: Option<Arc<dyn InteractionHandler>>,
    ) -> Self {
        Self {
            ctx,
            tracker,
            messages,
            interactions,
        }
    }

    pub fn route(&self, name: &str, data: Value) -> Routed {
        match name {
            "READY" => match serde_json::from_value::<Ready>(data) {
                Ok(ready) => Routed::Ready(ready),
                Err(e) => {
                    warn!(error = %e, "undecodable READY payload");
                    Routed::Ignored
                }
            },
            "RESUMED" => Routed::Resumed,
            "MESSAGE_CREATE" => self.route_message(data),
            "INTERACTION_CREATE" => self.route_interaction(data),
            other => {
                debug!(event = other, "unhandled dispatch");
                Routed::Ignored
            }
        }
    }

    fn route_message(&self, data: Value) -> Routed {
        let Some(handler) = self.messages.clone() else {
            return Routed::Ignored;
        };
        let message: Message = match serde_json::from_value(data) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "undecodable MESSAGE_CREATE payload");
                return Routed::Ignored;
            }
        };
        if message.author.bot {
            return Routed::Ignored;
        }

        let span = tracing::info_span!(
            "message",
            message_id = %message.id,
            guild_id = message.guild_id.as_ref().map(|g| g.as_str()),
        );
        let ctx = self.ctx.clone();
        self.tracker.spawn(
            async move {
                if let Err(e) = handler.on_message(ctx, message).await {
                    warn!(error = %e, kind = e.error_kind(), "message handler failed");
                }
            }
            .instrument(span),
        );
        Routed::Spawned
    }

    fn route_interaction(&self, data: Value) -> Routed {
        let Some(handler) = self.interactions.clone() else {
            return Routed::Ignored;
        };
        let interaction: Interaction = match serde_json::from_value(data) {
            Ok(i) => i,
            Err(e) => {
                warn!(error = %e, "undecodable INTERACTION_CREATE payload");
                return Routed::Ignored;
            }
        };

        let span = tracing::info_span!(
            "interaction",
            interaction_id = %interaction.id,
            guild_id = interaction.guild_id.as_ref().map(|g| g.as_str()),
        );
        let ctx = self.ctx.clone();
        self.tracker.spawn(
            async move {
                if let Err(e) = handler.on_interaction(ctx, interaction).await {
                    warn!(error = %e, kind = e.error_kind(), "interaction handler failed");
                }
            }
            .instrument(span),
        );
        Routed::Spawned
    }
}

/// Stop accepting handler tasks and wait up to `grace` for running ones.
/// Returns false if some were still running when the grace period ran out.
pub async fn drain_handlers(tracker: &TaskTracker, grace: Duration) -> bool {
    tracker.close();
    let pending = tracker.len();
    if pending > 0 {
        info!(pending, ?grace, "waiting for in-flight handlers");
    }
    match tokio::time::timeout(grace, tracker.wait()).await {
        Ok(()) => true,
        Err(_) => {
            warn!(pending = tracker.len(), "handlers still running after grace period");
            false
        }
    }
}
