use std::time::Duration;

use secrecy::SecretString;

use embebot_core::protocol::{self, ConnectionProperties, Presence};

/// Instance key of the single production actor.
pub const DEFAULT_INSTANCE: &str = "main";

/// Settings for one gateway session actor.
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    /// Endpoint used when no resume URL is known.
    pub gateway_url: String,
    pub token: SecretString,
    /// Names the persisted rows this actor owns.
    pub instance: String,
    pub intents: u64,
    pub properties: ConnectionProperties,
    pub presence: Option<Presence>,
    /// Delay before reconnecting after a resumable close.
    pub reconnect_delay: Duration,
    /// Delay between verification drains.
    pub retry_delay: Duration,
    pub max_verify_attempts: u32,
    /// Upper bound on the TCP, TLS and upgrade handshake.
    pub connect_timeout: Duration,
    /// How long a locally initiated close may wait for the peer.
    pub close_timeout: Duration,
}

impl GatewayConfig {
    pub fn new(token: SecretString) -> Self {
        Self {
            gateway_url: protocol::GATEWAY_URL.to_string(),
            token,
            instance: DEFAULT_INSTANCE.to_string(),
            intents: protocol::intents::REQUIRED,
            properties: ConnectionProperties::default(),
            presence: Some(Presence::watching_messages()),
            reconnect_delay: Duration::from_secs(5),
            retry_delay: Duration::from_secs(5),
            max_verify_attempts: 3,
            connect_timeout: Duration::from_secs(15),
            close_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = instance.into();
        self
    }

    pub fn with_gateway_url(mut self, url: impl Into<String>) -> Self {
        self.gateway_url = url.into();
        self
    }
}
