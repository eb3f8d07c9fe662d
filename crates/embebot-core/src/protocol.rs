//! Gateway wire protocol: opcodes, close codes, and frame (de)serialization.
//!
//! Inbound frames arrive as `{op, d, s, t}` JSON text messages. Only the
//! opcodes the session actor reacts to are decoded into typed events; anything
//! else surfaces as [`GatewayEvent::Unknown`] so the caller can log and move on.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default gateway endpoint (API v10, JSON encoding).
pub const GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

/// Query string every gateway URL must carry, including resume URLs.
pub const GATEWAY_QUERY: &str = "v=10&encoding=json";

pub mod opcode {
    pub const DISPATCH: u8 = 0;
    pub const HEARTBEAT: u8 = 1;
    pub const IDENTIFY: u8 = 2;
    pub const RESUME: u8 = 6;
    pub const RECONNECT: u8 = 7;
    pub const INVALID_SESSION: u8 = 9;
    pub const HELLO: u8 = 10;
    pub const HEARTBEAT_ACK: u8 = 11;
}

pub mod intents {
    pub const GUILD_MESSAGES: u64 = 1 << 9;
    pub const MESSAGE_CONTENT: u64 = 1 << 15;

    /// The only two capabilities the bot consumes.
    pub const REQUIRED: u64 = GUILD_MESSAGES | MESSAGE_CONTENT;
}

pub mod close_code {
    /// Local close after a normal, operator-requested disconnect.
    pub const NORMAL: u16 = 1000;
    /// Local close for heartbeat timeout or a remote reconnect request.
    pub const RESUMABLE: u16 = 4000;

    /// Codes after which the session can never be resumed.
    pub const TERMINAL: [u16; 6] = [4004, 4010, 4011, 4012, 4013, 4014];

    pub fn is_terminal(code: u16) -> bool {
        TERMINAL.contains(&code)
    }
}

/// Append the required query string to a resume URL handed out by READY.
pub fn with_gateway_query(url: &str) -> String {
    if url.contains('?') {
        url.to_string()
    } else {
        format!("{}/?{}", url.trim_end_matches('/'), GATEWAY_QUERY)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("dispatch frame without event name")]
    MissingEventName,

    #[error("invalid hello payload: {0}")]
    InvalidHello(String),
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    op: u8,
    #[serde(default)]
    d: Value,
    #[serde(default)]
    s: Option<i64>,
    #[serde(default)]
    t: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HelloData {
    heartbeat_interval: u64,
}

/// Decoded inbound gateway event.
#[derive(Clone, Debug, PartialEq)]
pub enum GatewayEvent {
    Dispatch { name: String, data: Value },
    HeartbeatRequest,
    Reconnect,
    InvalidSession { resumable: bool },
    Hello { heartbeat_interval_ms: u64 },
    HeartbeatAck,
    Unknown { op: u8 },
}

/// A decoded frame together with its sequence number, if any.
#[derive(Clone, Debug, PartialEq)]
pub struct InboundFrame {
    pub sequence: Option<i64>,
    pub event: GatewayEvent,
}

impl InboundFrame {
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let raw: RawFrame =
            serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

        let event = match raw.op {
            opcode::DISPATCH => GatewayEvent::Dispatch {
                name: raw.t.ok_or(ProtocolError::MissingEventName)?,
                data: raw.d,
            },
            opcode::HEARTBEAT => GatewayEvent::HeartbeatRequest,
            opcode::RECONNECT => GatewayEvent::Reconnect,
            opcode::INVALID_SESSION => GatewayEvent::InvalidSession {
                resumable: raw.d.as_bool().unwrap_or(false),
            },
            opcode::HELLO => {
                let hello: HelloData = serde_json::from_value(raw.d)
                    .map_err(|e| ProtocolError::InvalidHello(e.to_string()))?;
                if hello.heartbeat_interval == 0 {
                    return Err(ProtocolError::InvalidHello("zero heartbeat interval".into()));
                }
                GatewayEvent::Hello {
                    heartbeat_interval_ms: hello.heartbeat_interval,
                }
            }
            opcode::HEARTBEAT_ACK => GatewayEvent::HeartbeatAck,
            op => GatewayEvent::Unknown { op },
        };

        Ok(Self {
            sequence: raw.s,
            event,
        })
    }
}

/// Static client metadata sent with IDENTIFY.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConnectionProperties {
    pub os: String,
    pub browser: String,
    pub device: String,
}

impl Default for ConnectionProperties {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            browser: "embebot".to_string(),
            device: "embebot".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: u8,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Presence {
    pub activities: Vec<Activity>,
    pub status: String,
    pub since: Option<i64>,
    pub afk: bool,
}

impl Presence {
    /// "Watching your messages", do-not-disturb.
    pub fn watching_messages() -> Self {
        Self {
            activities: vec![Activity {
                name: "your messages".into(),
                kind: 3,
            }],
            status: "dnd".into(),
            since: None,
            afk: false,
        }
    }
}

#[derive(Clone, PartialEq, Serialize)]
pub struct Identify {
    pub token: String,
    pub intents: u64,
    pub properties: ConnectionProperties,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence: Option<Presence>,
}

impl fmt::Debug for Identify {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identify")
            .field("token", &"[redacted]")
            .field("intents", &self.intents)
            .field("properties", &self.properties)
            .finish()
    }
}

#[derive(Clone, PartialEq, Serialize)]
pub struct Resume {
    pub token: String,
    pub session_id: String,
    pub seq: i64,
}

impl fmt::Debug for Resume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resume")
            .field("token", &"[redacted]")
            .field("session_id", &self.session_id)
            .field("seq", &self.seq)
            .finish()
    }
}

/// Frames the client sends.
#[derive(Clone, Debug, PartialEq)]
pub enum OutboundFrame {
    Heartbeat { sequence: Option<i64> },
    Identify(Identify),
    Resume(Resume),
}

#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    op: u8,
    d: &'a T,
}

impl OutboundFrame {
    pub fn opcode(&self) -> u8 {
        match self {
            Self::Heartbeat { .. } => opcode::HEARTBEAT,
            Self::Identify(_) => opcode::IDENTIFY,
            Self::Resume(_) => opcode::RESUME,
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        let op = self.opcode();
        match self {
            Self::Heartbeat { sequence } => serde_json::to_string(&Envelope { op, d: sequence }),
            Self::Identify(identify) => serde_json::to_string(&Envelope { op, d: identify }),
            Self::Resume(resume) => serde_json::to_string(&Envelope { op, d: resume }),
        }
    }
}
