//! Socket transport seam and its WebSocket implementation.
//!
//! A transport is opened synchronously and then reports everything that
//! happens to it as [`TransportFrame`]s on the session's event channel. Each
//! frame carries the generation it was opened with so the session can ignore
//! a superseded connection.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::http::Uri;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use crate::error::TransportError;

/// Close code reported when the stream ends without a close frame.
pub const ABNORMAL_CLOSE: u16 = 1006;

#[derive(Clone, Debug, PartialEq)]
pub enum TransportEvent {
    Opened,
    Message(String),
    Closed { code: u16, reason: String },
    Error(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct TransportFrame {
    pub generation: u64,
    pub event: TransportEvent,
}

pub type EventSender = mpsc::UnboundedSender<TransportFrame>;

pub trait Connector: Send + Sync {
    /// Start connecting to `url`. An `Err` means the attempt never started;
    /// every later outcome arrives on `events`.
    fn open(
        &self,
        url: &str,
        generation: u64,
        events: EventSender,
    ) -> Result<Box<dyn Transport>, TransportError>;
}

pub trait Transport: Send {
    fn send(&self, text: String) -> Result<(), TransportError>;

    /// Begin a close handshake. A `Closed` event with `code` follows.
    fn close(&self, code: u16, reason: &str);
}

/// Parse and check a gateway URL before any I/O happens.
pub fn validate_url(url: &str) -> Result<Uri, TransportError> {
    let uri: Uri = url
        .parse()
        .map_err(|e| TransportError::InvalidUrl(format!("{url}: {e}")))?;
    match uri.scheme_str() {
        Some("ws") | Some("wss") => {}
        other => {
            return Err(TransportError::InvalidUrl(format!(
                "{url}: unsupported scheme {other:?}"
            )))
        }
    }
    if uri.host().map_or(true, str::is_empty) {
        return Err(TransportError::InvalidUrl(format!("{url}: missing host")));
    }
    Ok(uri)
}

#[derive(Clone, Debug)]
pub struct TungsteniteConnector {
    connect_timeout: Duration,
    close_timeout: Duration,
}

impl TungsteniteConnector {
    pub fn new(connect_timeout: Duration, close_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            close_timeout,
        }
    }
}

impl Default for TungsteniteConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(15), Duration::from_secs(5))
    }
}

enum Outbound {
    Text(String),
    Close(u16, String),
}

struct TungsteniteTransport {
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl Transport for TungsteniteTransport {
    fn send(&self, text: String) -> Result<(), TransportError> {
        self.outbound
            .send(Outbound::Text(text))
            .map_err(|_| TransportError::Closed)
    }

    fn close(&self, code: u16, reason: &str) {
        let _ = self.outbound.send(Outbound::Close(code, reason.to_string()));
    }
}

impl Connector for TungsteniteConnector {
    fn open(
        &self,
        url: &str,
        generation: u64,
        events: EventSender,
    ) -> Result<Box<dyn Transport>, TransportError> {
        validate_url(url)?;
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_socket(
            url.to_string(),
            generation,
            events,
            rx,
            self.connect_timeout,
            self.close_timeout,
        ));
        Ok(Box::new(TungsteniteTransport { outbound: tx }))
    }
}

async fn run_socket(
    url: String,
    generation: u64,
    events: EventSender,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    connect_timeout: Duration,
    close_timeout: Duration,
) {
    let emit = |event: TransportEvent| {
        let _ = events.send(TransportFrame { generation, event });
    };

    let connect = tokio_tungstenite::connect_async(url.as_str());
    let ws = match tokio::time::timeout(connect_timeout, connect).await {
        Ok(Ok((ws, _response))) => ws,
        Ok(Err(e)) => {
            emit(TransportEvent::Error(e.to_string()));
            return;
        }
        Err(_) => {
            warn!(generation, ?connect_timeout, "websocket connect timed out");
            emit(TransportEvent::Error(format!(
                "connect timed out after {connect_timeout:?}"
            )));
            return;
        }
    };
    debug!(generation, "websocket open");
    emit(TransportEvent::Opened);

    let (mut write, mut read) = ws.split();
    loop {
        tokio::select! {
            out = outbound.recv() => match out {
                Some(Outbound::Text(text)) => {
                    if let Err(e) = write.send(Message::Text(text)).await {
                        emit(TransportEvent::Error(e.to_string()));
                        return;
                    }
                }
                Some(Outbound::Close(code, reason)) => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.clone().into(),
                    };
                    let _ = write.send(Message::Close(Some(frame))).await;
                    // The session reacts now; finishing the handshake is best effort.
                    emit(TransportEvent::Closed { code, reason });
                    let _ = tokio::time::timeout(close_timeout, async {
                        while let Some(Ok(msg)) = read.next().await {
                            if matches!(msg, Message::Close(_)) {
                                break;
                            }
                        }
                    })
                    .await;
                    return;
                }
                None => {
                    // Session dropped this transport.
                    let _ = write.send(Message::Close(None)).await;
                    return;
                }
            },
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => emit(TransportEvent::Message(text)),
                Some(Ok(Message::Ping(payload))) => {
                    let _ = write.send(Message::Pong(payload)).await;
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.into_owned()))
                        .unwrap_or((1005, String::new()));
                    emit(TransportEvent::Closed { code, reason });
                    return;
                }
                Some(Ok(Message::Binary(bytes))) => {
                    warn!(generation, len = bytes.len(), "ignoring binary frame");
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    emit(TransportEvent::Error(e.to_string()));
                    return;
                }
                None => {
                    emit(TransportEvent::Closed {
                        code: ABNORMAL_CLOSE,
                        reason: "stream ended".into(),
                    });
                    return;
                }
            },
        }
    }
}
