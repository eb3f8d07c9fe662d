//! In-process fakes for driving a session without a network.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use secrecy::SecretString;
use tokio::sync::mpsc;
use tokio_util::task::TaskTracker;

use embebot_core::model::{Interaction, Message};
use embebot_core::RestError;
use embebot_store::{Database, GatewayStateRepo, RetryTask};

use crate::actor::{self, GatewayHandle};
use crate::clock::Clock;
use crate::config::GatewayConfig;
use crate::error::{HandlerError, TransportError};
use crate::retry::Verifier;
use crate::router::{DispatchContext, DispatchRouter, InteractionHandler, MessageHandler};
use crate::session::Session;
use crate::transport::{
    Connector, EventSender, Transport, TransportEvent, TransportFrame,
};

#[derive(Debug, Default)]
pub struct ManualClock(AtomicU64);

impl ManualClock {
    pub fn new(ms: u64) -> Self {
        Self(AtomicU64::new(ms))
    }

    pub fn set(&self, ms: u64) {
        self.0.store(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct Wire {
    urls: Vec<String>,
    sent: Vec<String>,
    closes: Vec<u16>,
}

/// Records every open, send and close. `close` immediately reports `Closed`
/// back on the event channel, as a well-behaved peer would.
#[derive(Default)]
pub struct FakeConnector {
    wire: Arc<Mutex<Wire>>,
    fail_next: AtomicBool,
}

impl FakeConnector {
    pub fn fail_next_open(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn opened_urls(&self) -> Vec<String> {
        self.wire.lock().urls.clone()
    }

    pub fn sent(&self) -> Vec<serde_json::Value> {
        self.wire
            .lock()
            .sent
            .iter()
            .map(|s| serde_json::from_str(s).unwrap())
            .collect()
    }

    pub fn closes(&self) -> Vec<u16> {
        self.wire.lock().closes.clone()
    }
}

impl Connector for FakeConnector {
    fn open(
        &self,
        url: &str,
        generation: u64,
        events: EventSender,
    ) -> Result<Box<dyn Transport>, TransportError> {
        self.wire.lock().urls.push(url.to_string());
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(TransportError::InvalidUrl(url.to_string()));
        }
        Ok(Box::new(FakeTransport {
            wire: self.wire.clone(),
            generation,
            events,
        }))
    }
}

struct FakeTransport {
    wire: Arc<Mutex<Wire>>,
    generation: u64,
    events: EventSender,
}

impl Transport for FakeTransport {
    fn send(&self, text: String) -> Result<(), TransportError> {
        self.wire.lock().sent.push(text);
        Ok(())
    }

    fn close(&self, code: u16, reason: &str) {
        self.wire.lock().closes.push(code);
        let _ = self.events.send(TransportFrame {
            generation: self.generation,
            event: TransportEvent::Closed {
                code,
                reason: reason.to_string(),
            },
        });
    }
}

/// Verifier whose answers are set per target id. Unknown targets never hold.
#[derive(Default)]
pub struct ScriptedVerifier {
    holding: Mutex<HashSet<String>>,
    failing: Mutex<HashSet<String>>,
    corrections: Mutex<HashMap<String, usize>>,
}

impl ScriptedVerifier {
    pub fn holds(&self, id: &str) {
        self.holding.lock().insert(id.to_string());
    }

    pub fn fails(&self, id: &str) {
        self.failing.lock().insert(id.to_string());
    }

    pub fn corrections(&self, id: &str) -> usize {
        self.corrections.lock().get(id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Verifier for ScriptedVerifier {
    async fn check(&self, task: &RetryTask) -> Result<bool, RestError> {
        let id = task.target_id.as_str();
        if self.failing.lock().contains(id) {
            return Err(RestError::NotFound(format!("message {id}")));
        }
        Ok(self.holding.lock().contains(id))
    }

    async fn correct(&self, task: &RetryTask) -> Result<(), RestError> {
        *self
            .corrections
            .lock()
            .entry(task.target_id.to_string())
            .or_default() += 1;
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingHandler {
    messages: Mutex<Vec<String>>,
    interactions: Mutex<Vec<String>>,
}

impl RecordingHandler {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }

    pub fn interactions(&self) -> Vec<String> {
        self.interactions.lock().clone()
    }
}

#[async_trait]
impl MessageHandler for RecordingHandler {
    async fn on_message(&self, _ctx: DispatchContext, message: Message) -> Result<(), HandlerError> {
        self.messages.lock().push(message.id.to_string());
        Ok(())
    }
}

#[async_trait]
impl InteractionHandler for RecordingHandler {
    async fn on_interaction(
        &self,
        _ctx: DispatchContext,
        interaction: Interaction,
    ) -> Result<(), HandlerError> {
        self.interactions.lock().push(interaction.id.to_string());
        Ok(())
    }
}

pub struct FailingHandler;

#[async_trait]
impl MessageHandler for FailingHandler {
    async fn on_message(&self, _ctx: DispatchContext, _message: Message) -> Result<(), HandlerError> {
        Err(HandlerError::Invalid("always fails".into()))
    }
}

pub fn test_config() -> GatewayConfig {
    GatewayConfig::new(SecretString::from("test-token"))
        .with_gateway_url("wss://gateway.test/?v=10&encoding=json")
}

/// A session wired to fakes, with helpers to feed it transport events.
pub struct Harness {
    pub db: Database,
    pub session: Session,
    pub events: mpsc::UnboundedReceiver<TransportFrame>,
    pub connector: Arc<FakeConnector>,
    pub clock: Arc<ManualClock>,
    pub verifier: Arc<ScriptedVerifier>,
    pub tracker: TaskTracker,
    pub gateway: GatewayHandle,
    handler: Option<Arc<RecordingHandler>>,
}

impl Harness {
    pub fn new(now_ms: u64) -> Self {
        Self::build(Database::in_memory().unwrap(), now_ms, None)
    }

    pub fn with_handler(now_ms: u64, handler: Arc<RecordingHandler>) -> Self {
        Self::build(Database::in_memory().unwrap(), now_ms, Some(handler))
    }

    /// A fresh session over the same database, as after a process restart.
    pub fn reload(self) -> Self {
        let now = self.clock.now_ms();
        Self::build(self.db, now, self.handler)
    }

    fn build(db: Database, now_ms: u64, handler: Option<Arc<RecordingHandler>>) -> Self {
        let connector = Arc::new(FakeConnector::default());
        let clock = Arc::new(ManualClock::new(now_ms));
        let verifier = Arc::new(ScriptedVerifier::default());
        let tracker = TaskTracker::new();
        let (gateway, _commands) = actor::channel();

        let router = DispatchRouter::new(
            DispatchContext {
                gateway: gateway.clone(),
            },
            tracker.clone(),
            handler.clone().map(|h| h as Arc<dyn MessageHandler>),
            handler.clone().map(|h| h as Arc<dyn InteractionHandler>),
        );
        let (session, events) = Session::new(
            Arc::new(test_config()),
            db.clone(),
            connector.clone(),
            clock.clone(),
            verifier.clone(),
            router,
        )
        .unwrap();

        Self {
            db,
            session,
            events,
            connector,
            clock,
            verifier,
            tracker,
            gateway,
            handler,
        }
    }

    pub fn state_repo(&self) -> GatewayStateRepo {
        GatewayStateRepo::new(self.db.clone(), "main")
    }

    fn inject(&mut self, event: TransportEvent) {
        let generation = self.session.generation();
        self.session
            .handle_transport(TransportFrame { generation, event });
    }

    pub fn opened(&mut self) {
        self.inject(TransportEvent::Opened);
    }

    pub fn text(&mut self, text: &str) {
        self.inject(TransportEvent::Message(text.to_string()));
    }

    pub fn remote_close(&mut self, code: u16) {
        self.inject(TransportEvent::Closed {
            code,
            reason: "remote".into(),
        });
    }

    /// Deliver every event the fake transports queued.
    pub fn pump(&mut self) {
        while let Ok(frame) = self.events.try_recv() {
            self.session.handle_transport(frame);
        }
    }
}
