//! The gateway session state machine.
//!
//! Everything here runs on the actor task, one input at a time. Each mutation
//! of [`SessionState`] is persisted before the side effect it enables.

use std::sync::Arc;

use rand::thread_rng;
use secrecy::ExposeSecret;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use embebot_core::ids::{ChannelId, MessageId};
use embebot_core::protocol::{
    self, close_code, GatewayEvent, Identify, InboundFrame, OutboundFrame, Resume,
};
use embebot_core::SessionState;
use embebot_store::{Database, GatewayStateRepo, RetryTaskRepo, StoreError, WakePurpose, WakeRepo};

use crate::clock::Clock;
use crate::config::GatewayConfig;
use crate::heartbeat::{self, Beat};
use crate::policy::{self, CloseAction};
use crate::retry::{DrainReport, RetryQueue, Verifier};
use crate::router::{DispatchRouter, Routed};
use crate::transport::{Connector, Transport, TransportEvent, TransportFrame, ABNORMAL_CLOSE};
use crate::wake::WakeQueue;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Connecting,
    AwaitingHello,
    AwaitingReady,
    Steady,
    Closing,
}

impl Phase {
    /// A transport is open and not being torn down.
    pub fn is_open(self) -> bool {
        matches!(self, Self::AwaitingHello | Self::AwaitingReady | Self::Steady)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub connected: bool,
    pub phase: Phase,
    pub session_id: Option<String>,
    pub sequence: Option<i64>,
}

pub struct Session {
    config: Arc<GatewayConfig>,
    state: SessionState,
    state_repo: GatewayStateRepo,
    wakes: WakeQueue,
    retry: RetryQueue,
    router: DispatchRouter,
    connector: Arc<dyn Connector>,
    clock: Arc<dyn Clock>,
    events: mpsc::UnboundedSender<TransportFrame>,
    transport: Option<Box<dyn Transport>>,
    generation: u64,
    phase: Phase,
    /// Code of a close this side initiated and is waiting on.
    local_close: Option<u16>,
}

impl Session {
    /// Load persisted state for `config.instance` and build an idle session.
    pub fn new(
        config: Arc<GatewayConfig>,
        db: Database,
        connector: Arc<dyn Connector>,
        clock: Arc<dyn Clock>,
        verifier: Arc<dyn Verifier>,
        router: DispatchRouter,
    ) -> Result<(Self, mpsc::UnboundedReceiver<TransportFrame>), StoreError> {
        let state_repo = GatewayStateRepo::new(db.clone(), config.instance.clone());
        let mut state = state_repo.load()?;
        let mut wakes = WakeQueue::load(WakeRepo::new(db.clone(), config.instance.clone()))?;
        let retry = RetryQueue::new(
            RetryTaskRepo::new(db, config.instance.clone()),
            verifier,
            config.max_verify_attempts,
        );

        // Nothing is connected at startup, whatever the last process left behind.
        if state.heartbeat_interval_ms.is_some() {
            state.end_heartbeat();
            state_repo.save(&state)?;
        }
        wakes.clear(WakePurpose::Heartbeat);

        info!(
            instance = %config.instance,
            resumable = state.is_resumable(),
            "gateway session loaded"
        );

        let (events, events_rx) = mpsc::unbounded_channel();
        let session = Self {
            config,
            state,
            state_repo,
            wakes,
            retry,
            router,
            connector,
            clock,
            events,
            transport: None,
            generation: 0,
            phase: Phase::Idle,
            local_close: None,
        };
        Ok((session, events_rx))
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            connected: self.phase.is_open(),
            phase: self.phase,
            session_id: self.state.session_id.clone(),
            sequence: self.state.sequence,
        }
    }

    /// Soonest pending wake deadline.
    pub fn next_wake(&self) -> Option<u64> {
        self.wakes.next_due()
    }

    pub fn wake_due_at(&self, purpose: WakePurpose) -> Option<u64> {
        self.wakes.due_at(purpose)
    }

    fn persist(&self) {
        if let Err(e) = self.state_repo.save(&self.state) {
            error!(error = %e, "failed to persist session state");
        }
    }

    fn now(&self) -> u64 {
        self.clock.now_ms()
    }

    fn delay_ms(d: std::time::Duration) -> u64 {
        u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
    }

    pub fn connect(&mut self) {
        if self.phase != Phase::Idle {
            debug!(phase = ?self.phase, "connect ignored");
            return;
        }
        self.wakes.clear(WakePurpose::Reconnect);

        let url = match &self.state.resume_url {
            Some(resume) => protocol::with_gateway_query(resume),
            None => self.config.gateway_url.clone(),
        };
        self.generation += 1;
        self.phase = Phase::Connecting;
        info!(generation = self.generation, %url, "connecting");

        match self.connector.open(&url, self.generation, self.events.clone()) {
            Ok(transport) => self.transport = Some(transport),
            Err(e) => {
                warn!(error = %e, "failed to open transport");
                self.phase = Phase::Idle;
                self.schedule_reconnect();
            }
        }
    }

    /// Close deliberately. The session is not resumed afterwards.
    pub fn disconnect(&mut self) {
        self.wakes.clear(WakePurpose::Reconnect);
        if self.transport.is_some() {
            self.close_local(close_code::NORMAL, "manual disconnect");
        }
    }

    /// Close for process shutdown, leaving the session resumable.
    pub fn shutdown(&mut self) {
        if self.transport.is_some() {
            self.close_local(close_code::RESUMABLE, "shutting down");
        }
        self.persist();
    }

    pub fn enqueue_verification(
        &mut self,
        target_id: MessageId,
        channel_id: ChannelId,
    ) -> Result<bool, StoreError> {
        let added = self.retry.enqueue(target_id, channel_id)?;
        let due = self.now() + Self::delay_ms(self.config.retry_delay);
        self.wakes.arm_if_absent(WakePurpose::RetryDrain, due);
        Ok(added)
    }

    fn schedule_reconnect(&mut self) {
        let due = self.now() + Self::delay_ms(self.config.reconnect_delay);
        if self.wakes.arm_if_absent(WakePurpose::Reconnect, due) {
            info!(due_at_ms = due, "reconnect scheduled");
        }
    }

    fn close_local(&mut self, code: u16, reason: &str) {
        let Some(transport) = &self.transport else {
            return;
        };
        info!(code, reason, "closing transport");
        self.local_close = Some(code);
        self.phase = Phase::Closing;
        transport.close(code, reason);
    }

    fn send(&self, frame: OutboundFrame) {
        let Some(transport) = &self.transport else {
            debug!(op = frame.opcode(), "no transport, frame dropped");
            return;
        };
        let text = match frame.encode() {
            Ok(text) => text,
            Err(e) => {
                error!(op = frame.opcode(), error = %e, "failed to encode frame");
                return;
            }
        };
        if let Err(e) = transport.send(text) {
            warn!(op = frame.opcode(), error = %e, "send failed");
        }
    }

    /// Timer entry point: drain verifications, then run whatever came due.
    pub async fn on_wake(&mut self) -> Option<DrainReport> {
        let now = self.now();
        let due = self.wakes.take_due(now);
        debug!(?due, "wake");

        let report = match self.retry.drain().await {
            Ok(report) => Some(report),
            Err(e) => {
                error!(error = %e, "retry drain failed");
                None
            }
        };
        // A failed drain leaves its tasks queued, so it gets another pass too.
        if report.map_or(true, |r| r.remaining > 0) {
            let next = self.now() + Self::delay_ms(self.config.retry_delay);
            self.wakes.arm_if_absent(WakePurpose::RetryDrain, next);
        }

        if due.contains(&WakePurpose::Heartbeat) {
            self.heartbeat_tick();
        }
        if due.contains(&WakePurpose::Reconnect) {
            self.connect();
        }
        report
    }

    fn heartbeat_tick(&mut self) {
        if !self.phase.is_open() {
            return;
        }
        match heartbeat::tick(&self.state) {
            Beat::Idle => {}
            Beat::TimedOut => {
                warn!("heartbeat not acknowledged");
                self.close_local(close_code::RESUMABLE, "heartbeat timeout");
            }
            Beat::Send {
                sequence,
                next_in_ms,
            } => {
                self.state.last_heartbeat_acked = false;
                self.persist();
                self.send(OutboundFrame::Heartbeat { sequence });
                let next = self.now() + next_in_ms;
                self.wakes.arm(WakePurpose::Heartbeat, next);
            }
        }
    }

    pub fn handle_transport(&mut self, frame: TransportFrame) {
        if frame.generation != self.generation {
            debug!(
                generation = frame.generation,
                current = self.generation,
                "stale transport event"
            );
            return;
        }
        match frame.event {
            TransportEvent::Opened => {
                if self.phase == Phase::Connecting {
                    self.phase = Phase::AwaitingHello;
                    debug!("transport open, awaiting hello");
                }
            }
            TransportEvent::Message(text) => self.on_text(&text),
            TransportEvent::Closed { code, reason } => self.on_close(code, &reason),
            TransportEvent::Error(e) => {
                warn!(error = %e, "transport error");
                self.on_close(ABNORMAL_CLOSE, &e);
            }
        }
    }

    fn on_text(&mut self, text: &str) {
        let frame = match InboundFrame::decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "dropping undecodable frame");
                return;
            }
        };
        if let Some(seq) = frame.sequence {
            if self.state.observe_sequence(seq) {
                self.persist();
            }
        }

        match frame.event {
            GatewayEvent::Hello {
                heartbeat_interval_ms,
            } => self.on_hello(heartbeat_interval_ms),
            GatewayEvent::HeartbeatAck => {
                self.state.last_heartbeat_acked = true;
                self.persist();
            }
            GatewayEvent::HeartbeatRequest => {
                self.send(OutboundFrame::Heartbeat {
                    sequence: self.state.sequence,
                });
            }
            GatewayEvent::Reconnect => {
                info!("remote requested reconnect");
                self.close_local(close_code::RESUMABLE, "reconnect requested");
            }
            GatewayEvent::InvalidSession { resumable } => {
                warn!(resumable, "invalid session");
                if !resumable {
                    self.state.clear_session();
                    self.persist();
                }
                self.schedule_reconnect();
                self.close_local(close_code::RESUMABLE, "invalid session");
            }
            GatewayEvent::Dispatch { name, data } => self.on_dispatch(&name, data),
            GatewayEvent::Unknown { op } => debug!(op, "ignoring unknown opcode"),
        }
    }

    fn on_hello(&mut self, interval_ms: u64) {
        if self.phase != Phase::AwaitingHello {
            debug!(phase = ?self.phase, "ignoring hello");
            return;
        }
        self.state.begin_heartbeat(interval_ms);
        self.persist();

        let first = self.now() + heartbeat::initial_delay_ms(interval_ms, &mut thread_rng());
        self.wakes.arm(WakePurpose::Heartbeat, first);

        let token = self.config.token.expose_secret().to_string();
        let frame = match self.state.resume_point() {
            Some((session_id, seq)) => {
                info!(session_id, seq, "resuming");
                OutboundFrame::Resume(Resume {
                    token,
                    session_id: session_id.to_string(),
                    seq,
                })
            }
            None => {
                info!("identifying");
                OutboundFrame::Identify(Identify {
                    token,
                    intents: self.config.intents,
                    properties: self.config.properties.clone(),
                    presence: self.config.presence.clone(),
                })
            }
        };
        self.send(frame);
        self.phase = Phase::AwaitingReady;
    }

    fn on_dispatch(&mut self, name: &str, data: serde_json::Value) {
        match self.router.route(name, data) {
            Routed::Ready(ready) => {
                info!(
                    session_id = %ready.session_id,
                    user = %ready.user.username,
                    "ready"
                );
                self.state.session_id = Some(ready.session_id);
                self.state.resume_url = ready.resume_gateway_url;
                self.persist();
                self.phase = Phase::Steady;
            }
            Routed::Resumed => {
                info!("resumed");
                self.phase = Phase::Steady;
            }
            Routed::Spawned | Routed::Ignored => {}
        }
    }

    fn on_close(&mut self, code: u16, reason: &str) {
        if self.transport.take().is_none() {
            return;
        }
        let local = self.local_close.take();
        let code = local.unwrap_or(code);
        let action = policy::classify(code, local.is_some());

        self.phase = Phase::Idle;
        self.state.end_heartbeat();
        self.wakes.clear(WakePurpose::Heartbeat);

        if action.clears_identity() {
            self.state.clear_identity();
        }
        self.persist();

        match action {
            CloseAction::Stop => info!(code, reason, "disconnected"),
            CloseAction::Terminal => error!(code, reason, "session terminated by remote"),
            CloseAction::Resume => {
                warn!(code, reason, "connection closed");
                self.schedule_reconnect();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Harness, RecordingHandler};
    use serde_json::json;

    const T0: u64 = 1_700_000_000_000;

    fn hello(interval: u64) -> String {
        json!({"op": 10, "d": {"heartbeat_interval": interval}}).to_string()
    }

    fn ready(session: &str, seq: i64) -> String {
        json!({
            "op": 0, "t": "READY", "s": seq,
            "d": {
                "session_id": session,
                "resume_gateway_url": "wss://resume.example",
                "user": {"id": "1", "username": "embebot", "bot": true}
            }
        })
        .to_string()
    }

    fn ack() -> String {
        json!({"op": 11}).to_string()
    }

    /// Open, hello, ready.
    fn establish(h: &mut Harness, interval: u64) {
        h.session.connect();
        h.opened();
        h.text(&hello(interval));
        h.text(&ready("sess-1", 1));
    }

    #[tokio::test]
    async fn double_connect_opens_one_transport() {
        let mut h = Harness::new(T0);
        h.session.connect();
        h.session.connect();
        assert_eq!(h.connector.opened_urls().len(), 1);
        assert_eq!(h.session.phase(), Phase::Connecting);

        h.opened();
        h.session.connect();
        assert_eq!(h.connector.opened_urls().len(), 1);
    }

    #[tokio::test]
    async fn sync_open_failure_schedules_reconnect() {
        let mut h = Harness::new(T0);
        h.connector.fail_next_open();
        h.session.connect();
        assert_eq!(h.session.phase(), Phase::Idle);
        assert_eq!(
            h.session.wake_due_at(WakePurpose::Reconnect),
            Some(T0 + 5_000)
        );
    }

    #[tokio::test]
    async fn empty_state_identifies() {
        let mut h = Harness::new(T0);
        h.session.connect();
        h.opened();
        h.text(&hello(41_250));

        let sent = h.connector.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["op"], 2);
        assert_eq!(sent[0]["d"]["intents"], 33280);
        assert_eq!(sent[0]["d"]["token"], "test-token");
        assert_eq!(h.session.phase(), Phase::AwaitingReady);
    }

    #[tokio::test]
    async fn persisted_session_resumes() {
        let mut h = Harness::new(T0);
        h.state_repo()
            .save(&SessionState {
                session_id: Some("old".into()),
                sequence: Some(77),
                resume_url: Some("wss://resume.example".into()),
                ..Default::default()
            })
            .unwrap();
        let mut h = h.reload();

        h.session.connect();
        assert_eq!(
            h.connector.opened_urls(),
            vec!["wss://resume.example/?v=10&encoding=json".to_string()]
        );
        h.opened();
        h.text(&hello(41_250));

        let sent = h.connector.sent();
        assert_eq!(sent[0]["op"], 6);
        assert_eq!(sent[0]["d"]["session_id"], "old");
        assert_eq!(sent[0]["d"]["seq"], 77);
    }

    #[tokio::test]
    async fn ready_stores_identity_and_goes_steady() {
        let mut h = Harness::new(T0);
        establish(&mut h, 41_250);
        assert_eq!(h.session.phase(), Phase::Steady);

        let stored = h.state_repo().load().unwrap();
        assert_eq!(stored.session_id.as_deref(), Some("sess-1"));
        assert_eq!(stored.resume_url.as_deref(), Some("wss://resume.example"));
        assert_eq!(stored.sequence, Some(1));
        assert!(h.session.status().connected);
    }

    #[tokio::test]
    async fn sequence_never_moves_backward() {
        let mut h = Harness::new(T0);
        establish(&mut h, 41_250);
        for s in [5, 3, 9, 2] {
            h.text(&json!({"op": 0, "t": "TYPING_START", "s": s, "d": {}}).to_string());
        }
        assert_eq!(h.session.state().sequence, Some(9));
        assert_eq!(h.state_repo().load().unwrap().sequence, Some(9));
    }

    #[tokio::test]
    async fn first_heartbeat_is_jittered_then_periodic() {
        let mut h = Harness::new(T0);
        h.session.connect();
        h.opened();
        h.text(&hello(1_000));

        let first = h.session.wake_due_at(WakePurpose::Heartbeat).unwrap();
        assert!((T0..T0 + 1_000).contains(&first), "first beat at {first}");

        h.clock.set(first);
        h.session.on_wake().await;
        let beats: Vec<_> = h.connector.sent().into_iter().filter(|f| f["op"] == 1).collect();
        assert_eq!(beats.len(), 1);
        assert!(!h.session.state().last_heartbeat_acked);
        assert_eq!(
            h.session.wake_due_at(WakePurpose::Heartbeat),
            Some(first + 1_000)
        );
    }

    #[tokio::test]
    async fn missed_ack_closes_with_4000_and_reconnects() {
        let mut h = Harness::new(T0);
        establish(&mut h, 1_000);

        let first = h.session.wake_due_at(WakePurpose::Heartbeat).unwrap();
        h.clock.set(first);
        h.session.on_wake().await;

        h.clock.set(first + 1_000);
        h.session.on_wake().await;
        assert_eq!(h.connector.closes(), vec![4000]);
        assert_eq!(h.session.phase(), Phase::Closing);

        h.pump();
        assert_eq!(h.session.phase(), Phase::Idle);
        let reconnect = h.session.wake_due_at(WakePurpose::Reconnect).unwrap();
        assert!(reconnect <= first + 1_000 + 5_000);
        assert!(h.session.wake_due_at(WakePurpose::Heartbeat).is_none());
        assert!(h.session.state().heartbeat_interval_ms.is_none());
        assert_eq!(h.session.state().session_id.as_deref(), Some("sess-1"));

        h.clock.set(reconnect);
        h.session.on_wake().await;
        assert_eq!(h.connector.opened_urls().len(), 2);
    }

    #[tokio::test]
    async fn acked_heartbeat_keeps_beating() {
        let mut h = Harness::new(T0);
        establish(&mut h, 1_000);
        let first = h.session.wake_due_at(WakePurpose::Heartbeat).unwrap();
        h.clock.set(first);
        h.session.on_wake().await;
        h.text(&ack());
        h.clock.set(first + 1_000);
        h.session.on_wake().await;
        assert!(h.connector.closes().is_empty());
        assert_eq!(
            h.connector.sent().iter().filter(|f| f["op"] == 1).count(),
            2
        );
    }

    #[tokio::test]
    async fn heartbeat_request_answers_out_of_band() {
        let mut h = Harness::new(T0);
        establish(&mut h, 41_250);
        let due = h.session.wake_due_at(WakePurpose::Heartbeat);
        h.text(&json!({"op": 1}).to_string());
        let last = h.connector.sent().pop().unwrap();
        assert_eq!(last, json!({"op": 1, "d": 1}));
        assert!(h.session.state().last_heartbeat_acked);
        assert_eq!(h.session.wake_due_at(WakePurpose::Heartbeat), due);
    }

    #[tokio::test]
    async fn terminal_close_clears_identity() {
        let mut h = Harness::new(T0);
        establish(&mut h, 41_250);
        h.remote_close(4004);

        let state = h.state_repo().load().unwrap();
        assert!(state.session_id.is_none());
        assert!(state.sequence.is_none());
        assert!(state.resume_url.is_none());
        assert!(h.session.wake_due_at(WakePurpose::Reconnect).is_none());
    }

    #[tokio::test]
    async fn abnormal_close_keeps_identity() {
        let mut h = Harness::new(T0);
        establish(&mut h, 41_250);
        h.remote_close(1006);

        let state = h.state_repo().load().unwrap();
        assert_eq!(state.session_id.as_deref(), Some("sess-1"));
        assert_eq!(state.sequence, Some(1));
        assert_eq!(
            h.session.wake_due_at(WakePurpose::Reconnect),
            Some(T0 + 5_000)
        );
    }

    #[tokio::test]
    async fn reconnect_request_closes_resumably() {
        let mut h = Harness::new(T0);
        establish(&mut h, 41_250);
        h.text(&json!({"op": 7}).to_string());
        assert_eq!(h.connector.closes(), vec![4000]);
        h.pump();
        assert!(h.session.state().is_resumable());
        assert!(h.session.wake_due_at(WakePurpose::Reconnect).is_some());
    }

    #[tokio::test]
    async fn non_resumable_invalid_session_identifies_next_time() {
        let mut h = Harness::new(T0);
        establish(&mut h, 41_250);
        h.text(&json!({"op": 9, "d": false}).to_string());
        assert!(!h.session.state().is_resumable());
        assert_eq!(h.connector.closes(), vec![4000]);
        h.pump();

        h.clock.set(T0 + 5_000);
        h.session.on_wake().await;
        h.opened();
        h.text(&hello(41_250));
        assert_eq!(h.connector.sent().pop().unwrap()["op"], 2);
    }

    #[tokio::test]
    async fn resumable_invalid_session_keeps_resume_point() {
        let mut h = Harness::new(T0);
        establish(&mut h, 41_250);
        h.text(&json!({"op": 9, "d": true}).to_string());
        assert!(h.session.state().is_resumable());
        assert!(h.session.wake_due_at(WakePurpose::Reconnect).is_some());
    }

    #[tokio::test]
    async fn manual_disconnect_stops_without_reconnect() {
        let mut h = Harness::new(T0);
        establish(&mut h, 41_250);
        h.session.disconnect();
        assert_eq!(h.connector.closes(), vec![1000]);

        // While closing, connect is a no-op.
        h.session.connect();
        assert_eq!(h.connector.opened_urls().len(), 1);

        h.pump();
        assert_eq!(h.session.phase(), Phase::Idle);
        assert!(h.session.next_wake().is_none());
        assert!(!h.session.state().is_resumable());
    }

    #[tokio::test]
    async fn stale_generation_is_ignored() {
        let mut h = Harness::new(T0);
        establish(&mut h, 41_250);
        let old = h.session.generation();
        h.remote_close(1006);
        h.session.connect();
        assert_ne!(h.session.generation(), old);

        h.session.handle_transport(TransportFrame {
            generation: old,
            event: TransportEvent::Message(hello(1_000)),
        });
        assert_eq!(h.session.phase(), Phase::Connecting);
        let handshakes = h
            .connector
            .sent()
            .into_iter()
            .filter(|f| f["op"] == 2 || f["op"] == 6)
            .count();
        assert_eq!(handshakes, 1);
    }

    #[tokio::test]
    async fn transport_error_is_treated_as_close() {
        let mut h = Harness::new(T0);
        establish(&mut h, 41_250);
        let generation = h.session.generation();
        h.session.handle_transport(TransportFrame {
            generation,
            event: TransportEvent::Error("connection reset".into()),
        });
        assert_eq!(h.session.phase(), Phase::Idle);
        assert!(h.session.state().is_resumable());
        assert!(h.session.wake_due_at(WakePurpose::Reconnect).is_some());
    }

    #[tokio::test]
    async fn malformed_frame_is_dropped() {
        let mut h = Harness::new(T0);
        establish(&mut h, 41_250);
        h.text("{not json");
        h.text(&json!({"op": 0, "d": {}}).to_string());
        assert_eq!(h.session.phase(), Phase::Steady);
    }

    #[tokio::test]
    async fn verification_drains_on_any_wake() {
        let mut h = Harness::new(T0);
        h.connector.fail_next_open();
        h.session.connect();
        assert_eq!(
            h.session.wake_due_at(WakePurpose::Reconnect),
            Some(T0 + 5_000)
        );

        h.clock.set(T0 + 2_000);
        h.session
            .enqueue_verification(MessageId::from_raw("m"), ChannelId::from_raw("c"))
            .unwrap();
        assert_eq!(
            h.session.wake_due_at(WakePurpose::RetryDrain),
            Some(T0 + 7_000)
        );

        // The reconnect wake fires first and still drains the queue.
        h.clock.set(T0 + 5_000);
        let report = h.session.on_wake().await.unwrap();
        assert_eq!(report.retried, 1);
        assert_eq!(h.verifier.corrections("m"), 1);
        assert_eq!(h.connector.opened_urls().len(), 2);
        assert_eq!(
            h.session.wake_due_at(WakePurpose::RetryDrain),
            Some(T0 + 7_000)
        );
    }

    #[tokio::test]
    async fn drain_rearms_while_tasks_remain() {
        let mut h = Harness::new(T0);
        h.session
            .enqueue_verification(MessageId::from_raw("m"), ChannelId::from_raw("c"))
            .unwrap();
        h.session
            .enqueue_verification(MessageId::from_raw("m"), ChannelId::from_raw("c"))
            .unwrap();

        for (i, at) in [5_000, 10_000, 15_000].into_iter().enumerate() {
            assert_eq!(h.session.wake_due_at(WakePurpose::RetryDrain), Some(T0 + at));
            h.clock.set(T0 + at);
            h.session.on_wake().await;
            assert_eq!(h.verifier.corrections("m"), i + 1);
        }
        assert!(h.session.next_wake().is_none());
    }

    #[tokio::test]
    async fn dispatch_reaches_handler() {
        let handler = Arc::new(RecordingHandler::default());
        let mut h = Harness::with_handler(T0, handler.clone());
        establish(&mut h, 41_250);
        h.text(
            &json!({
                "op": 0, "t": "MESSAGE_CREATE", "s": 2,
                "d": {
                    "id": "m1", "channel_id": "c1", "guild_id": "g1",
                    "content": "hi", "author": {"id": "u", "username": "u"}
                }
            })
            .to_string(),
        );
        h.tracker.close();
        h.tracker.wait().await;
        assert_eq!(handler.messages(), vec!["m1".to_string()]);
    }

    #[tokio::test]
    async fn stale_heartbeat_fields_are_reset_on_load() {
        let h = Harness::new(T0);
        h.state_repo()
            .save(&SessionState {
                session_id: Some("s".into()),
                sequence: Some(3),
                heartbeat_interval_ms: Some(41_250),
                last_heartbeat_acked: false,
                ..Default::default()
            })
            .unwrap();
        let h = h.reload();
        assert!(h.session.state().heartbeat_interval_ms.is_none());
        assert!(h.session.state().last_heartbeat_acked);
        assert!(h.session.state().is_resumable());
    }

    #[tokio::test]
    async fn hello_outside_handshake_is_ignored() {
        let mut h = Harness::new(T0);
        establish(&mut h, 41_250);
        let handshakes = |h: &Harness| {
            h.connector
                .sent()
                .iter()
                .filter(|f| f["op"] == 2 || f["op"] == 6)
                .count()
        };
        assert_eq!(handshakes(&h), 1);

        // A second hello on a steady session.
        h.text(&hello(41_250));
        assert_eq!(handshakes(&h), 1);
        assert_eq!(h.session.phase(), Phase::Steady);

        // A hello arriving while our close is in flight.
        h.text(&json!({"op": 7}).to_string());
        assert_eq!(h.session.phase(), Phase::Closing);
        h.text(&hello(41_250));
        assert_eq!(handshakes(&h), 1);
        assert_eq!(h.session.phase(), Phase::Closing);
    }

    #[tokio::test]
    async fn failed_drain_is_rescheduled() {
        let mut h = Harness::new(T0);
        h.session
            .enqueue_verification(MessageId::from_raw("m"), ChannelId::from_raw("c"))
            .unwrap();
        let due = h.session.wake_due_at(WakePurpose::RetryDrain).unwrap();
        h.db.with_conn(|conn| {
            conn.execute_batch("DROP TABLE retry_tasks")?;
            Ok(())
        })
        .unwrap();

        h.clock.set(due);
        assert!(h.session.on_wake().await.is_none());
        assert_eq!(
            h.session.wake_due_at(WakePurpose::RetryDrain),
            Some(due + 5_000)
        );
    }
}
