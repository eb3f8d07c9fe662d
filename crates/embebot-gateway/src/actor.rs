//! The task that owns a [`Session`] and serializes every input to it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use embebot_core::ids::{ChannelId, MessageId};
use embebot_store::{Database, StoreError};

use crate::clock::{Clock, SystemClock};
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::retry::Verifier;
use crate::router::{DispatchContext, DispatchRouter, InteractionHandler, MessageHandler};
use crate::session::{Session, StatusSnapshot};
use crate::transport::{Connector, TungsteniteConnector};

const CHANNEL_CAPACITY: usize = 64;

/// Upper bound on a single idle sleep when no wake is pending.
const IDLE_SLEEP: Duration = Duration::from_secs(3600);

pub enum GatewayCommand {
    Connect {
        reply: oneshot::Sender<()>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    Status {
        reply: oneshot::Sender<StatusSnapshot>,
    },
    EnqueueVerification {
        target_id: MessageId,
        channel_id: ChannelId,
        reply: oneshot::Sender<Result<bool, StoreError>>,
    },
}

/// Cloneable address of the gateway actor.
#[derive(Clone, Debug)]
pub struct GatewayHandle {
    tx: mpsc::Sender<GatewayCommand>,
}

/// A handle and the receiving end it talks to.
pub fn channel() -> (GatewayHandle, mpsc::Receiver<GatewayCommand>) {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    (GatewayHandle { tx }, rx)
}

impl GatewayHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> GatewayCommand,
    ) -> Result<T, GatewayError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| GatewayError::ActorGone)?;
        rx.await.map_err(|_| GatewayError::ActorGone)
    }

    pub async fn connect(&self) -> Result<(), GatewayError> {
        self.request(|reply| GatewayCommand::Connect { reply }).await
    }

    pub async fn disconnect(&self) -> Result<(), GatewayError> {
        self.request(|reply| GatewayCommand::Disconnect { reply })
            .await
    }

    pub async fn status(&self) -> Result<StatusSnapshot, GatewayError> {
        self.request(|reply| GatewayCommand::Status { reply }).await
    }

    /// Queue a recheck of `target_id`. Returns false if one is already queued.
    pub async fn enqueue_verification(
        &self,
        target_id: MessageId,
        channel_id: ChannelId,
    ) -> Result<bool, GatewayError> {
        let added = self
            .request(|reply| GatewayCommand::EnqueueVerification {
                target_id,
                channel_id,
                reply,
            })
            .await??;
        Ok(added)
    }
}

/// Assembles and spawns the gateway actor.
pub struct GatewayBuilder {
    config: GatewayConfig,
    db: Database,
    verifier: Arc<dyn Verifier>,
    connector: Arc<dyn Connector>,
    clock: Arc<dyn Clock>,
    tracker: TaskTracker,
    messages: Option<Arc<dyn MessageHandler>>,
    interactions: Option<Arc<dyn InteractionHandler>>,
}

impl GatewayBuilder {
    pub fn new(config: GatewayConfig, db: Database, verifier: Arc<dyn Verifier>) -> Self {
        let connector = Arc::new(TungsteniteConnector::new(
            config.connect_timeout,
            config.close_timeout,
        ));
        Self {
            config,
            db,
            verifier,
            connector,
            clock: Arc::new(SystemClock),
            tracker: TaskTracker::new(),
            messages: None,
            interactions: None,
        }
    }

    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Tracker that background handler tasks are spawned on.
    pub fn tracker(mut self, tracker: TaskTracker) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn on_message(mut self, handler: Arc<dyn MessageHandler>) -> Self {
        self.messages = Some(handler);
        self
    }

    pub fn on_interaction(mut self, handler: Arc<dyn InteractionHandler>) -> Self {
        self.interactions = Some(handler);
        self
    }

    /// Load state and start the actor. It runs until `shutdown` is cancelled.
    pub fn spawn(
        self,
        shutdown: CancellationToken,
    ) -> Result<(GatewayHandle, JoinHandle<()>), StoreError> {
        let (handle, commands) = channel();
        let router = DispatchRouter::new(
            DispatchContext {
                gateway: handle.clone(),
            },
            self.tracker,
            self.messages,
            self.interactions,
        );
        let (session, events) = Session::new(
            Arc::new(self.config),
            self.db,
            self.connector,
            self.clock.clone(),
            self.verifier,
            router,
        )?;

        let actor = GatewayActor {
            session,
            commands,
            events,
            clock: self.clock,
            shutdown,
        };
        let join = tokio::spawn(actor.run());
        Ok((handle, join))
    }
}

struct GatewayActor {
    session: Session,
    commands: mpsc::Receiver<GatewayCommand>,
    events: mpsc::UnboundedReceiver<crate::transport::TransportFrame>,
    clock: Arc<dyn Clock>,
    shutdown: CancellationToken,
}

impl GatewayActor {
    async fn run(mut self) {
        info!("gateway actor started");
        loop {
            let next_wake = self.session.next_wake();
            let sleep_for = next_wake
                .map(|due| Duration::from_millis(due.saturating_sub(self.clock.now_ms())))
                .unwrap_or(IDLE_SLEEP);

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => self.handle(cmd),
                    None => break,
                },
                Some(frame) = self.events.recv() => self.session.handle_transport(frame),
                _ = tokio::time::sleep(sleep_for), if next_wake.is_some() => {
                    self.session.on_wake().await;
                }
            }
        }
        self.session.shutdown();
        info!("gateway actor stopped");
    }

    fn handle(&mut self, cmd: GatewayCommand) {
        match cmd {
            GatewayCommand::Connect { reply } => {
                self.session.connect();
                let _ = reply.send(());
            }
            GatewayCommand::Disconnect { reply } => {
                self.session.disconnect();
                let _ = reply.send(());
            }
            GatewayCommand::Status { reply } => {
                let _ = reply.send(self.session.status());
            }
            GatewayCommand::EnqueueVerification {
                target_id,
                channel_id,
                reply,
            } => {
                debug!(%target_id, "verification requested");
                let result = self.session.enqueue_verification(target_id, channel_id);
                if let Err(e) = &result {
                    error!(error = %e, "failed to enqueue verification");
                }
                let _ = reply.send(result);
            }
        }
    }
}
