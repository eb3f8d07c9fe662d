//! Resumable gateway session actor.
//!
//! One [`actor`] task owns the [`session::Session`] state machine. It opens
//! the socket through a [`transport::Connector`], heartbeats and resumes it,
//! routes dispatches to handlers, and drains the verification [`retry`] queue
//! whenever one of its persisted [`wake`] deadlines comes due.

pub mod actor;
pub mod clock;
pub mod config;
pub mod error;
pub mod heartbeat;
pub mod policy;
pub mod retry;
pub mod router;
pub mod session;
pub mod transport;
pub mod wake;

#[cfg(test)]
mod testing;

pub use actor::{GatewayBuilder, GatewayCommand, GatewayHandle};
pub use config::{GatewayConfig, DEFAULT_INSTANCE};
pub use error::{GatewayError, HandlerError, TransportError};
pub use retry::{DrainReport, Verifier};
pub use router::{drain_handlers, DispatchContext, InteractionHandler, MessageHandler};
pub use session::{Phase, StatusSnapshot};
