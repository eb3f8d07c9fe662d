use embebot_core::RestError;
use embebot_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("invalid gateway url: {0}")]
    InvalidUrl(String),

    #[error("transport closed")]
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("gateway actor is not running")]
    ActorGone,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failure inside a message or interaction handler. Logged, never propagated
/// to the session.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("rest: {0}")]
    Rest(#[from] RestError),

    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("gateway: {0}")]
    Gateway(#[from] GatewayError),

    #[error("invalid payload: {0}")]
    Invalid(String),
}

impl HandlerError {
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Rest(e) => e.error_kind(),
            Self::Store(_) => "store",
            Self::Gateway(_) => "gateway",
            Self::Invalid(_) => "invalid",
        }
    }
}
