pub mod auth;
pub mod health;
pub mod retention;
pub mod server;

pub use health::{check_once, start_health_check};
pub use retention::{prune_once, start_log_retention};
pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};
