pub mod database;
pub mod error;
pub mod gateway_state;
pub mod guild_settings;
pub mod retry_tasks;
pub mod row_helpers;
pub mod schema;
pub mod wakes;

pub use database::Database;
pub use error::StoreError;
pub use gateway_state::GatewayStateRepo;
pub use guild_settings::{CustomDomain, GuildSettings, GuildSettingsRepo};
pub use retry_tasks::{RetryTask, RetryTaskRepo};
pub use wakes::{WakePurpose, WakeRepo};
