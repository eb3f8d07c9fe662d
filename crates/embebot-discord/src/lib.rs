//! Discord-facing behavior: REST calls, link rewriting, slash commands and
//! the embed suppression check run by the gateway's retry queue.

pub mod commands;
pub mod interactions;
pub mod matcher;
pub mod message;
pub mod rest;
pub mod verifier;

#[cfg(test)]
mod testing;

pub use commands::{definitions, CommandDefinition};
pub use interactions::SettingsCommands;
pub use matcher::{UrlMatcher, SERVICES};
pub use message::MessageRelay;
pub use rest::{DiscordApi, DiscordRest};
pub use verifier::EmbedVerifier;
