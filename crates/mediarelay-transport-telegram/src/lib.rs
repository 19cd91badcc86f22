#![deny(missing_docs)]
//! Telegram transport adapter for mediarelay.

/// Telegram API calls and the destination built on them.
pub mod bot;
/// Connection setup and liveness checks.
pub mod runner;

pub use bot::destination::TelegramDestination;
pub use runner::{TelegramConnection, TelegramConnector};
