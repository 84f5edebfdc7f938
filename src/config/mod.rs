//! Configuration module for the link collector.
//!
//! Handles loading and validation of settings from the environment,
//! including the control bot token and `MTProto` API credentials.

mod settings;
mod token;

pub use settings::{ConfigError, Settings};
pub use token::{TokenError, validate_bot_token};

/// Minimum accepted length of the control bot token.
pub const MIN_TOKEN_LENGTH: usize = 30;

/// Directories the launcher prepares before handing off to the bot.
pub const RUNTIME_DIRECTORIES: [&str; 6] = ["data", "exports", "sessions", "logs", "backups", "temp"];
