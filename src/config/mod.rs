//! Configuration loading and validation.

mod groups;
mod settings;

pub use groups::{GroupConfig, GroupDirectory};
pub use settings::{BotSettings, ChatRef, ConfigError, TelegramConfig};
