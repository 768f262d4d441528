//! Application settings and Telegram configuration.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::telegram::{ChatId, UserId};

/// Telegram API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Telegram API ID (obtain from <https://my.telegram.org>).
    pub api_id: i32,

    /// Telegram API hash (obtain from <https://my.telegram.org>).
    pub api_hash: String,

    /// Path to the session file.
    #[serde(default = "default_session_path")]
    pub session_path: PathBuf,
}

fn default_session_path() -> PathBuf {
    PathBuf::from("session.db")
}

impl TelegramConfig {
    /// Creates configuration from environment variables.
    ///
    /// Expects `TG_API_ID` and `TG_API_HASH` to be set.
    ///
    /// # Errors
    ///
    /// Returns an error if environment variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_id: i32 = std::env::var("TG_API_ID")
            .map_err(|_| ConfigError::MissingEnvVar("TG_API_ID"))?
            .parse()
            .map_err(|_| ConfigError::InvalidApiId)?;

        let api_hash = std::env::var("TG_API_HASH")
            .map_err(|_| ConfigError::MissingEnvVar("TG_API_HASH"))?;

        let session_path =
            std::env::var("TG_SESSION_PATH").map_or_else(|_| default_session_path(), PathBuf::from);

        Ok(Self {
            api_id,
            api_hash,
            session_path,
        })
    }
}

/// Reference to a chat with the access hash needed to address it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRef {
    /// Bare chat identifier.
    pub id: ChatId,

    /// MTProto access hash for this chat.
    #[serde(default)]
    pub access_hash: i64,
}

/// Bot-wide settings loaded from a JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotSettings {
    /// Identity of this bot instance on the exchange channel.
    #[serde(default = "default_sender")]
    pub sender: String,

    /// Primary exchange channel.
    pub exchange_channel: ChatRef,

    /// Hidden fallback channel.
    pub hide_channel: ChatRef,

    /// Operator-facing debug channel.
    pub debug_channel: ChatRef,

    /// Operator-facing critical alert channel.
    pub critical_channel: ChatRef,

    /// Directory holding the persisted registries.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Directory for transient artifacts (encrypted copies, snapshots).
    #[serde(default = "default_tmp_dir")]
    pub tmp_dir: PathBuf,

    /// Process log file, rotated daily.
    #[serde(default = "default_log_path")]
    pub log_path: PathBuf,

    /// Shared exchange key, hex-encoded (64 characters).
    pub exchange_key: String,

    /// Keyword tip expiry in seconds.
    #[serde(default = "default_time_keyword")]
    pub time_keyword: u64,

    /// Off-topic tip expiry in seconds.
    #[serde(default = "default_time_ot")]
    pub time_ot: u64,

    /// RM tip expiry in seconds.
    #[serde(default = "default_time_rm")]
    pub time_rm: u64,

    /// Welcome tip expiry in seconds.
    #[serde(default = "default_time_welcome")]
    pub time_welcome: u64,

    /// Minimum seconds between invite-link rotations per group.
    #[serde(default = "default_time_channel")]
    pub time_channel: u64,

    /// Whether this instance participates in data backup.
    #[serde(default)]
    pub backup: bool,

    /// Sibling bot accounts treated as trusted group members.
    #[serde(default)]
    pub bot_allowlist: HashSet<UserId>,

    /// Minimum interval between transport sends in seconds.
    #[serde(default = "default_send_interval")]
    pub min_send_interval_secs: u64,
}

fn default_sender() -> String {
    "TIP".to_owned()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_tmp_dir() -> PathBuf {
    PathBuf::from("tmp")
}

fn default_log_path() -> PathBuf {
    PathBuf::from("log/log")
}

fn default_time_keyword() -> u64 {
    60
}

fn default_time_ot() -> u64 {
    600
}

fn default_time_rm() -> u64 {
    300
}

fn default_time_welcome() -> u64 {
    120
}

fn default_time_channel() -> u64 {
    3600
}

fn default_send_interval() -> u64 {
    1
}

impl BotSettings {
    /// Loads settings from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let settings: Self = serde_json::from_str(&content)?;
        Ok(settings)
    }

    /// Decodes the shared exchange key.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is not 64 hex characters.
    pub fn key_bytes(&self) -> Result<[u8; 32], ConfigError> {
        parse_hex_key(&self.exchange_key)
    }
}

/// Parses a 64-character hex string into a 32-byte key.
fn parse_hex_key(hex: &str) -> Result<[u8; 32], ConfigError> {
    let hex = hex.trim();
    if hex.len() != 64 {
        return Err(ConfigError::InvalidKey);
    }

    let mut key = [0u8; 32];
    for (i, chunk) in hex.as_bytes().chunks_exact(2).enumerate() {
        let pair = std::str::from_utf8(chunk).map_err(|_| ConfigError::InvalidKey)?;
        key[i] = u8::from_str_radix(pair, 16).map_err(|_| ConfigError::InvalidKey)?;
    }
    Ok(key)
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Invalid API ID format (must be a positive integer)")]
    InvalidApiId,

    #[error("Exchange key must be 64 hex characters")]
    InvalidKey,

    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration file: {0}")]
    Parse(#[from] serde_json::Error),
}
