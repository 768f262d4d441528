//! Exchange envelope construction and encoding.
//!
//! An envelope is the unit of cross-bot communication. It is rendered as
//! a fenced JSON block with the keys `from`, `to`, `action`, `type` and
//! `data`; receivers are symbolic identities resolved by the subscriber
//! set of the shared channel, not by address.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Symbolic receiver identities recognized by the bot family.
pub mod receiver {
    /// Backup coordinator instance.
    pub const BACKUP: &str = "BACKUP";
    /// Regex statistics collector instance.
    pub const REGEX: &str = "REGEX";
    /// Group management instance.
    pub const MANAGE: &str = "MANAGE";
    /// Emergency routing coordinator, addressed on channel failover.
    pub const EMERGENCY: &str = "EMERGENCY";
}

/// Coarse category of an exchange message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Data backup and running-status traffic.
    Backup,
    /// Regex word-counter traffic.
    Regex,
    /// Group leave requests and notices.
    Leave,
}

/// Sub-category refining an [`Action`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    /// Announce the switch to the hidden fallback channel.
    Hide,
    /// Running status report.
    Status,
    /// Persisted data file payload.
    Data,
    /// Word occurrence counters.
    Count,
    /// Word removal request.
    Remove,
    /// Request for approval.
    Request,
    /// Informational record.
    Info,
}

/// Payload of an envelope: a tagged union of the plain data shapes
/// the bot family exchanges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExchangeData {
    /// Boolean flag.
    Flag(bool),
    /// Integer value.
    Count(i64),
    /// Plain string value.
    Text(String),
    /// Structured mapping.
    Map(serde_json::Map<String, serde_json::Value>),
}

impl ExchangeData {
    /// Builds a [`ExchangeData::Map`] from a JSON value, discarding
    /// anything that is not an object.
    #[must_use]
    pub fn map(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Object(map) => Self::Map(map),
            _ => Self::Map(serde_json::Map::new()),
        }
    }
}

/// The unit of cross-bot communication.
///
/// Constructed fresh per broadcast call and discarded after the publish
/// attempt completes; never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    /// Identity of the sending bot instance.
    #[serde(rename = "from")]
    pub sender: String,

    /// Remaining receiver identities, self already removed.
    #[serde(rename = "to")]
    pub receivers: Vec<String>,

    /// Coarse category.
    pub action: Action,

    /// Sub-category.
    #[serde(rename = "type")]
    pub action_type: ActionType,

    /// Optional payload.
    pub data: Option<ExchangeData>,
}

impl Envelope {
    /// Creates an envelope, dropping the sender's own identity from the
    /// receiver list.
    #[must_use]
    pub fn new(
        sender: &str,
        receivers: &[&str],
        action: Action,
        action_type: ActionType,
        data: Option<ExchangeData>,
    ) -> Self {
        let receivers = receivers
            .iter()
            .filter(|r| **r != sender)
            .map(|r| (*r).to_owned())
            .collect();

        Self {
            sender: sender.to_owned(),
            receivers,
            action,
            action_type,
            data,
        }
    }

    /// An envelope with no receivers left after self-removal must never
    /// be transmitted.
    #[must_use]
    pub fn is_deliverable(&self) -> bool {
        !self.receivers.is_empty()
    }

    /// Renders the envelope as a fenced JSON block.
    ///
    /// Returns an empty string on a structural serialization error; the
    /// caller treats that as nothing-to-send and does not retry, since
    /// the input is malformed rather than transient.
    #[must_use]
    pub fn encode(&self) -> String {
        match serde_json::to_string_pretty(self) {
            Ok(json) => format!("```\n{json}\n```"),
            Err(e) => {
                warn!("Failed to encode envelope: {}", e);
                String::new()
            }
        }
    }
}
