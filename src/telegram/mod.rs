//! Telegram transport layer.
//!
//! The publisher and the maintenance jobs talk to Telegram through the
//! [`GroupApi`] trait so the core logic stays testable; `TelegramBot`
//! is the grammers-backed production implementation.

mod client;
mod rate_limiter;

pub use client::{TelegramBot, TelegramError};
pub use rate_limiter::RateLimiter;

use std::path::Path;

use async_trait::async_trait;

/// Telegram chat identifier (group or channel).
pub type ChatId = i64;

/// Telegram user identifier.
pub type UserId = i64;

/// Message identifier within a chat.
pub type MessageId = i32;

/// A single inline URL button attached below a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkButton {
    /// Button label.
    pub text: String,
    /// Target URL.
    pub url: String,
}

/// Outcome of an invite-link export.
///
/// A revoked link is a definitive state transition (the bot lost the
/// right to manage invites), while an unavailable one is transient and
/// must not mutate any cached state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOutcome {
    /// A fresh, usable invite link.
    Link(String),
    /// The link capability was revoked; clear cached state.
    Revoked,
    /// No usable result right now; leave cached state alone.
    Unavailable,
}

/// A group member as seen by the admin refresh.
#[derive(Debug, Clone, Default)]
pub struct GroupMember {
    pub user_id: UserId,
    pub is_self: bool,
    pub is_bot: bool,
    pub is_deleted: bool,
    pub is_creator: bool,
    pub can_delete_messages: bool,
    pub can_restrict_members: bool,
    pub can_invite_users: bool,
    pub can_pin_messages: bool,
}

/// Messaging operations the core needs from the transport client.
#[async_trait]
pub trait GroupApi: Send + Sync {
    /// Sends a text message, optionally with an inline URL button.
    async fn send_text(
        &self,
        chat: ChatId,
        text: &str,
        button: Option<LinkButton>,
    ) -> Result<MessageId, TelegramError>;

    /// Sends a file with a caption.
    async fn send_document(
        &self,
        chat: ChatId,
        path: &Path,
        caption: &str,
    ) -> Result<MessageId, TelegramError>;

    /// Edits an existing message in place.
    async fn edit_text(
        &self,
        chat: ChatId,
        message_id: MessageId,
        text: &str,
        button: Option<LinkButton>,
    ) -> Result<(), TelegramError>;

    /// Deletes a message.
    async fn delete_message(&self, chat: ChatId, message_id: MessageId)
    -> Result<(), TelegramError>;

    /// Exports a fresh invite link for a group.
    async fn export_invite_link(&self, chat: ChatId) -> Result<LinkOutcome, TelegramError>;

    /// Fetches the current administrator list of a group.
    async fn admins(&self, chat: ChatId) -> Result<Vec<GroupMember>, TelegramError>;

    /// Fetches the display name and public link of a group.
    async fn group_info(&self, chat: ChatId) -> Result<(String, Option<String>), TelegramError>;

    /// Leaves a group.
    async fn leave_group(&self, chat: ChatId) -> Result<(), TelegramError>;
}
