//! Telegram client wrapper for group management.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use grammers_client::client::{LoginToken, PasswordToken};
use grammers_client::message::{Button, InputMessage, ReplyMarkup};
use grammers_client::{Client, InvocationError, SenderPool, SignInError, sender};
use grammers_session::types::{PeerAuth, PeerId, PeerRef};
use grammers_session::storages::SqliteSession;
use grammers_tl_types as tl;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::rate_limiter::RateLimiter;
use super::{ChatId, GroupApi, GroupMember, LinkButton, LinkOutcome, MessageId};
use crate::config::{ChatRef, TelegramConfig};

/// Errors that can occur during Telegram operations.
#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("Not authorized. Please sign in first.")]
    NotAuthorized,

    #[error("Sign in failed: {0}")]
    SignInFailed(String),

    #[error("Password required for 2FA")]
    PasswordRequired(PasswordToken),

    #[error("Invalid password")]
    InvalidPassword(PasswordToken),

    #[error("Chat {0} is not registered")]
    UnknownChat(ChatId),

    #[error("Flood wait required: {0} seconds")]
    FloodWait(u32),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("API invocation error: {0}")]
    Invocation(String),
}

impl From<InvocationError> for TelegramError {
    fn from(err: InvocationError) -> Self {
        let err_str = err.to_string();

        // Check for flood wait errors
        if (err_str.contains("FLOOD_WAIT") || err_str.contains("flood"))
            && let Some(seconds) = extract_flood_wait_seconds(&err_str)
        {
            return Self::FloodWait(seconds);
        }

        Self::Invocation(err_str)
    }
}

/// Extracts flood wait seconds from an error message.
fn extract_flood_wait_seconds(err_msg: &str) -> Option<u32> {
    let patterns = ["FLOOD_WAIT_", "flood wait "];

    for pattern in patterns {
        if let Some(idx) = err_msg.to_lowercase().find(&pattern.to_lowercase()) {
            let start = idx + pattern.len();
            let num_str: String = err_msg[start..]
                .chars()
                .take_while(char::is_ascii_digit)
                .collect();
            if let Ok(seconds) = num_str.parse() {
                return Some(seconds);
            }
        }
    }
    None
}

/// Strips the bot-API channel prefix (`-100…`) down to the bare id the
/// MTProto layer expects.
fn bare_id(chat: ChatId) -> i64 {
    if chat <= -1_000_000_000_000 {
        -chat - 1_000_000_000_000
    } else {
        chat.abs()
    }
}

/// High-level Telegram client wrapper.
pub struct TelegramBot {
    /// The underlying grammers client.
    client: Client,

    /// Handle to the sender pool for disconnection.
    handle: sender::SenderPoolHandle,

    /// Rate limiter for message sends.
    rate_limiter: RateLimiter,

    /// Registered chats by their configured id.
    chats: RwLock<HashMap<ChatId, PeerRef>>,

    /// Background task running the sender pool.
    _pool_task: JoinHandle<()>,
}

impl TelegramBot {
    /// Connects to Telegram with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if connection fails.
    pub async fn connect(
        config: &TelegramConfig,
        rate_limit_secs: u64,
    ) -> Result<Self, TelegramError> {
        info!("Connecting to Telegram...");

        let session = Arc::new(
            SqliteSession::open(&config.session_path)
                .await
                .map_err(|e| TelegramError::Session(e.to_string()))?,
        );

        let SenderPool {
            runner,
            updates: _updates,
            handle,
        } = SenderPool::new(Arc::clone(&session), config.api_id);

        let client = Client::new(handle.clone());

        // Spawn the sender pool runner
        let pool_task = tokio::spawn(async move {
            runner.run().await;
        });

        let is_authorized = client
            .is_authorized()
            .await
            .map_err(|e| TelegramError::Connection(e.to_string()))?;

        info!("Connected to Telegram. Authorized: {}", is_authorized);

        Ok(Self {
            client,
            handle: handle.thin,
            rate_limiter: RateLimiter::from_secs(rate_limit_secs),
            chats: RwLock::new(HashMap::new()),
            _pool_task: pool_task,
        })
    }

    /// Checks if the client is authorized.
    ///
    /// # Errors
    ///
    /// Returns an error if the check fails.
    pub async fn is_authorized(&self) -> Result<bool, TelegramError> {
        self.client
            .is_authorized()
            .await
            .map_err(|e| TelegramError::Connection(e.to_string()))
    }

    /// Requests a login code to be sent to the phone number.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn request_login_code(
        &self,
        phone: &str,
        api_hash: &str,
    ) -> Result<LoginToken, TelegramError> {
        info!("Requesting login code for phone: {}...", mask_phone(phone));

        self.client
            .request_login_code(phone, api_hash)
            .await
            .map_err(|e| TelegramError::SignInFailed(e.to_string()))
    }

    /// Signs in with the login code.
    ///
    /// # Errors
    ///
    /// Returns an error if sign in fails.
    pub async fn sign_in(&self, token: &LoginToken, code: &str) -> Result<(), TelegramError> {
        info!("Signing in with login code...");

        match self.client.sign_in(token, code).await {
            Ok(_user) => {
                info!("Successfully signed in!");
                Ok(())
            }
            Err(SignInError::PasswordRequired(password_token)) => {
                debug!("2FA password required, hint: {:?}", password_token.hint());
                Err(TelegramError::PasswordRequired(password_token))
            }
            Err(SignInError::InvalidCode) => {
                Err(TelegramError::SignInFailed("Invalid code".to_owned()))
            }
            Err(e) => Err(TelegramError::SignInFailed(e.to_string())),
        }
    }

    /// Checks the 2FA password.
    ///
    /// # Errors
    ///
    /// Returns an error if the password is invalid.
    pub async fn check_password(
        &self,
        password_token: PasswordToken,
        password: &str,
    ) -> Result<(), TelegramError> {
        info!("Checking 2FA password...");

        match self.client.check_password(password_token, password).await {
            Ok(_user) => {
                info!("Successfully authenticated with 2FA!");
                Ok(())
            }
            Err(SignInError::InvalidPassword(token)) => Err(TelegramError::InvalidPassword(token)),
            Err(e) => Err(TelegramError::SignInFailed(e.to_string())),
        }
    }

    /// Registers a broadcast channel so messaging calls can address it.
    pub async fn register_channel(&self, chat: &ChatRef) {
        self.chats.write().await.insert(
            chat.id,
            PeerRef {
                id: PeerId::channel_unchecked(bare_id(chat.id)),
                auth: PeerAuth::from_hash(chat.access_hash),
            },
        );
    }

    /// Registers a supergroup so messaging calls can address it.
    pub async fn register_group(&self, chat: &ChatRef) {
        self.chats.write().await.insert(
            chat.id,
            PeerRef {
                id: PeerId::channel_unchecked(bare_id(chat.id)),
                auth: PeerAuth::from_hash(chat.access_hash),
            },
        );
    }

    async fn packed(&self, chat: ChatId) -> Result<PeerRef, TelegramError> {
        self.chats
            .read()
            .await
            .get(&chat)
            .copied()
            .ok_or(TelegramError::UnknownChat(chat))
    }

    /// Converts an invocation error, feeding flood waits back into the
    /// rate limiter.
    async fn map_error(&self, err: InvocationError) -> TelegramError {
        let mapped: TelegramError = err.into();
        if let TelegramError::FloodWait(seconds) = &mapped {
            warn!("Flood wait triggered: {} seconds", seconds);
            self.rate_limiter.handle_flood_wait(*seconds).await;
        }
        mapped
    }

    /// Returns a reference to the underlying client for advanced
    /// operations.
    #[must_use]
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Disconnects from Telegram.
    pub fn disconnect(&self) {
        info!("Disconnecting from Telegram...");
        self.handle.quit();
    }
}

fn input_channel(packed: PeerRef) -> tl::enums::InputChannel {
    packed.into()
}

fn input_peer(packed: PeerRef) -> tl::enums::InputPeer {
    packed.into()
}

fn build_message(text: &str, link_button: Option<LinkButton>) -> InputMessage {
    let mut message = InputMessage::new().text(text);
    if let Some(b) = link_button {
        message =
            message.reply_markup(ReplyMarkup::from_buttons(&[vec![Button::url(b.text, b.url)]]));
    }
    message
}

#[async_trait]
impl GroupApi for TelegramBot {
    async fn send_text(
        &self,
        chat: ChatId,
        text: &str,
        link_button: Option<LinkButton>,
    ) -> Result<MessageId, TelegramError> {
        let packed = self.packed(chat).await?;
        let waited = self.rate_limiter.wait_and_acquire().await;
        if !waited.is_zero() {
            debug!("Waited {:?} for rate limit", waited);
        }

        match self
            .client
            .send_message(packed, build_message(text, link_button))
            .await
        {
            Ok(sent) => Ok(sent.id()),
            Err(e) => Err(self.map_error(e).await),
        }
    }

    async fn send_document(
        &self,
        chat: ChatId,
        path: &Path,
        caption: &str,
    ) -> Result<MessageId, TelegramError> {
        let packed = self.packed(chat).await?;
        let waited = self.rate_limiter.wait_and_acquire().await;
        if !waited.is_zero() {
            debug!("Waited {:?} for rate limit", waited);
        }

        let uploaded = self
            .client
            .upload_file(path)
            .await
            .map_err(|e| TelegramError::Invocation(e.to_string()))?;

        match self
            .client
            .send_message(packed, InputMessage::new().text(caption).document(uploaded))
            .await
        {
            Ok(sent) => Ok(sent.id()),
            Err(e) => Err(self.map_error(e).await),
        }
    }

    async fn edit_text(
        &self,
        chat: ChatId,
        message_id: MessageId,
        text: &str,
        link_button: Option<LinkButton>,
    ) -> Result<(), TelegramError> {
        let packed = self.packed(chat).await?;
        let waited = self.rate_limiter.wait_and_acquire().await;
        if !waited.is_zero() {
            debug!("Waited {:?} for rate limit", waited);
        }

        match self
            .client
            .edit_message(packed, message_id, build_message(text, link_button))
            .await
        {
            Ok(()) => Ok(()),
            Err(e) => Err(self.map_error(e).await),
        }
    }

    async fn delete_message(
        &self,
        chat: ChatId,
        message_id: MessageId,
    ) -> Result<(), TelegramError> {
        let packed = self.packed(chat).await?;

        let request = tl::functions::channels::DeleteMessages {
            channel: input_channel(packed),
            id: vec![message_id],
        };

        match self.client.invoke(&request).await {
            Ok(_affected) => Ok(()),
            Err(e) => Err(self.map_error(e).await),
        }
    }

    async fn export_invite_link(&self, chat: ChatId) -> Result<LinkOutcome, TelegramError> {
        let packed = self.packed(chat).await?;

        let request = tl::functions::messages::ExportChatInvite {
            legacy_revoke_permanent: true,
            request_needed: false,
            peer: input_peer(packed),
            expire_date: None,
            usage_limit: None,
            title: None,
            subscription_pricing: None,
        };

        match self.client.invoke(&request).await {
            Ok(tl::enums::ExportedChatInvite::ChatInviteExported(invite)) => {
                Ok(LinkOutcome::Link(invite.link))
            }
            Ok(_) => {
                debug!("Invite export for {} returned no plain link", chat);
                Ok(LinkOutcome::Unavailable)
            }
            Err(e) => {
                let err_str = e.to_string();
                // The invite capability was taken away, not a transient
                // fault
                if err_str.contains("CHAT_ADMIN_REQUIRED") || err_str.contains("RIGHT_FORBIDDEN") {
                    return Ok(LinkOutcome::Revoked);
                }
                match self.map_error(e).await {
                    TelegramError::FloodWait(_) => Ok(LinkOutcome::Unavailable),
                    other => Err(other),
                }
            }
        }
    }

    async fn admins(&self, chat: ChatId) -> Result<Vec<GroupMember>, TelegramError> {
        let packed = self.packed(chat).await?;

        let request = tl::functions::channels::GetParticipants {
            channel: input_channel(packed),
            filter: tl::types::ChannelParticipantsAdmins {}.into(),
            offset: 0,
            limit: 200,
            hash: 0,
        };

        let participants = match self.client.invoke(&request).await {
            Ok(tl::enums::channels::ChannelParticipants::Participants(p)) => p,
            Ok(tl::enums::channels::ChannelParticipants::NotModified) => return Ok(Vec::new()),
            Err(e) => return Err(self.map_error(e).await),
        };

        let users: HashMap<i64, tl::types::User> = participants
            .users
            .into_iter()
            .filter_map(|u| match u {
                tl::enums::User::User(user) => Some((user.id, user)),
                tl::enums::User::Empty(_) => None,
            })
            .collect();

        let mut members = Vec::new();
        for participant in participants.participants {
            let (user_id, is_creator, rights) = match participant {
                tl::enums::ChannelParticipant::Creator(creator) => {
                    (creator.user_id, true, Some(creator.admin_rights))
                }
                tl::enums::ChannelParticipant::Admin(admin) => {
                    (admin.user_id, false, Some(admin.admin_rights))
                }
                _ => continue,
            };

            let user = users.get(&user_id);
            let rights = rights.map(|r| {
                let tl::enums::ChatAdminRights::Rights(rights) = r;
                rights
            });

            members.push(GroupMember {
                user_id,
                is_self: user.is_some_and(|u| u.is_self),
                is_bot: user.is_some_and(|u| u.bot),
                is_deleted: user.is_some_and(|u| u.deleted),
                is_creator,
                can_delete_messages: rights.as_ref().is_some_and(|r| r.delete_messages),
                can_restrict_members: rights.as_ref().is_some_and(|r| r.ban_users),
                can_invite_users: rights.as_ref().is_some_and(|r| r.invite_users),
                can_pin_messages: rights.as_ref().is_some_and(|r| r.pin_messages),
            });
        }

        Ok(members)
    }

    async fn group_info(&self, chat: ChatId) -> Result<(String, Option<String>), TelegramError> {
        let packed = self.packed(chat).await?;

        let request = tl::functions::channels::GetChannels {
            id: vec![input_channel(packed)],
        };

        let chats = match self.client.invoke(&request).await {
            Ok(tl::enums::messages::Chats::Chats(c)) => c.chats,
            Ok(tl::enums::messages::Chats::Slice(c)) => c.chats,
            Err(e) => return Err(self.map_error(e).await),
        };

        for found in chats {
            if let tl::enums::Chat::Channel(channel) = found {
                let link = channel.username.map(|u| format!("https://t.me/{u}"));
                return Ok((channel.title, link));
            }
        }

        Ok(("unknown".to_owned(), None))
    }

    async fn leave_group(&self, chat: ChatId) -> Result<(), TelegramError> {
        let packed = self.packed(chat).await?;

        let request = tl::functions::channels::LeaveChannel {
            channel: input_channel(packed),
        };

        match self.client.invoke(&request).await {
            Ok(_updates) => Ok(()),
            Err(e) => Err(self.map_error(e).await),
        }
    }
}

impl std::fmt::Debug for TelegramBot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramBot")
            .field("rate_limiter", &self.rate_limiter)
            .finish_non_exhaustive()
    }
}

/// Masks a phone number for logging (shows last 4 digits).
fn mask_phone(phone: &str) -> String {
    let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
    if digits.len() > 4 {
        format!("***{}", &digits[digits.len() - 4..])
    } else {
        "****".to_owned()
    }
}
