//! Envelope publishing with single-shot channel failover.
//!
//! `publish` never raises: every fault is caught, logged and converted
//! to a boolean result. A failure on the primary channel degrades the
//! transport once and retries exactly once on the fallback; a failure
//! on the fallback is terminal, so there are no retry storms and no
//! failover loops.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::crypt;
use super::envelope::{Action, ActionType, Envelope, ExchangeData, receiver};
use super::transport::{Channel, TransportState};
use crate::config::BotSettings;
use crate::telegram::{ChatId, GroupApi};

/// Broadcasts envelopes to the bot family and operator channels.
pub struct Publisher<A> {
    api: Arc<A>,
    sender: String,
    primary: ChatId,
    fallback: ChatId,
    debug_channel: ChatId,
    critical_channel: ChatId,
    tmp_dir: PathBuf,
    key: [u8; crypt::KEY_LEN],
    transport: TransportState,
}

impl<A: GroupApi + 'static> Publisher<A> {
    /// Creates a publisher wired to the configured channels.
    #[must_use]
    pub fn new(api: Arc<A>, settings: &BotSettings, key: [u8; crypt::KEY_LEN]) -> Self {
        Self {
            api,
            sender: settings.sender.clone(),
            primary: settings.exchange_channel.id,
            fallback: settings.hide_channel.id,
            debug_channel: settings.debug_channel.id,
            critical_channel: settings.critical_channel.id,
            tmp_dir: settings.tmp_dir.clone(),
            key,
            transport: TransportState::new(),
        }
    }

    /// The process-wide transport selector state.
    #[must_use]
    pub fn transport(&self) -> &TransportState {
        &self.transport
    }

    /// Identity of this bot instance on the exchange channel.
    #[must_use]
    pub fn sender(&self) -> &str {
        &self.sender
    }

    /// Broadcasts a plain envelope.
    pub async fn publish(
        &self,
        receivers: &[&str],
        action: Action,
        action_type: ActionType,
        data: Option<ExchangeData>,
    ) -> bool {
        self.publish_inner(receivers, action, action_type, data, None)
            .await
    }

    /// Broadcasts an envelope with a file payload, encrypting it to a
    /// transient copy unless `encrypt` is false.
    pub async fn publish_file(
        &self,
        receivers: &[&str],
        action: Action,
        action_type: ActionType,
        data: Option<ExchangeData>,
        file: &Path,
        encrypt: bool,
    ) -> bool {
        self.publish_inner(receivers, action, action_type, data, Some((file, encrypt)))
            .await
    }

    async fn publish_inner(
        &self,
        receivers: &[&str],
        action: Action,
        action_type: ActionType,
        data: Option<ExchangeData>,
        file: Option<(&Path, bool)>,
    ) -> bool {
        let envelope = Envelope::new(&self.sender, receivers, action, action_type, data);

        if !envelope.is_deliverable() {
            debug!("Envelope has no receivers after self-removal, nothing to send");
            return false;
        }

        let text = envelope.encode();
        if text.is_empty() {
            // Malformed input, not transient: no retry
            return false;
        }

        // Stage the payload once; both attempts reuse the same copy
        let staged = match file {
            None => None,
            Some((path, false)) => Some((path.to_path_buf(), false)),
            Some((path, true)) => {
                let dst = self.tmp_dir.join(format!("{:016x}", rand::random::<u64>()));
                if let Err(e) = crypt::encrypt_file(&self.key, path, &dst).await {
                    warn!("Failed to encrypt payload {}: {}", path.display(), e);
                    return false;
                }
                Some((dst, true))
            }
        };

        let mut attempted_failover = false;
        let delivered = loop {
            let channel = self.transport.current();
            let target = match channel {
                Channel::Primary => self.primary,
                Channel::Fallback => self.fallback,
            };

            let sent = match &staged {
                None => self.api.send_text(target, &text, None).await.map(|_| ()),
                Some((path, _)) => self.api.send_document(target, path, &text).await.map(|_| ()),
            };

            match sent {
                Ok(()) => break true,
                Err(e) if channel == Channel::Primary && !attempted_failover => {
                    warn!("Send on the exchange channel failed: {}", e);
                    attempted_failover = true;
                    self.degrade().await;
                    // Single retry on the fallback channel
                }
                Err(e) => {
                    warn!("Send on the fallback channel failed, giving up: {}", e);
                    break false;
                }
            }
        };

        // Best-effort detached cleanup of the transient encrypted copy
        if delivered && let Some((path, true)) = staged {
            tokio::spawn(async move {
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    warn!("Failed to delete transient file {}: {}", path.display(), e);
                }
            });
        }

        delivered
    }

    /// Failover coordinator: latches the transport to the fallback
    /// channel, tells the emergency coordinator to reroute, and alerts
    /// the operator.
    ///
    /// Runs inside a failure-handling path, so every fault here is
    /// logged and swallowed; the return value only reports whether the
    /// degrade-and-announce sequence completed cleanly.
    pub async fn degrade(&self) -> bool {
        if !self.transport.degrade() {
            // A racing publish already degraded and announced
            return true;
        }

        info!("Transport degraded: exchanging through the hidden channel from now on");

        let mut clean = true;

        let announce = Envelope::new(
            &self.sender,
            &[receiver::EMERGENCY],
            Action::Backup,
            ActionType::Hide,
            Some(ExchangeData::Flag(true)),
        );
        let text = announce.encode();
        if text.is_empty() {
            clean = false;
        } else if let Err(e) = self.api.send_text(self.fallback, &text, None).await {
            warn!("Failed to announce the channel switch: {}", e);
            clean = false;
        }

        let alert = format!(
            "Project: {}\nIssue: exchange channel invalid\nAuto fix: switch to the hide channel\n",
            self.sender
        );
        if let Err(e) = self.api.send_text(self.critical_channel, &alert, None).await {
            warn!("Failed to alert the operator channel: {}", e);
            clean = false;
        }

        clean
    }

    /// Sends a human-readable notice to the operator debug channel.
    pub async fn send_debug(&self, text: &str) -> bool {
        match self.api.send_text(self.debug_channel, text, None).await {
            Ok(_) => true,
            Err(e) => {
                warn!("Failed to send debug notice: {}", e);
                false
            }
        }
    }
}

impl<A> std::fmt::Debug for Publisher<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("sender", &self.sender)
            .field("transport", &self.transport)
            .finish_non_exhaustive()
    }
}
