//! Invite-link refresh.
//!
//! Regenerates a group's invite link and keeps the posted invite
//! message in sync, entirely under the `channel` lock. A revoked link
//! is a definitive state transition: the cached link, message slot and
//! group channel config are cleared and the stale message deleted. A
//! transient unavailability aborts without mutating anything.

use tracing::{debug, warn};

use super::JobContext;
use crate::state::now_unix;
use crate::telegram::{ChatId, GroupApi, LinkButton, LinkOutcome};

/// How the posted invite message should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkMode {
    /// First post for a group.
    Open,
    /// Periodic rotation: edit the existing message in place.
    Edit,
    /// Replace the message text with a closed-state notice and drop
    /// the button markup.
    Close,
    /// Always send a fresh message, ignoring the rotation interval.
    Send,
}

/// Explicit outcome of a refresh; nothing-to-do is not a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkRefresh {
    /// Link rotated and the message updated or resent.
    Updated,
    /// Message replaced with the closed-state notice.
    Closed,
    /// The link was revoked and all cached state cleared.
    Revoked,
    /// Nothing to do (no channel config, rotation not due, transient
    /// unavailability).
    Skipped,
    /// The transport rejected the update.
    Failed,
}

/// Regenerates the invite link of `group_id` and refreshes the posted
/// message accordingly.
pub async fn refresh_invite_link<A: GroupApi + 'static>(
    ctx: &JobContext<A>,
    mode: LinkMode,
    group_id: ChatId,
    manual: bool,
    reason: Option<&str>,
) -> LinkRefresh {
    let now = now_unix();

    let (target, channel_text, button_label) = {
        let groups = ctx.groups.read().await;
        let Some(config) = groups.get(group_id) else {
            return LinkRefresh::Skipped;
        };
        let Some(channel) = config.channel else {
            return LinkRefresh::Skipped;
        };
        (
            channel.id,
            config.channel_text.clone(),
            config.channel_button.clone(),
        )
    };

    let mut channels = ctx.state.channels.lock().await;

    let (old_slot, rotated_at) = {
        let entry = channels.state_mut(group_id);
        (entry.slot, entry.rotated_at)
    };

    if !manual
        && mode != LinkMode::Send
        && now.saturating_sub(rotated_at) < ctx.settings.time_channel
    {
        return LinkRefresh::Skipped;
    }

    let link = match ctx.api.export_invite_link(group_id).await {
        Ok(LinkOutcome::Link(link)) => link,
        Ok(LinkOutcome::Revoked) => {
            channels.state_mut(group_id).clear();
            ctx.state.persist_channels(&channels);

            {
                let mut groups = ctx.groups.write().await;
                if let Some(config) = groups.get_mut(group_id) {
                    config.channel = None;
                }
                groups.persist(ctx.state.data_dir());
            }

            if !old_slot.is_vacant()
                && let Err(e) = ctx.api.delete_message(target, old_slot.message_id).await
            {
                warn!("Failed to delete stale invite message: {}", e);
            }

            return LinkRefresh::Revoked;
        }
        Ok(LinkOutcome::Unavailable) => {
            debug!("No usable invite link for {} right now", group_id);
            return LinkRefresh::Skipped;
        }
        Err(e) => {
            warn!("Invite link export for {} failed: {}", group_id, e);
            return LinkRefresh::Failed;
        }
    };

    {
        let entry = channels.state_mut(group_id);
        entry.link = Some(link.clone());
        entry.rotated_at = now;
    }
    ctx.state.persist_channels(&channels);

    let (text, button) = if mode == LinkMode::Close {
        let mut text = "Description: closed\n".to_owned();
        if let Some(reason) = reason {
            text.push_str(&format!("Reason: {reason}\n"));
        }
        (text, None)
    } else {
        (
            channel_text,
            Some(LinkButton {
                text: button_label,
                url: link,
            }),
        )
    };

    // Edit the posted message in place when one exists
    if matches!(mode, LinkMode::Open | LinkMode::Edit | LinkMode::Close) && !old_slot.is_vacant() {
        match ctx
            .api
            .edit_text(target, old_slot.message_id, &text, button.clone())
            .await
        {
            Ok(()) => {
                channels
                    .state_mut(group_id)
                    .slot
                    .record(old_slot.message_id, now);
                ctx.state.persist_channels(&channels);
                return if mode == LinkMode::Close {
                    LinkRefresh::Closed
                } else {
                    LinkRefresh::Updated
                };
            }
            Err(e) => {
                // Fall through to a fresh message
                debug!("Edit of the invite message failed: {}", e);
            }
        }
    }

    match ctx.api.send_text(target, &text, button).await {
        Ok(message_id) => {
            channels.state_mut(group_id).slot.record(message_id, now);
            ctx.state.persist_channels(&channels);

            if !old_slot.is_vacant()
                && let Err(e) = ctx.api.delete_message(target, old_slot.message_id).await
            {
                warn!("Failed to delete the previous invite message: {}", e);
            }

            if mode == LinkMode::Close {
                LinkRefresh::Closed
            } else {
                LinkRefresh::Updated
            }
        }
        Err(e) => {
            warn!("Failed to post the invite message for {}: {}", group_id, e);
            LinkRefresh::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::mock_context;
    use super::*;
    use crate::config::{ChatRef, GroupConfig};

    const GROUP: ChatId = -100;
    const TARGET: ChatId = -200;

    async fn add_group(ctx: &JobContext<crate::telegram::mock::MockApi>) {
        let mut config = GroupConfig::new(GROUP, 1);
        config.channel = Some(ChatRef {
            id: TARGET,
            access_hash: 2,
        });
        ctx.groups.write().await.insert(config);
    }

    #[tokio::test]
    async fn test_fresh_link_posts_message_with_button() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, api) = mock_context(dir.path());
        add_group(&ctx).await;

        let outcome = refresh_invite_link(&ctx, LinkMode::Open, GROUP, false, None).await;
        assert_eq!(outcome, LinkRefresh::Updated);

        let sent = api.sent_to(TARGET);
        assert_eq!(sent.len(), 1);
        let button = sent[0].button.clone().unwrap();
        assert_eq!(button.url, "https://t.me/+mock");

        let channels = ctx.state.channels.lock().await;
        let entry = &channels.states[&GROUP];
        assert_eq!(entry.link.as_deref(), Some("https://t.me/+mock"));
        assert_eq!(entry.slot.message_id, sent[0].id);
    }

    #[tokio::test]
    async fn test_rotation_interval_is_honored() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, api) = mock_context(dir.path());
        add_group(&ctx).await;

        {
            let mut channels = ctx.state.channels.lock().await;
            channels.state_mut(GROUP).rotated_at = now_unix();
        }

        let outcome = refresh_invite_link(&ctx, LinkMode::Edit, GROUP, false, None).await;
        assert_eq!(outcome, LinkRefresh::Skipped);
        assert!(api.sent_to(TARGET).is_empty());

        // A manual refresh ignores the interval
        let outcome = refresh_invite_link(&ctx, LinkMode::Edit, GROUP, true, None).await;
        assert_eq!(outcome, LinkRefresh::Updated);
    }

    #[tokio::test]
    async fn test_revoked_link_clears_state_and_deletes_stale_message() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, api) = mock_context(dir.path());
        add_group(&ctx).await;
        api.set_link_outcome(GROUP, LinkOutcome::Revoked);

        {
            let mut channels = ctx.state.channels.lock().await;
            let entry = channels.state_mut(GROUP);
            entry.link = Some("https://t.me/+old".to_owned());
            entry.slot.record(55, 1);
        }

        let outcome = refresh_invite_link(&ctx, LinkMode::Edit, GROUP, true, None).await;
        assert_eq!(outcome, LinkRefresh::Revoked);

        // Cached state cleared, stale message deleted, nothing sent
        let channels = ctx.state.channels.lock().await;
        assert!(channels.states[&GROUP].link.is_none());
        assert!(channels.states[&GROUP].slot.is_vacant());
        assert_eq!(*api.deleted.lock().unwrap(), vec![(TARGET, 55)]);
        assert!(api.sent_to(TARGET).is_empty());
        assert!(ctx.groups.read().await.get(GROUP).unwrap().channel.is_none());
    }

    #[tokio::test]
    async fn test_transient_unavailability_mutates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, api) = mock_context(dir.path());
        add_group(&ctx).await;
        api.set_link_outcome(GROUP, LinkOutcome::Unavailable);

        {
            let mut channels = ctx.state.channels.lock().await;
            let entry = channels.state_mut(GROUP);
            entry.link = Some("https://t.me/+old".to_owned());
            entry.slot.record(55, 1);
        }

        let outcome = refresh_invite_link(&ctx, LinkMode::Edit, GROUP, true, None).await;
        assert_eq!(outcome, LinkRefresh::Skipped);

        let channels = ctx.state.channels.lock().await;
        assert_eq!(channels.states[&GROUP].link.as_deref(), Some("https://t.me/+old"));
        assert_eq!(channels.states[&GROUP].slot.message_id, 55);
        assert!(api.deleted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_edit_mode_updates_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, api) = mock_context(dir.path());
        add_group(&ctx).await;

        {
            let mut channels = ctx.state.channels.lock().await;
            channels.state_mut(GROUP).slot.record(55, 1);
        }

        let outcome = refresh_invite_link(&ctx, LinkMode::Edit, GROUP, true, None).await;
        assert_eq!(outcome, LinkRefresh::Updated);

        let edited = api.edited.lock().unwrap();
        assert_eq!(edited.len(), 1);
        assert_eq!((edited[0].0, edited[0].1), (TARGET, 55));
        // Same message id, fresh timestamp
        let channels = ctx.state.channels.lock().await;
        assert_eq!(channels.states[&GROUP].slot.message_id, 55);
    }

    #[tokio::test]
    async fn test_close_mode_replaces_text_and_drops_button() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, api) = mock_context(dir.path());
        add_group(&ctx).await;

        {
            let mut channels = ctx.state.channels.lock().await;
            channels.state_mut(GROUP).slot.record(55, 1);
        }

        let outcome =
            refresh_invite_link(&ctx, LinkMode::Close, GROUP, true, Some("spam wave")).await;
        assert_eq!(outcome, LinkRefresh::Closed);

        let edited = api.edited.lock().unwrap();
        assert!(edited[0].2.contains("closed"));
        assert!(edited[0].2.contains("spam wave"));
    }
}
