//! The periodic maintenance jobs.
//!
//! Each job acquires exactly the named lock matching the resources it
//! touches, does its work, persists while still holding the lock, and
//! releases on scope exit. Faults are logged and folded into the
//! boolean outcome; they never propagate.

use std::path::Path;
use std::time::{Duration, SystemTime};

use serde_json::json;
use tracing::{info, warn};

use super::invite::{LinkMode, refresh_invite_link};
use super::JobContext;
use crate::exchange::{Action, ActionType, ExchangeData, receiver};
use crate::state::{admin_set, now_unix, store, trust_set};
use crate::telegram::{ChatId, GroupApi};

/// Minute job: expire stale tip messages, then trigger detached
/// invite-link refreshes.
///
/// Holds the `message` lock only for the expiry sweep; the refreshes
/// run as fire-and-forget tasks under the `channel` lock and their
/// outcome does not affect this job's result.
pub async fn minute_tick<A: GroupApi + 'static>(ctx: &JobContext<A>) -> bool {
    let now = now_unix();
    let clean_groups = ctx.groups.read().await.clean_enabled();

    let stale = {
        let mut messages = ctx.state.messages.lock().await;
        let stale = messages.expire_stale(&clean_groups, now, &ctx.settings);
        ctx.state.persist_message_slots(&messages);
        stale
    };

    for (group_id, message_id) in stale {
        if let Err(e) = ctx.api.delete_message(group_id, message_id).await {
            warn!("Failed to delete expired tip in {}: {}", group_id, e);
        }
    }

    // Bind the id list so the directory guard drops before the
    // refreshes touch the directory again
    let channel_groups = ctx.groups.read().await.channel_enabled();
    for group_id in channel_groups {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            refresh_invite_link(&ctx, LinkMode::Edit, group_id, false, None).await;
        });
    }

    true
}

/// Resends invite links for groups configured for resending.
pub async fn resend_links<A: GroupApi + 'static>(ctx: &JobContext<A>) -> bool {
    // The refresh re-acquires the directory lock (and writes to it on
    // the revoked path), so the guard must not outlive this statement
    let group_ids = ctx.groups.read().await.resend_enabled();
    for group_id in group_ids {
        refresh_invite_link(ctx, LinkMode::Send, group_id, false, None).await;
    }
    true
}

/// Asks the regex statistics collector to drop a word from one of its
/// category lists.
pub async fn request_word_removal<A: GroupApi + 'static>(
    ctx: &JobContext<A>,
    category: &str,
    word: &str,
) -> bool {
    ctx.publisher
        .publish(
            &[receiver::REGEX],
            Action::Regex,
            ActionType::Remove,
            Some(ExchangeData::map(json!({
                "type": category,
                "word": word,
            }))),
        )
        .await
}

/// Daily admin refresh: recompute admin/trust sets from the fetched
/// membership, leave groups the bot was removed from, and report
/// groups where required permissions are missing.
pub async fn refresh_admins<A: GroupApi + 'static>(ctx: &JobContext<A>) -> bool {
    let mut admins = ctx.state.admins.lock().await;

    for group_id in admins.groups() {
        let members = match ctx.api.admins(group_id).await {
            Ok(members) => members,
            Err(e) => {
                // Transient fetch failure: leave the group's state alone
                warn!("Admin fetch for {} failed: {}", group_id, e);
                continue;
            }
        };

        if !members.iter().any(|m| m.is_self) {
            // The bot is gone from the group: leave and notify
            let (name, link) = group_info_or_default(ctx, group_id).await;
            if let Err(e) = ctx.api.leave_group(group_id).await {
                warn!("Failed to leave {}: {}", group_id, e);
            }
            ctx.publisher
                .publish(
                    &[receiver::MANAGE],
                    Action::Leave,
                    ActionType::Info,
                    Some(group_record(group_id, &name, link.as_deref(), None)),
                )
                .await;
            ctx.publisher
                .send_debug(&format!(
                    "Project: {}\nGroup name: {}\nGroup id: {}\nStatus: left automatically\nReason: removed from the group\n",
                    ctx.settings.sender, name, group_id
                ))
                .await;

            admins.remove_group(group_id);
            ctx.state.persist_admins(&admins);
            ctx.state.persist_lacking(&admins);
            continue;
        }

        let admin_ids = admin_set(&members, &ctx.settings.bot_allowlist);
        let trust_ids = trust_set(&members, &ctx.settings.bot_allowlist);

        let me = members.iter().find(|m| m.is_self);
        let recognized = me.is_some_and(|m| admin_ids.contains(&m.user_id));

        admins.admins.insert(group_id, admin_ids);
        admins.trusted.insert(group_id, trust_ids);
        ctx.state.persist_admins(&admins);

        let sufficient =
            me.is_some_and(|m| m.can_delete_messages && m.can_invite_users && m.can_pin_messages);

        if sufficient {
            if admins.lacking.remove(&group_id) {
                ctx.state.persist_lacking(&admins);
            }
            continue;
        }

        if !admins.lacking.insert(group_id) {
            // Already reported; do not spam MANAGE
            continue;
        }
        ctx.state.persist_lacking(&admins);

        let reason = if recognized { "permissions" } else { "user" };
        let (name, link) = group_info_or_default(ctx, group_id).await;
        ctx.publisher
            .publish(
                &[receiver::MANAGE],
                Action::Leave,
                ActionType::Request,
                Some(group_record(group_id, &name, link.as_deref(), Some(reason))),
            )
            .await;
        ctx.publisher
            .send_debug(&format!(
                "Project: {}\nGroup name: {}\nGroup id: {}\nStatus: {}\n",
                ctx.settings.sender, name, group_id, reason
            ))
            .await;
    }

    true
}

/// Hourly regex flush: share each non-empty counter table with the
/// statistics collector, then zero it.
pub async fn flush_regex_counters<A: GroupApi + 'static>(ctx: &JobContext<A>) -> bool {
    let mut regex = ctx.state.regex.lock().await;

    for category in regex.categories() {
        let Some(table) = regex.take(&category) else {
            continue;
        };

        let Some(snapshot) = store::data_to_file(&ctx.settings.tmp_dir, &table).await else {
            // Could not stage the snapshot; keep the counts for the
            // next flush
            regex.counters.insert(category.clone(), table);
            continue;
        };

        let delivered = ctx
            .publisher
            .publish_file(
                &[receiver::REGEX],
                Action::Regex,
                ActionType::Count,
                Some(ExchangeData::Text(format!("{category}_words"))),
                &snapshot,
                true,
            )
            .await;
        if !delivered {
            warn!("Failed to share {} word counters", category);
        }

        if let Err(e) = tokio::fs::remove_file(&snapshot).await {
            warn!("Failed to delete counter snapshot: {}", e);
        }

        ctx.state.persist_regex(&regex);
    }

    true
}

/// Monthly reset: clear the accumulation registries and notify the
/// operator.
pub async fn reset_monthly<A: GroupApi + 'static>(ctx: &JobContext<A>) -> bool {
    {
        let mut messages = ctx.state.messages.lock().await;
        messages.reset_accumulated();
        ctx.state.persist_accumulated(&messages);
    }

    info!("Monthly accumulation state reset");
    ctx.publisher
        .send_debug(&format!(
            "Project: {}\nAction: reset\n",
            ctx.settings.sender
        ))
        .await;

    true
}

/// Shares every non-empty persisted data file with the backup
/// coordinator, pausing between files to avoid saturating the
/// transport.
pub async fn backup_files<A: GroupApi + 'static>(ctx: &JobContext<A>, pause: Duration) -> bool {
    for name in store::FILE_LIST {
        let path = store::slot_path(ctx.state.data_dir(), name);

        let has_content = tokio::fs::metadata(&path)
            .await
            .map(|m| m.len() > 0)
            .unwrap_or(false);
        if !has_content {
            continue;
        }

        ctx.publisher
            .publish_file(
                &[receiver::BACKUP],
                Action::Backup,
                ActionType::Data,
                Some(ExchangeData::Text(name.to_owned())),
                &path,
                true,
            )
            .await;

        tokio::time::sleep(pause).await;
    }

    true
}

/// Reports the running status to the backup coordinator.
pub async fn report_status<A: GroupApi + 'static>(ctx: &JobContext<A>, phase: &str) -> bool {
    ctx.publisher
        .publish(
            &[receiver::BACKUP],
            Action::Backup,
            ActionType::Status,
            Some(ExchangeData::map(json!({
                "type": phase,
                "backup": ctx.settings.backup,
            }))),
        )
        .await
}

/// Rotates the process log to a dated archive and drops archives older
/// than 30 days. Operational hygiene; not part of the locking
/// discipline.
pub fn rotate_logs(log_path: &Path) -> bool {
    let Some(dir) = log_path.parent() else {
        return false;
    };
    let Some(name) = log_path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };

    let stamp = chrono::Local::now().format("%Y%m%d");
    let archive = dir.join(format!("{name}-{stamp}"));

    if let Err(e) = std::fs::rename(log_path, &archive) {
        warn!("Log rotation failed: {}", e);
        return false;
    }
    if let Err(e) = std::fs::write(log_path, "") {
        warn!("Failed to recreate the log file: {}", e);
        return false;
    }

    let prefix = format!("{name}-");
    let cutoff = SystemTime::now() - Duration::from_secs(30 * 24 * 3600);

    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if !file_name.starts_with(&prefix) {
                continue;
            }

            let outdated = entry
                .metadata()
                .and_then(|m| m.modified())
                .map(|modified| modified < cutoff)
                .unwrap_or(false);
            if outdated && let Err(e) = std::fs::remove_file(entry.path()) {
                warn!("Failed to delete old log archive {}: {}", file_name, e);
            }
        }
    }

    true
}

/// Builds the structured group record shared with MANAGE.
fn group_record(
    group_id: ChatId,
    name: &str,
    link: Option<&str>,
    reason: Option<&str>,
) -> ExchangeData {
    let mut map = serde_json::Map::new();
    map.insert("group_id".to_owned(), json!(group_id));
    map.insert("group_name".to_owned(), json!(name));
    map.insert("group_link".to_owned(), json!(link));
    if let Some(reason) = reason {
        map.insert("reason".to_owned(), json!(reason));
    }
    ExchangeData::Map(map)
}

async fn group_info_or_default<A: GroupApi>(
    ctx: &JobContext<A>,
    group_id: ChatId,
) -> (String, Option<String>) {
    match ctx.api.group_info(group_id).await {
        Ok(info) => info,
        Err(e) => {
            warn!("Failed to fetch info for {}: {}", group_id, e);
            ("unknown".to_owned(), None)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::super::testing::{PRIMARY, mock_context};
    use super::*;
    use crate::config::{ChatRef, GroupConfig};
    use crate::telegram::GroupMember;

    const GROUP: ChatId = -100;
    const TARGET: ChatId = -200;

    fn self_member(can_invite: bool, can_pin: bool) -> GroupMember {
        GroupMember {
            user_id: 999,
            is_self: true,
            is_bot: true,
            can_delete_messages: true,
            can_restrict_members: true,
            can_invite_users: can_invite,
            can_pin_messages: can_pin,
            ..GroupMember::default()
        }
    }

    fn human_admin(user_id: i64) -> GroupMember {
        GroupMember {
            user_id,
            can_delete_messages: true,
            can_restrict_members: true,
            ..GroupMember::default()
        }
    }

    #[tokio::test]
    async fn test_minute_tick_expires_stale_tips() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, api) = mock_context(dir.path());

        let mut config = GroupConfig::new(GROUP, 1);
        config.clean = true;
        ctx.groups.write().await.insert(config);

        {
            let mut messages = ctx.state.messages.lock().await;
            let slots = messages.slots_mut(GROUP);
            slots.keyword.record(11, 1); // long expired
            slots.welcome.record(12, now_unix()); // fresh
        }

        assert!(minute_tick(&ctx).await);

        assert_eq!(*api.deleted.lock().unwrap(), vec![(GROUP, 11)]);
        let messages = ctx.state.messages.lock().await;
        assert!(messages.slots[&GROUP].keyword.is_vacant());
        assert_eq!(messages.slots[&GROUP].welcome.message_id, 12);
    }

    #[tokio::test]
    async fn test_minute_tick_triggers_detached_link_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, api) = mock_context(dir.path());

        let mut config = GroupConfig::new(GROUP, 1);
        config.channel = Some(ChatRef {
            id: TARGET,
            access_hash: 2,
        });
        ctx.groups.write().await.insert(config);

        assert!(minute_tick(&ctx).await);

        // The refresh runs detached; poll for its effect
        let mut posted = false;
        for _ in 0..100 {
            if !api.sent_to(TARGET).is_empty() {
                posted = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(posted);
    }

    #[tokio::test]
    async fn test_resend_links_completes_when_link_is_revoked() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, api) = mock_context(dir.path());

        let mut config = GroupConfig::new(GROUP, 1);
        config.resend = true;
        config.channel = Some(ChatRef {
            id: TARGET,
            access_hash: 2,
        });
        ctx.groups.write().await.insert(config);
        api.set_link_outcome(GROUP, crate::telegram::LinkOutcome::Revoked);

        {
            let mut channels = ctx.state.channels.lock().await;
            channels.state_mut(GROUP).slot.record(55, 1);
        }

        // The revoked path writes to the group directory while the
        // resend loop reads it; the job must still run to completion
        let done = tokio::time::timeout(Duration::from_secs(2), resend_links(&ctx)).await;
        assert!(done.unwrap());

        assert!(ctx.groups.read().await.get(GROUP).unwrap().channel.is_none());
        assert_eq!(*api.deleted.lock().unwrap(), vec![(TARGET, 55)]);
    }

    #[tokio::test]
    async fn test_request_word_removal_publishes_to_collector() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, api) = mock_context(dir.path());

        assert!(request_word_removal(&ctx, "bad", "spam").await);

        let sent = api.sent_to(PRIMARY);
        assert_eq!(sent.len(), 1);
        assert!(sent[0].text.contains("REGEX"));
        assert!(sent[0].text.contains("\"action\": \"regex\""));
        assert!(sent[0].text.contains("\"type\": \"remove\""));
        assert!(sent[0].text.contains("\"word\": \"spam\""));
    }

    #[tokio::test]
    async fn test_refresh_admins_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, api) = mock_context(dir.path());

        api.set_members(GROUP, vec![self_member(true, true), human_admin(1), human_admin(2)]);
        {
            let mut admins = ctx.state.admins.lock().await;
            admins.admins.insert(GROUP, HashSet::new());
        }

        assert!(refresh_admins(&ctx).await);
        let first = {
            let admins = ctx.state.admins.lock().await;
            (admins.admins[&GROUP].clone(), admins.trusted[&GROUP].clone())
        };

        assert!(refresh_admins(&ctx).await);
        let second = {
            let admins = ctx.state.admins.lock().await;
            (admins.admins[&GROUP].clone(), admins.trusted[&GROUP].clone())
        };

        assert_eq!(first, second);
        assert_eq!(first.0, [1, 2].into_iter().collect());
        // Nothing was published: permissions are sufficient
        assert!(api.sent_to(PRIMARY).is_empty());
        assert!(api.left.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_admins_reports_lacking_permissions_once() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, api) = mock_context(dir.path());

        // Self cannot pin: permissions are insufficient
        api.set_members(GROUP, vec![self_member(true, false), human_admin(1)]);
        {
            let mut admins = ctx.state.admins.lock().await;
            admins.admins.insert(GROUP, HashSet::new());
        }

        assert!(refresh_admins(&ctx).await);
        assert!(ctx.state.admins.lock().await.lacking.contains(&GROUP));

        let requests = api.sent_to(PRIMARY);
        assert_eq!(requests.len(), 1);
        assert!(requests[0].text.contains("\"action\": \"leave\""));
        assert!(requests[0].text.contains("\"type\": \"request\""));
        // The bot does not leave on its own
        assert!(api.left.lock().unwrap().is_empty());

        // A second run with unchanged membership stays quiet
        assert!(refresh_admins(&ctx).await);
        assert_eq!(api.sent_to(PRIMARY).len(), 1);
    }

    #[tokio::test]
    async fn test_refresh_admins_clears_lacking_mark_when_restored() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, api) = mock_context(dir.path());

        api.set_members(GROUP, vec![self_member(true, true)]);
        {
            let mut admins = ctx.state.admins.lock().await;
            admins.admins.insert(GROUP, HashSet::new());
            admins.lacking.insert(GROUP);
        }

        assert!(refresh_admins(&ctx).await);
        assert!(!ctx.state.admins.lock().await.lacking.contains(&GROUP));
    }

    #[tokio::test]
    async fn test_refresh_admins_leaves_when_removed() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, api) = mock_context(dir.path());

        // The bot is not among the members anymore
        api.set_members(GROUP, vec![human_admin(1)]);
        {
            let mut admins = ctx.state.admins.lock().await;
            admins.admins.insert(GROUP, HashSet::new());
        }

        assert!(refresh_admins(&ctx).await);

        assert_eq!(*api.left.lock().unwrap(), vec![GROUP]);
        let notices = api.sent_to(PRIMARY);
        assert_eq!(notices.len(), 1);
        assert!(notices[0].text.contains("\"type\": \"info\""));
        assert!(!ctx.state.admins.lock().await.admins.contains_key(&GROUP));
    }

    #[tokio::test]
    async fn test_flush_regex_counters_publishes_and_zeroes() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, api) = mock_context(dir.path());

        {
            let mut regex = ctx.state.regex.lock().await;
            regex.bump("bad", "spam");
            regex.bump("bad", "spam");
            regex.track("ban"); // empty category, not flushed
        }

        assert!(flush_regex_counters(&ctx).await);

        let sent = api.sent_to(PRIMARY);
        assert_eq!(sent.len(), 1);
        assert!(sent[0].document.is_some());
        assert!(sent[0].text.contains("bad_words"));

        let regex = ctx.state.regex.lock().await;
        assert!(regex.counters["bad"].is_empty());
    }

    #[tokio::test]
    async fn test_reset_monthly_clears_and_notifies() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, api) = mock_context(dir.path());

        {
            let mut messages = ctx.state.messages.lock().await;
            messages.bad_users.insert(1);
            messages.user_counters.insert(1, 10);
        }

        assert!(reset_monthly(&ctx).await);

        let messages = ctx.state.messages.lock().await;
        assert!(messages.bad_users.is_empty());
        assert!(messages.user_counters.is_empty());

        let debug = api.sent_to(super::super::testing::DEBUG);
        assert_eq!(debug.len(), 1);
        assert!(debug[0].text.contains("reset"));
    }

    #[tokio::test]
    async fn test_reset_and_regex_flush_do_not_block_each_other() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _api) = mock_context(dir.path());

        {
            let mut regex = ctx.state.regex.lock().await;
            regex.bump("bad", "spam");
        }

        // Different named locks: both jobs complete concurrently
        let reset_ctx = ctx.clone();
        let flush_ctx = ctx.clone();
        let (reset_done, flush_done) = tokio::join!(
            tokio::time::timeout(Duration::from_secs(2), reset_monthly(&reset_ctx)),
            tokio::time::timeout(Duration::from_secs(2), flush_regex_counters(&flush_ctx)),
        );
        assert!(reset_done.unwrap());
        assert!(flush_done.unwrap());
    }

    #[tokio::test]
    async fn test_backup_files_shares_persisted_slots() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, api) = mock_context(dir.path());

        {
            let mut messages = ctx.state.messages.lock().await;
            messages.slots_mut(GROUP).keyword.record(1, 1);
            ctx.state.persist_message_slots(&messages);
        }
        {
            let admins = ctx.state.admins.lock().await;
            ctx.state.persist_admins(&admins);
        }

        assert!(backup_files(&ctx, Duration::ZERO).await);

        let sent = api.sent_to(PRIMARY);
        // message_ids, admin_ids and trust_ids were written
        assert_eq!(sent.len(), 3);
        assert!(sent.iter().all(|m| m.document.is_some()));
        assert!(sent.iter().any(|m| m.text.contains("message_ids")));
    }

    #[tokio::test]
    async fn test_report_status() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, api) = mock_context(dir.path());

        assert!(report_status(&ctx, "start").await);

        let sent = api.sent_to(PRIMARY);
        assert!(sent[0].text.contains("\"type\": \"status\""));
        assert!(sent[0].text.contains("\"start\""));
    }

    #[test]
    fn test_rotate_logs() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("log");
        std::fs::write(&log_path, "old entries").unwrap();

        assert!(rotate_logs(&log_path));

        // Fresh empty log plus one dated archive
        assert_eq!(std::fs::read_to_string(&log_path).unwrap(), "");
        let archives: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().starts_with("log-"))
            .collect();
        assert_eq!(archives.len(), 1);
        assert_eq!(
            std::fs::read_to_string(archives[0].path()).unwrap(),
            "old entries"
        );
    }

    #[test]
    fn test_rotate_logs_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!rotate_logs(&dir.path().join("absent")));
    }
}
