//! Shared per-group registries.
//!
//! Each registry is a plain owned data structure; mutual exclusion is
//! provided by the named locks in [`crate::state::SharedState`]. Every
//! mutator persists the touched slots while still holding the lock, so
//! the on-disk state always reflects a serialized history.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::BotSettings;
use crate::telegram::{ChatId, GroupMember, MessageId, UserId};

/// A class of rotating tip message posted per group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TipCategory {
    /// Keyword auto-replies.
    Keyword,
    /// Off-topic notices.
    Ot,
    /// RM notices.
    Rm,
    /// Welcome messages.
    Welcome,
    /// Invite-link messages (slot owned by the channel registry).
    Channel,
}

impl TipCategory {
    /// Categories whose stale messages the minute job expires.
    pub const EXPIRABLE: [Self; 4] = [Self::Keyword, Self::Ot, Self::Rm, Self::Welcome];

    /// Wire/debug name of the category.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Keyword => "keyword",
            Self::Ot => "ot",
            Self::Rm => "rm",
            Self::Welcome => "welcome",
            Self::Channel => "channel",
        }
    }

    /// Configured expiry duration for this category in seconds.
    #[must_use]
    pub const fn expiry_secs(self, settings: &BotSettings) -> u64 {
        match self {
            Self::Keyword => settings.time_keyword,
            Self::Ot => settings.time_ot,
            Self::Rm => settings.time_rm,
            Self::Welcome => settings.time_welcome,
            Self::Channel => settings.time_channel,
        }
    }
}

/// The most recently posted message of one tip category.
///
/// A vacant slot is all zeroes, matching the wire convention of the
/// sibling bots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSlot {
    /// Message identifier, `0` when vacant.
    pub message_id: MessageId,
    /// Unix timestamp of the post, `0` when vacant.
    pub posted_at: u64,
}

impl MessageSlot {
    /// Whether no message currently occupies the slot.
    #[must_use]
    pub const fn is_vacant(&self) -> bool {
        self.message_id == 0
    }

    /// Records a freshly posted message.
    pub const fn record(&mut self, message_id: MessageId, now: u64) {
        self.message_id = message_id;
        self.posted_at = now;
    }

    /// Empties the slot.
    pub const fn clear(&mut self) {
        self.message_id = 0;
        self.posted_at = 0;
    }

    /// Whether the held message has outlived `expiry_secs`.
    #[must_use]
    pub const fn is_expired(&self, now: u64, expiry_secs: u64) -> bool {
        !self.is_vacant() && now.saturating_sub(self.posted_at) > expiry_secs
    }
}

/// Slots for the expirable tip categories of one group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategorySlots {
    pub keyword: MessageSlot,
    pub ot: MessageSlot,
    pub rm: MessageSlot,
    pub welcome: MessageSlot,
}

impl CategorySlots {
    /// Slot for a category; `None` for [`TipCategory::Channel`], whose
    /// slot lives with the invite-link state.
    #[must_use]
    pub const fn get(&self, category: TipCategory) -> Option<&MessageSlot> {
        match category {
            TipCategory::Keyword => Some(&self.keyword),
            TipCategory::Ot => Some(&self.ot),
            TipCategory::Rm => Some(&self.rm),
            TipCategory::Welcome => Some(&self.welcome),
            TipCategory::Channel => None,
        }
    }

    /// Mutable slot lookup, same shape as [`Self::get`].
    pub const fn get_mut(&mut self, category: TipCategory) -> Option<&mut MessageSlot> {
        match category {
            TipCategory::Keyword => Some(&mut self.keyword),
            TipCategory::Ot => Some(&mut self.ot),
            TipCategory::Rm => Some(&mut self.rm),
            TipCategory::Welcome => Some(&mut self.welcome),
            TipCategory::Channel => None,
        }
    }
}

/// State guarded by the `message` lock: tip message slots plus the
/// accumulation registries cleared by the monthly reset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageRegistry {
    /// Per-group tip message slots.
    pub slots: HashMap<ChatId, CategorySlots>,

    /// Users flagged as bad this month.
    pub bad_users: HashSet<UserId>,

    /// Groups left this month.
    pub left_groups: HashSet<ChatId>,

    /// Per-user activity counters.
    pub user_counters: HashMap<UserId, u64>,

    /// Watch list: user id to ban-watch expiry timestamp.
    pub watch_bans: HashMap<UserId, u64>,

    /// Watch list: user id to delete-watch expiry timestamp.
    pub watch_deletes: HashMap<UserId, u64>,
}

impl MessageRegistry {
    /// Slots for a group, created vacant on first touch.
    pub fn slots_mut(&mut self, group_id: ChatId) -> &mut CategorySlots {
        self.slots.entry(group_id).or_default()
    }

    /// Clears expired slots and returns the messages to delete.
    #[must_use]
    pub fn expire_stale(
        &mut self,
        groups: &[ChatId],
        now: u64,
        settings: &BotSettings,
    ) -> Vec<(ChatId, MessageId)> {
        let mut stale = Vec::new();

        for gid in groups {
            let Some(slots) = self.slots.get_mut(gid) else {
                continue;
            };

            for category in TipCategory::EXPIRABLE {
                let Some(slot) = slots.get_mut(category) else {
                    continue;
                };

                if slot.is_expired(now, category.expiry_secs(settings)) {
                    debug!("Expiring stale {} tip in {}", category.as_str(), gid);
                    stale.push((*gid, slot.message_id));
                    slot.clear();
                }
            }
        }

        stale
    }

    /// Clears the accumulation registries (monthly cadence).
    pub fn reset_accumulated(&mut self) {
        self.bad_users.clear();
        self.left_groups.clear();
        self.user_counters.clear();
        self.watch_bans.clear();
        self.watch_deletes.clear();
    }
}

/// Invite-link state of one group.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelState {
    /// Current invite link, if any.
    pub link: Option<String>,

    /// Unix timestamp of the last rotation.
    pub rotated_at: u64,

    /// Slot of the posted invite-link message.
    pub slot: MessageSlot,
}

impl ChannelState {
    /// Drops the cached link and message slot (revoked-link path).
    pub fn clear(&mut self) {
        self.link = None;
        self.rotated_at = 0;
        self.slot.clear();
    }
}

/// State guarded by the `channel` lock.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelRegistry {
    /// Per-group invite-link state.
    pub states: HashMap<ChatId, ChannelState>,
}

impl ChannelRegistry {
    /// State for a group, created empty on first touch.
    pub fn state_mut(&mut self, group_id: ChatId) -> &mut ChannelState {
        self.states.entry(group_id).or_default()
    }
}

/// State guarded by the `admin` lock.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdminRegistry {
    /// Per-group administrator sets.
    pub admins: HashMap<ChatId, HashSet<UserId>>,

    /// Per-group trusted-user sets.
    pub trusted: HashMap<ChatId, HashSet<UserId>>,

    /// Groups where the bot lacks required permissions.
    pub lacking: HashSet<ChatId>,
}

impl AdminRegistry {
    /// Groups currently under management.
    #[must_use]
    pub fn groups(&self) -> Vec<ChatId> {
        self.admins.keys().copied().collect()
    }

    /// Forgets a group entirely (after leaving it).
    pub fn remove_group(&mut self, group_id: ChatId) {
        self.admins.remove(&group_id);
        self.trusted.remove(&group_id);
        self.lacking.remove(&group_id);
    }
}

/// Administrators recognized by the bot: members with delete+restrict
/// capability, the creator, or allowlisted sibling bots.
#[must_use]
pub fn admin_set(members: &[GroupMember], allowlist: &HashSet<UserId>) -> HashSet<UserId> {
    members
        .iter()
        .filter(|m| {
            (!m.is_bot && !m.is_deleted && m.can_delete_messages && m.can_restrict_members)
                || m.is_creator
                || allowlist.contains(&m.user_id)
        })
        .map(|m| m.user_id)
        .collect()
}

/// Trusted accounts: any non-bot, non-deleted member, or an allowlisted
/// sibling bot.
#[must_use]
pub fn trust_set(members: &[GroupMember], allowlist: &HashSet<UserId>) -> HashSet<UserId> {
    members
        .iter()
        .filter(|m| (!m.is_bot && !m.is_deleted) || allowlist.contains(&m.user_id))
        .map(|m| m.user_id)
        .collect()
}

/// State guarded by the `regex` lock: word occurrence counters keyed by
/// word category, flushed and zeroed periodically.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegexCounters {
    /// Category name to word-count table.
    pub counters: HashMap<String, HashMap<String, u64>>,
}

impl RegexCounters {
    /// Registers a tracked word category.
    pub fn track(&mut self, category: &str) {
        self.counters.entry(category.to_owned()).or_default();
    }

    /// Increments a word's count within a category.
    pub fn bump(&mut self, category: &str, word: &str) {
        *self
            .counters
            .entry(category.to_owned())
            .or_default()
            .entry(word.to_owned())
            .or_insert(0) += 1;
    }

    /// Tracked category names, sorted for a stable flush order.
    #[must_use]
    pub fn categories(&self) -> Vec<String> {
        let mut names: Vec<String> = self.counters.keys().cloned().collect();
        names.sort();
        names
    }

    /// Takes a category's counter table, leaving it zeroed.
    ///
    /// Returns `None` if the category has no counts to flush.
    pub fn take(&mut self, category: &str) -> Option<HashMap<String, u64>> {
        let table = self.counters.get_mut(category)?;
        if table.is_empty() {
            return None;
        }
        Some(std::mem::take(table))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(user_id: UserId) -> GroupMember {
        GroupMember {
            user_id,
            ..GroupMember::default()
        }
    }

    #[test]
    fn test_slot_expiry() {
        let mut slot = MessageSlot::default();
        assert!(!slot.is_expired(1000, 60));

        slot.record(42, 100);
        assert!(!slot.is_expired(150, 60));
        assert!(slot.is_expired(161, 60));

        slot.clear();
        assert!(slot.is_vacant());
        assert!(!slot.is_expired(10_000, 60));
    }

    #[test]
    fn test_channel_category_has_no_message_slot() {
        let mut slots = CategorySlots::default();
        assert!(slots.get(TipCategory::Channel).is_none());
        assert!(slots.get_mut(TipCategory::Channel).is_none());
        assert!(slots.get(TipCategory::Keyword).is_some());
    }

    #[test]
    fn test_expire_stale_clears_and_reports() {
        let mut registry = MessageRegistry::default();
        let slots = registry.slots_mut(-100);
        slots.keyword.record(1, 100);
        slots.welcome.record(2, 100);

        let settings: BotSettings = serde_json::from_value(serde_json::json!({
            "exchange_channel": { "id": -1, "access_hash": 0 },
            "hide_channel": { "id": -2, "access_hash": 0 },
            "debug_channel": { "id": -3, "access_hash": 0 },
            "critical_channel": { "id": -4, "access_hash": 0 },
            "exchange_key": "00".repeat(32),
        }))
        .unwrap();

        // keyword expires after 60s, welcome after 120s
        let stale = registry.expire_stale(&[-100], 200, &settings);
        assert_eq!(stale, vec![(-100, 1)]);
        assert!(registry.slots[&-100].keyword.is_vacant());
        assert!(!registry.slots[&-100].welcome.is_vacant());
    }

    #[test]
    fn test_admin_and_trust_sets() {
        let mut creator = member(1);
        creator.is_creator = true;

        let mut full_admin = member(2);
        full_admin.can_delete_messages = true;
        full_admin.can_restrict_members = true;

        let mut weak_admin = member(3);
        weak_admin.can_delete_messages = true;

        let mut sibling_bot = member(4);
        sibling_bot.is_bot = true;

        let mut stranger_bot = member(5);
        stranger_bot.is_bot = true;

        let members = vec![creator, full_admin, weak_admin, sibling_bot, stranger_bot];
        let allowlist: HashSet<UserId> = [4].into_iter().collect();

        let admins = admin_set(&members, &allowlist);
        assert_eq!(admins, [1, 2, 4].into_iter().collect());

        let trusted = trust_set(&members, &allowlist);
        assert_eq!(trusted, [1, 2, 3, 4].into_iter().collect());
    }

    #[test]
    fn test_regex_take_zeroes() {
        let mut counters = RegexCounters::default();
        counters.bump("bad", "spam");
        counters.bump("bad", "spam");

        let taken = counters.take("bad").unwrap();
        assert_eq!(taken["spam"], 2);

        // Zeroed after the flush
        assert!(counters.take("bad").is_none());
    }

    #[test]
    fn test_reset_accumulated() {
        let mut registry = MessageRegistry::default();
        registry.bad_users.insert(1);
        registry.left_groups.insert(-100);
        registry.user_counters.insert(1, 5);
        registry.watch_bans.insert(2, 999);
        registry.slots_mut(-100).keyword.record(7, 1);

        registry.reset_accumulated();

        assert!(registry.bad_users.is_empty());
        assert!(registry.left_groups.is_empty());
        assert!(registry.user_counters.is_empty());
        assert!(registry.watch_bans.is_empty());
        // Message slots are not part of the monthly reset
        assert!(!registry.slots[&-100].keyword.is_vacant());
    }
}
