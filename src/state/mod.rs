//! Shared mutable state behind named locks.
//!
//! Consistency across concurrent jobs and event handlers is achieved
//! purely through four named exclusive locks, one per disjoint resource
//! class: `message`, `admin`, `channel` and `regex`. Each lock owns its
//! registry outright, so acquisition yields the only path to the data
//! and release is guaranteed on every exit path by the guard going out
//! of scope. No operation acquires more than one named lock.

pub mod store;

mod registries;

pub use registries::{
    AdminRegistry, CategorySlots, ChannelRegistry, ChannelState, MessageRegistry, MessageSlot,
    RegexCounters, TipCategory, admin_set, trust_set,
};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::telegram::UserId;

/// Gets the current Unix timestamp in seconds.
#[must_use]
pub fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Persisted shape of the watch lists (`watch_ids` slot).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct WatchLists {
    ban: HashMap<UserId, u64>,
    delete: HashMap<UserId, u64>,
}

/// The four named locks and the registries they guard.
#[derive(Debug)]
pub struct SharedState {
    /// `message` lock: tip slots and monthly accumulation state.
    pub messages: Mutex<MessageRegistry>,

    /// `admin` lock: admin/trust sets and the lacking-permission set.
    pub admins: Mutex<AdminRegistry>,

    /// `channel` lock: invite-link state.
    pub channels: Mutex<ChannelRegistry>,

    /// `regex` lock: word occurrence counters.
    pub regex: Mutex<RegexCounters>,

    data_dir: PathBuf,
}

impl SharedState {
    /// Loads all registries from the data directory, starting empty
    /// where a slot is missing or corrupt.
    #[must_use]
    pub fn load(data_dir: &Path) -> Self {
        let watch: WatchLists = store::load(data_dir, "watch_ids");

        let messages = MessageRegistry {
            slots: store::load(data_dir, "message_ids"),
            bad_users: store::load(data_dir, "bad_ids"),
            left_groups: store::load(data_dir, "left_group_ids"),
            user_counters: store::load(data_dir, "user_ids"),
            watch_bans: watch.ban,
            watch_deletes: watch.delete,
        };

        let admins = AdminRegistry {
            admins: store::load(data_dir, "admin_ids"),
            trusted: store::load(data_dir, "trust_ids"),
            lacking: store::load(data_dir, "lack_group_ids"),
        };

        Self {
            messages: Mutex::new(messages),
            admins: Mutex::new(admins),
            channels: Mutex::new(store::load(data_dir, "channel_states")),
            regex: Mutex::new(store::load(data_dir, "regex_words")),
            data_dir: data_dir.to_path_buf(),
        }
    }

    /// Directory holding the persisted registry slots.
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Persists the tip message slots (caller holds the `message` lock).
    pub fn persist_message_slots(&self, registry: &MessageRegistry) {
        store::save(&self.data_dir, "message_ids", &registry.slots);
    }

    /// Persists the monthly accumulation slots (caller holds the
    /// `message` lock).
    pub fn persist_accumulated(&self, registry: &MessageRegistry) {
        store::save(&self.data_dir, "bad_ids", &registry.bad_users);
        store::save(&self.data_dir, "left_group_ids", &registry.left_groups);
        store::save(&self.data_dir, "user_ids", &registry.user_counters);
        store::save(
            &self.data_dir,
            "watch_ids",
            &WatchLists {
                ban: registry.watch_bans.clone(),
                delete: registry.watch_deletes.clone(),
            },
        );
    }

    /// Persists the admin/trust sets (caller holds the `admin` lock).
    pub fn persist_admins(&self, registry: &AdminRegistry) {
        store::save(&self.data_dir, "admin_ids", &registry.admins);
        store::save(&self.data_dir, "trust_ids", &registry.trusted);
    }

    /// Persists the lacking-permission set (caller holds the `admin`
    /// lock).
    pub fn persist_lacking(&self, registry: &AdminRegistry) {
        store::save(&self.data_dir, "lack_group_ids", &registry.lacking);
    }

    /// Persists the invite-link state (caller holds the `channel` lock).
    pub fn persist_channels(&self, registry: &ChannelRegistry) {
        store::save(&self.data_dir, "channel_states", registry);
    }

    /// Persists the regex counters (caller holds the `regex` lock).
    pub fn persist_regex(&self, registry: &RegexCounters) {
        store::save(&self.data_dir, "regex_words", registry);
    }
}
