//! Per-group configuration directory.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{ChatRef, ConfigError};
use crate::telegram::ChatId;

/// Configuration of a single managed group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupConfig {
    /// Group identifier.
    pub group_id: ChatId,

    /// MTProto access hash for the group.
    #[serde(default)]
    pub access_hash: i64,

    /// Whether expired tip messages are cleaned up by the minute job.
    #[serde(default)]
    pub clean: bool,

    /// Whether the invite link message is resent rather than edited.
    #[serde(default)]
    pub resend: bool,

    /// Target channel for invite-link tip messages, if enabled.
    #[serde(default)]
    pub channel: Option<ChatRef>,

    /// Body of the invite-link tip message.
    #[serde(default = "default_channel_text")]
    pub channel_text: String,

    /// Label of the invite-link button.
    #[serde(default = "default_channel_button")]
    pub channel_button: String,
}

fn default_channel_text() -> String {
    "Join the discussion group:".to_owned()
}

fn default_channel_button() -> String {
    "Join".to_owned()
}

impl GroupConfig {
    /// Creates a bare config for a newly managed group.
    #[must_use]
    pub fn new(group_id: ChatId, access_hash: i64) -> Self {
        Self {
            group_id,
            access_hash,
            clean: false,
            resend: false,
            channel: None,
            channel_text: default_channel_text(),
            channel_button: default_channel_button(),
        }
    }

    /// Addressable reference to the group itself.
    #[must_use]
    pub const fn to_ref(&self) -> ChatRef {
        ChatRef {
            id: self.group_id,
            access_hash: self.access_hash,
        }
    }
}

/// All per-group configurations, persisted as the `configs` slot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupDirectory {
    groups: HashMap<ChatId, GroupConfig>,
}

impl GroupDirectory {
    /// Loads the directory from `<data_dir>/configs.json`, falling back
    /// to an empty directory if the file is missing or corrupt.
    #[must_use]
    pub fn load(data_dir: &Path) -> Self {
        std::fs::read_to_string(data_dir.join("configs.json"))
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    /// Writes the directory to `<data_dir>/configs.json`.
    ///
    /// Persist failures are logged, not propagated; registry state in
    /// memory stays authoritative until the next successful write.
    pub fn persist(&self, data_dir: &Path) {
        match serde_json::to_string_pretty(self) {
            Ok(json) => {
                if let Err(e) = std::fs::write(data_dir.join("configs.json"), json) {
                    warn!("Failed to persist group configs: {}", e);
                }
            }
            Err(e) => warn!("Failed to serialize group configs: {}", e),
        }
    }

    /// Saves the directory, returning any error (used at setup time).
    pub fn save(&self, data_dir: &Path) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(data_dir.join("configs.json"), json)?;
        Ok(())
    }

    /// Looks up a group's configuration.
    #[must_use]
    pub fn get(&self, group_id: ChatId) -> Option<&GroupConfig> {
        self.groups.get(&group_id)
    }

    /// Mutable lookup.
    pub fn get_mut(&mut self, group_id: ChatId) -> Option<&mut GroupConfig> {
        self.groups.get_mut(&group_id)
    }

    /// Inserts or replaces a group's configuration.
    pub fn insert(&mut self, config: GroupConfig) {
        self.groups.insert(config.group_id, config);
    }

    /// Removes a group's configuration.
    pub fn remove(&mut self, group_id: ChatId) -> Option<GroupConfig> {
        self.groups.remove(&group_id)
    }

    /// Iterates over all configured groups.
    pub fn iter(&self) -> impl Iterator<Item = &GroupConfig> {
        self.groups.values()
    }

    /// Groups with tip cleanup enabled.
    #[must_use]
    pub fn clean_enabled(&self) -> Vec<ChatId> {
        self.groups
            .values()
            .filter(|g| g.clean)
            .map(|g| g.group_id)
            .collect()
    }

    /// Groups with invite-link tipping enabled.
    #[must_use]
    pub fn channel_enabled(&self) -> Vec<ChatId> {
        self.groups
            .values()
            .filter(|g| g.channel.is_some())
            .map(|g| g.group_id)
            .collect()
    }

    /// Groups with invite-link resending enabled.
    #[must_use]
    pub fn resend_enabled(&self) -> Vec<ChatId> {
        self.groups
            .values()
            .filter(|g| g.resend && g.channel.is_some())
            .map(|g| g.group_id)
            .collect()
    }

    /// Number of configured groups.
    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Whether no groups are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_enabled_filters() {
        let mut directory = GroupDirectory::default();
        let mut with_channel = GroupConfig::new(-100, 1);
        with_channel.channel = Some(ChatRef {
            id: -200,
            access_hash: 2,
        });
        directory.insert(with_channel);
        directory.insert(GroupConfig::new(-101, 3));

        assert_eq!(directory.channel_enabled(), vec![-100]);
        assert!(directory.clean_enabled().is_empty());
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let directory = GroupDirectory::load(dir.path());
        assert!(directory.is_empty());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut directory = GroupDirectory::default();
        let mut config = GroupConfig::new(-100, 7);
        config.clean = true;
        directory.insert(config);
        directory.save(dir.path()).unwrap();

        let loaded = GroupDirectory::load(dir.path());
        assert_eq!(loaded.len(), 1);
        assert!(loaded.get(-100).unwrap().clean);
    }
}
