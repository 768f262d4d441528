//! JSON persistence for the named registry slots.
//!
//! Every registry slot is written as pretty JSON under the data
//! directory after each mutation under lock. Loads fall back to the
//! default value when a file is missing or corrupt, so a fresh deploy
//! starts from empty registries.

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

/// Every persisted registry slot, in backup order.
pub const FILE_LIST: [&str; 11] = [
    "admin_ids",
    "bad_ids",
    "channel_states",
    "configs",
    "lack_group_ids",
    "left_group_ids",
    "message_ids",
    "regex_words",
    "trust_ids",
    "user_ids",
    "watch_ids",
];

/// Path of a named slot under the data directory.
#[must_use]
pub fn slot_path(data_dir: &Path, name: &str) -> PathBuf {
    data_dir.join(format!("{name}.json"))
}

/// Writes a slot as pretty JSON.
///
/// Persist failures are logged and swallowed; the in-memory registry
/// stays authoritative until the next successful write.
pub fn save<T: Serialize>(data_dir: &Path, name: &str, value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => {
            if let Err(e) = std::fs::write(slot_path(data_dir, name), json) {
                warn!("Failed to persist slot {}: {}", name, e);
            }
        }
        Err(e) => warn!("Failed to serialize slot {}: {}", name, e),
    }
}

/// Reads a slot, falling back to the default on any failure.
#[must_use]
pub fn load<T: DeserializeOwned + Default>(data_dir: &Path, name: &str) -> T {
    std::fs::read_to_string(slot_path(data_dir, name))
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}

/// Writes a value to a fresh transient file under the tmp directory.
///
/// Used to stage regex counter snapshots and similar data payloads for
/// publishing. Returns `None` when staging fails.
pub async fn data_to_file<T: Serialize>(tmp_dir: &Path, value: &T) -> Option<PathBuf> {
    let path = tmp_dir.join(format!("{:016x}", rand::random::<u64>()));

    let json = match serde_json::to_vec_pretty(value) {
        Ok(json) => json,
        Err(e) => {
            warn!("Failed to serialize data payload: {}", e);
            return None;
        }
    };

    match tokio::fs::write(&path, json).await {
        Ok(()) => Some(path),
        Err(e) => {
            warn!("Failed to stage data payload: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut value: HashMap<String, u64> = HashMap::new();
        value.insert("spam".to_owned(), 3);

        save(dir.path(), "regex_words", &value);
        let loaded: HashMap<String, u64> = load(dir.path(), "regex_words");
        assert_eq!(loaded, value);
    }

    #[test]
    fn test_load_missing_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let loaded: HashMap<String, u64> = load(dir.path(), "absent");
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_load_corrupt_is_default() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(slot_path(dir.path(), "broken"), "{not json").unwrap();
        let loaded: HashMap<String, u64> = load(dir.path(), "broken");
        assert!(loaded.is_empty());
    }

    #[tokio::test]
    async fn test_data_to_file_stages_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = data_to_file(dir.path(), &serde_json::json!({ "spam": 3 }))
            .await
            .unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(content.contains("\"spam\": 3"));
    }
}
