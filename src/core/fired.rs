//! Persistent record of which trigger keys have already produced a
//! notification, scoped per observing user.
//!
//! Stored as one JSON map (key -> fired-at millis) per user in the data
//! directory. Durability contract: callers mark a key only after the
//! corresponding notification has been appended, so a crash in between
//! costs at most one duplicate on the next cycle.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;

use super::model::{EpochMillis, UserId};

pub struct FiredStore {
    /// Directory holding the per-user fired-key files.
    data_dir: PathBuf,
    /// Cached maps by user id.
    cache: HashMap<UserId, HashMap<String, EpochMillis>>,
}

impl FiredStore {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            cache: HashMap::new(),
        }
    }

    fn fired_path(&self, user_id: &str) -> PathBuf {
        self.data_dir.join(format!("fired_{}.json", user_id))
    }

    /// Load a user's fired keys from disk into the cache.
    fn load(&mut self, user_id: &UserId) -> &mut HashMap<String, EpochMillis> {
        if !self.cache.contains_key(user_id) {
            let path = self.fired_path(user_id);
            let keys = if path.exists() {
                fs::read_to_string(&path)
                    .ok()
                    .and_then(|content| serde_json::from_str(&content).ok())
                    .unwrap_or_default()
            } else {
                HashMap::new()
            };
            self.cache.insert(user_id.clone(), keys);
        }
        self.cache.get_mut(user_id).unwrap()
    }

    /// Whether this exact event has already produced a notification for
    /// this user.
    pub fn has_fired(&mut self, user_id: &UserId, key: &str) -> bool {
        self.load(user_id).contains_key(key)
    }

    /// Record that a notification for this key has been appended.
    /// Persists immediately.
    pub fn mark_fired(&mut self, user_id: &UserId, key: &str, now: EpochMillis) -> io::Result<()> {
        self.load(user_id).insert(key.to_string(), now);
        self.save(user_id)
    }

    /// Drop all keys with the given prefix, bounding growth once an
    /// obligation is resolved. Saves only if something was removed.
    pub fn prune_prefix(&mut self, user_id: &UserId, prefix: &str) -> io::Result<()> {
        let keys = self.load(user_id);
        let before = keys.len();
        keys.retain(|key, _| !key.starts_with(prefix));
        if keys.len() != before {
            self.save(user_id)?;
        }
        Ok(())
    }

    /// Number of fired keys currently recorded for a user.
    pub fn len(&mut self, user_id: &UserId) -> usize {
        self.load(user_id).len()
    }

    pub fn is_empty(&mut self, user_id: &UserId) -> bool {
        self.len(user_id) == 0
    }

    fn save(&mut self, user_id: &UserId) -> io::Result<()> {
        let keys = match self.cache.get(user_id) {
            Some(keys) => keys,
            None => return Ok(()), // Nothing to save
        };
        fs::create_dir_all(&self.data_dir)?;
        let content = serde_json::to_string_pretty(keys)?;
        fs::write(self.fired_path(user_id), content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_mark_and_check() {
        let dir = tempdir().unwrap();
        let mut store = FiredStore::new(dir.path().to_path_buf());
        let user = "alice".to_string();

        assert!(!store.has_fired(&user, "task:t-1:dueSoon:100"));
        store.mark_fired(&user, "task:t-1:dueSoon:100", 50).unwrap();
        assert!(store.has_fired(&user, "task:t-1:dueSoon:100"));
    }

    #[test]
    fn test_survives_reload() {
        let dir = tempdir().unwrap();
        let user = "alice".to_string();

        {
            let mut store = FiredStore::new(dir.path().to_path_buf());
            store.mark_fired(&user, "task:t-1:overdue:100", 50).unwrap();
        }

        // A fresh store (new device, new session) still knows the key.
        let mut store = FiredStore::new(dir.path().to_path_buf());
        assert!(store.has_fired(&user, "task:t-1:overdue:100"));
    }

    #[test]
    fn test_users_are_isolated() {
        let dir = tempdir().unwrap();
        let mut store = FiredStore::new(dir.path().to_path_buf());
        let alice = "alice".to_string();
        let bob = "bob".to_string();

        store.mark_fired(&alice, "task:t-1:dueSoon:100", 50).unwrap();
        assert!(store.has_fired(&alice, "task:t-1:dueSoon:100"));
        assert!(!store.has_fired(&bob, "task:t-1:dueSoon:100"));
    }

    #[test]
    fn test_prune_prefix() {
        let dir = tempdir().unwrap();
        let mut store = FiredStore::new(dir.path().to_path_buf());
        let user = "alice".to_string();

        store.mark_fired(&user, "task:t-1:dueSoon:100", 50).unwrap();
        store.mark_fired(&user, "task:t-1:overdue:100", 60).unwrap();
        store.mark_fired(&user, "task:t-2:dueSoon:200", 70).unwrap();

        store.prune_prefix(&user, "task:t-1:").unwrap();
        assert_eq!(store.len(&user), 1);
        assert!(store.has_fired(&user, "task:t-2:dueSoon:200"));

        // Pruning persists across reload.
        let mut store = FiredStore::new(dir.path().to_path_buf());
        assert!(!store.has_fired(&user, "task:t-1:dueSoon:100"));
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("fired_alice.json"), "not json").unwrap();

        let mut store = FiredStore::new(dir.path().to_path_buf());
        let user = "alice".to_string();
        assert!(store.is_empty(&user));
    }
}
