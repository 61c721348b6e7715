//! FolderIdCache (spec §3).
//!
//! Mapping from relative folder path to the remote folder id that
//! represents it for the current restore. Built lazily; never removes
//! entries; concurrent readers allowed. The empty key maps to the
//! configured restore-parent id.

use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug)]
pub struct FolderIdCache {
    map: RwLock<HashMap<String, String>>,
}

impl FolderIdCache {
    pub fn new(restore_parent_id: impl Into<String>) -> Self {
        let mut map = HashMap::new();
        map.insert(String::new(), restore_parent_id.into());
        FolderIdCache {
            map: RwLock::new(map),
        }
    }

    pub fn get(&self, relative_path: &str) -> Option<String> {
        let key = normalize_key(relative_path);
        self.map.read().unwrap_or_else(|p| p.into_inner()).get(&key).cloned()
    }

    /// Inserts `folder_id` for `relative_path` if absent. Never overwrites
    /// an existing mapping (invariant #4 in spec §8: no two distinct
    /// relative paths share a newly-created folder id; a path that is
    /// already cached is reused, not recreated).
    pub fn insert_if_absent(&self, relative_path: &str, folder_id: impl Into<String>) {
        let key = normalize_key(relative_path);
        let mut guard = self.map.write().unwrap_or_else(|p| p.into_inner());
        guard.entry(key).or_insert_with(|| folder_id.into());
    }
}

fn normalize_key(relative_path: &str) -> String {
    relative_path.trim_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_key_is_restore_parent() {
        let cache = FolderIdCache::new("root-parent");
        assert_eq!(cache.get(""), Some("root-parent".to_string()));
    }

    #[test]
    fn test_insert_then_get() {
        let cache = FolderIdCache::new("root-parent");
        cache.insert_if_absent("docs", "folder-1");
        assert_eq!(cache.get("docs"), Some("folder-1".to_string()));
        assert_eq!(cache.get("/docs/"), Some("folder-1".to_string()));
    }

    #[test]
    fn test_insert_if_absent_never_overwrites() {
        let cache = FolderIdCache::new("root-parent");
        cache.insert_if_absent("docs", "folder-1");
        cache.insert_if_absent("docs", "folder-2");
        assert_eq!(cache.get("docs"), Some("folder-1".to_string()));
    }
}
