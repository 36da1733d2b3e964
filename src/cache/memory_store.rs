use super::{account_key, CacheError, CacheStore};
use crate::types::ActivityRecord;
use std::collections::HashMap;
use std::sync::Mutex;

/// Process-local cache store, used in tests and when persistence is disabled
#[derive(Default)]
pub struct MemoryCacheStore {
    entries: Mutex<HashMap<String, Vec<ActivityRecord>>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Vec<ActivityRecord>>>, CacheError> {
        self.entries
            .lock()
            .map_err(|_| CacheError::LockPoisoned("memory"))
    }
}

impl CacheStore for MemoryCacheStore {
    fn load(&self, account: &str) -> Result<Vec<ActivityRecord>, CacheError> {
        Ok(self.entries()?.get(&account_key(account)).cloned().unwrap_or_default())
    }

    fn save(&self, account: &str, records: &[ActivityRecord]) -> Result<(), CacheError> {
        self.entries()?.insert(account_key(account), records.to_vec());
        Ok(())
    }

    fn clear(&self, account: &str) -> Result<(), CacheError> {
        self.entries()?.remove(&account_key(account));
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::test_support::create_test_record;

    #[test]
    fn test_save_overwrites_whole_list() {
        let store = MemoryCacheStore::new();
        store
            .save("0xA", &[create_test_record("a", 1), create_test_record("b", 2)])
            .unwrap();
        store.save("0xa", &[create_test_record("c", 3)]).unwrap();

        let loaded = store.load("0xA").unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "c");
    }

    #[test]
    fn test_clear() {
        let store = MemoryCacheStore::new();
        store.save("0xa", &[create_test_record("a", 1)]).unwrap();
        store.clear("0xa").unwrap();
        assert!(store.load("0xa").unwrap().is_empty());
    }
}
