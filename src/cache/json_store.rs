use super::{account_key, CacheError, CacheStore};
use crate::types::ActivityRecord;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Snapshot of one account's activity list as written to disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSnapshot {
    pub account: String,
    pub records: Vec<ActivityRecord>,
    pub saved_at: i64,
}

/// One JSON file per account inside a cache directory.
///
/// Writes go to a temporary file first and are renamed into place so a
/// crash mid-write never leaves a truncated snapshot behind.
pub struct JsonFileCacheStore {
    dir: PathBuf,
}

impl JsonFileCacheStore {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, CacheError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn file_path(&self, account: &str) -> PathBuf {
        let key: String = account_key(account)
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        self.dir.join(format!("activity_{}.json", key))
    }
}

impl CacheStore for JsonFileCacheStore {
    fn load(&self, account: &str) -> Result<Vec<ActivityRecord>, CacheError> {
        let path = self.file_path(account);
        if !path.exists() {
            log::debug!("No cached activity for {}", account);
            return Ok(Vec::new());
        }

        let json = fs::read_to_string(&path)?;
        let snapshot: CacheSnapshot = serde_json::from_str(&json)?;

        log::debug!("Loaded {} activity records from {}", snapshot.records.len(), path.display());
        Ok(snapshot.records)
    }

    fn save(&self, account: &str, records: &[ActivityRecord]) -> Result<(), CacheError> {
        let snapshot = CacheSnapshot {
            account: account_key(account),
            records: records.to_vec(),
            saved_at: crate::types::current_timestamp(),
        };

        let path = self.file_path(account);
        let tmp_path = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(&snapshot)?;
        fs::write(&tmp_path, json)?;
        fs::rename(&tmp_path, &path)?;

        log::debug!("Saved {} activity records to {}", records.len(), path.display());
        Ok(())
    }

    fn clear(&self, account: &str) -> Result<(), CacheError> {
        let path = self.file_path(account);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "json"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::test_support::create_test_record;
    use tempfile::TempDir;

    #[test]
    fn test_load_missing_account_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileCacheStore::new(dir.path()).unwrap();
        assert!(store.load("0xnobody").unwrap().is_empty());
    }

    #[test]
    fn test_round_trip_is_fixed_point() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileCacheStore::new(dir.path()).unwrap();
        let records = vec![create_test_record("b", 20), create_test_record("a", 10)];

        store.save("0xAcct", &records).unwrap();
        let loaded = store.load("0xacct").unwrap();
        store.save("0xacct", &loaded).unwrap();
        let reloaded = store.load("0xACCT").unwrap();

        assert_eq!(loaded, records);
        assert_eq!(reloaded, records);
    }

    #[test]
    fn test_amount_encoded_as_integer_string() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileCacheStore::new(dir.path()).unwrap();
        store.save("0xacct", &[create_test_record("a", 1)]).unwrap();

        let raw = fs::read_to_string(store.file_path("0xacct")).unwrap();
        assert!(raw.contains("\"123456789000000000000\""));
        assert!(raw.contains("\"scale\": 18"));
    }

    #[test]
    fn test_unreadable_snapshot_is_reported_as_corrupt() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileCacheStore::new(dir.path()).unwrap();
        fs::write(store.file_path("0xacct"), "{\"account\": ").unwrap();

        let err = store.load("0xacct").unwrap_err();
        assert!(matches!(err, CacheError::Corrupt(_)));
        assert!(err.to_string().starts_with("Cached activity list is unreadable"));
    }

    #[test]
    fn test_clear_removes_file() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileCacheStore::new(dir.path()).unwrap();
        store.save("0xacct", &[create_test_record("a", 1)]).unwrap();
        store.clear("0xacct").unwrap();
        assert!(store.load("0xacct").unwrap().is_empty());
        // Clearing twice is harmless
        store.clear("0xacct").unwrap();
    }
}
