//! SQLite activity cache
//!
//! Table `activity_cache` holds one row per record, keyed by
//! `(account, position)` so the cached order is the display order. Amounts
//! live inside `record_json` with the raw integer encoded as a string.

use super::{account_key, CacheError, CacheStore};
use crate::types::ActivityRecord;
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS activity_cache (
    account         TEXT NOT NULL,
    position        INTEGER NOT NULL,
    record_id       TEXT NOT NULL,
    timestamp       INTEGER NOT NULL,
    record_json     TEXT NOT NULL,
    saved_at        INTEGER NOT NULL,
    PRIMARY KEY (account, position)
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_activity_cache_record
    ON activity_cache (account, record_id);
"#;

pub struct SqliteCacheStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCacheStore {
    /// Open (or create) the cache database and apply the schema
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, CacheError> {
        let conn = Connection::open(db_path)?;
        Self::from_connection(conn)
    }

    pub fn in_memory() -> Result<Self, CacheError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, CacheError> {
        // WAL lets readers proceed while a snapshot is being rewritten.
        // In-memory databases report "memory" here, which is fine.
        let mode: String = conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        log::debug!("📊 SQLite cache journal_mode={}", mode);

        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, CacheError> {
        self.conn
            .lock()
            .map_err(|_| CacheError::LockPoisoned("connection"))
    }
}

impl CacheStore for SqliteCacheStore {
    fn load(&self, account: &str) -> Result<Vec<ActivityRecord>, CacheError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT record_json FROM activity_cache
             WHERE account = ?1
             ORDER BY position ASC",
        )?;

        let rows = stmt.query_map([account_key(account)], |row| row.get::<_, String>(0))?;

        let mut records = Vec::new();
        for row in rows {
            let json = row?;
            records.push(serde_json::from_str(&json)?);
        }
        Ok(records)
    }

    /// Whole-snapshot overwrite inside one transaction
    fn save(&self, account: &str, records: &[ActivityRecord]) -> Result<(), CacheError> {
        let mut conn = self.conn()?;
        let key = account_key(account);
        let now = crate::types::current_timestamp();

        let tx = conn.transaction()?;
        tx.execute("DELETE FROM activity_cache WHERE account = ?1", [&key])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO activity_cache (account, position, record_id, timestamp, record_json, saved_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for (position, record) in records.iter().enumerate() {
                let json = serde_json::to_string(record)?;
                stmt.execute(rusqlite::params![
                    key,
                    position as i64,
                    record.id,
                    record.timestamp,
                    json,
                    now,
                ])?;
            }
        }
        tx.commit()?;

        log::debug!("Saved {} activity records for {}", records.len(), key);
        Ok(())
    }

    fn clear(&self, account: &str) -> Result<(), CacheError> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM activity_cache WHERE account = ?1", [account_key(account)])?;
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::test_support::create_test_record;
    use tempfile::NamedTempFile;

    #[test]
    fn test_round_trip_preserves_order_and_amounts() {
        let temp_file = NamedTempFile::new().unwrap();
        let store = SqliteCacheStore::open(temp_file.path()).unwrap();
        let records = vec![
            create_test_record("c", 30),
            create_test_record("b", 20),
            create_test_record("a", 10),
        ];

        store.save("0xAcct", &records).unwrap();
        let loaded = store.load("0xacct").unwrap();
        assert_eq!(loaded, records);

        // save(load(account)) is a fixed point
        store.save("0xacct", &loaded).unwrap();
        assert_eq!(store.load("0xacct").unwrap(), records);
    }

    #[test]
    fn test_save_is_whole_snapshot_overwrite() {
        let store = SqliteCacheStore::in_memory().unwrap();
        store
            .save("0xacct", &[create_test_record("a", 1), create_test_record("b", 2)])
            .unwrap();
        store.save("0xacct", &[create_test_record("z", 9)]).unwrap();

        let loaded = store.load("0xacct").unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "z");
    }

    #[test]
    fn test_accounts_are_isolated() {
        let store = SqliteCacheStore::in_memory().unwrap();
        store.save("0xone", &[create_test_record("a", 1)]).unwrap();
        store.save("0xtwo", &[create_test_record("b", 2)]).unwrap();

        store.clear("0xone").unwrap();
        assert!(store.load("0xone").unwrap().is_empty());
        assert_eq!(store.load("0xtwo").unwrap().len(), 1);
    }

    #[test]
    fn test_reopen_keeps_data() {
        let temp_file = NamedTempFile::new().unwrap();
        {
            let store = SqliteCacheStore::open(temp_file.path()).unwrap();
            store.save("0xacct", &[create_test_record("a", 1)]).unwrap();
        }
        let store = SqliteCacheStore::open(temp_file.path()).unwrap();
        assert_eq!(store.load("0xacct").unwrap().len(), 1);
    }
}
