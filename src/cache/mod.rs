//! Local cache store for per-account activity lists
//!
//! `save` has whole-snapshot overwrite semantics (last write wins). Callers
//! must always write the latest merged in-memory state, never a list read
//! from the cache before the write.

pub mod json_store;
pub mod memory_store;
pub mod sqlite_store;

use crate::types::ActivityRecord;
use std::sync::Arc;

pub use json_store::JsonFileCacheStore;
pub use memory_store::MemoryCacheStore;
pub use sqlite_store::SqliteCacheStore;

#[derive(Debug)]
pub enum CacheError {
    /// Reading or replacing a cache file failed
    Io(std::io::Error),
    /// A stored activity list could not be encoded or decoded
    Corrupt(serde_json::Error),
    Database(rusqlite::Error),
    /// A writer panicked while holding the named store lock
    LockPoisoned(&'static str),
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Io(err)
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Corrupt(err)
    }
}

impl From<rusqlite::Error> for CacheError {
    fn from(err: rusqlite::Error) -> Self {
        CacheError::Database(err)
    }
}

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheError::Io(e) => write!(f, "Activity cache file unavailable: {}", e),
            CacheError::Corrupt(e) => write!(f, "Cached activity list is unreadable: {}", e),
            CacheError::Database(e) => write!(f, "Activity cache database failed: {}", e),
            CacheError::LockPoisoned(store) => write!(f, "Activity cache {} lock poisoned", store),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CacheError::Io(e) => Some(e),
            CacheError::Corrupt(e) => Some(e),
            CacheError::Database(e) => Some(e),
            CacheError::LockPoisoned(_) => None,
        }
    }
}

pub trait CacheStore: Send + Sync {
    /// Ordered activity list for `account`; empty when nothing is cached
    fn load(&self, account: &str) -> Result<Vec<ActivityRecord>, CacheError>;

    /// Replace the cached list for `account` with `records`
    fn save(&self, account: &str, records: &[ActivityRecord]) -> Result<(), CacheError>;

    fn clear(&self, account: &str) -> Result<(), CacheError>;

    /// Get backend type for logging
    fn backend_type(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackend {
    Sqlite,
    Json,
    Memory,
}

impl CacheBackend {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Some(CacheBackend::Sqlite),
            "json" => Some(CacheBackend::Json),
            "memory" => Some(CacheBackend::Memory),
            _ => None,
        }
    }
}

/// Cache key for an account; addresses compare case-insensitively
pub fn account_key(account: &str) -> String {
    account.trim().to_ascii_lowercase()
}

pub fn open_cache_store(
    backend: CacheBackend,
    path: &str,
) -> Result<Arc<dyn CacheStore>, CacheError> {
    let store: Arc<dyn CacheStore> = match backend {
        CacheBackend::Sqlite => Arc::new(SqliteCacheStore::open(path)?),
        CacheBackend::Json => Arc::new(JsonFileCacheStore::new(path)?),
        CacheBackend::Memory => Arc::new(MemoryCacheStore::new()),
    };
    log::info!("💾 Activity cache backend: {} ({})", store.backend_type(), path);
    Ok(store)
}
