//! Per-block timestamp cache with bounded lookups

use crate::source::LedgerEventSource;
use crate::types::current_timestamp;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedTimestamp {
    pub timestamp: i64,
    /// False when the lookup failed and "now" was substituted
    pub resolved: bool,
}

/// Caches block timestamps so each block is looked up once per session.
///
/// Failed or timed-out lookups fall back to the current time and are not
/// cached, so a later lookup for the same block can still succeed.
pub struct BlockTimestampCache {
    resolved: Mutex<HashMap<u64, i64>>,
    lookup_timeout: Duration,
}

impl BlockTimestampCache {
    pub fn new(lookup_timeout: Duration) -> Self {
        Self {
            resolved: Mutex::new(HashMap::new()),
            lookup_timeout,
        }
    }

    pub async fn resolve(&self, source: &dyn LedgerEventSource, block_number: u64) -> ResolvedTimestamp {
        if let Some(timestamp) = self.resolved.lock().await.get(&block_number).copied() {
            return ResolvedTimestamp {
                timestamp,
                resolved: true,
            };
        }

        match timeout(self.lookup_timeout, source.block_timestamp(block_number)).await {
            Ok(Ok(timestamp)) => {
                self.resolved.lock().await.insert(block_number, timestamp);
                ResolvedTimestamp {
                    timestamp,
                    resolved: true,
                }
            }
            Ok(Err(e)) => {
                log::warn!("⚠️  Timestamp lookup for block {} failed: {}", block_number, e);
                Self::fallback()
            }
            Err(_) => {
                log::warn!(
                    "⚠️  Timestamp lookup for block {} timed out after {}ms",
                    block_number,
                    self.lookup_timeout.as_millis()
                );
                Self::fallback()
            }
        }
    }

    pub async fn cached_blocks(&self) -> usize {
        self.resolved.lock().await.len()
    }

    fn fallback() -> ResolvedTimestamp {
        ResolvedTimestamp {
            timestamp: current_timestamp(),
            resolved: false,
        }
    }
}
