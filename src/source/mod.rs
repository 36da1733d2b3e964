//! Ledger event source contract
//!
//! The ledger is only observable through three channels:
//! - push subscriptions (low latency, at-least-once, may redeliver on reconnect)
//! - bounded-range pull queries (the provider caps the block window per call)
//! - point-in-time snapshots of derived entity state
//!
//! Implementations describe what they support through [`SourceCapabilities`],
//! returned once at construction time.

pub mod memory;
pub mod rpc;

use crate::types::{EventKind, FixedAmount, LedgerEvent};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub use memory::{FailurePlan, InMemoryLedger};
pub use rpc::{RpcLedgerSource, RpcSourceConfig};

#[derive(Debug)]
pub enum SourceError {
    Timeout,
    Transport(String),
    Decode(String),
    RangeTooLarge { requested: u64, max: u64 },
    Unsupported(&'static str),
    Closed,
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::Timeout => write!(f, "Source request timed out"),
            SourceError::Transport(e) => write!(f, "Transport error: {}", e),
            SourceError::Decode(e) => write!(f, "Decode error: {}", e),
            SourceError::RangeTooLarge { requested, max } => write!(
                f,
                "Block range of {} exceeds provider limit of {}",
                requested, max
            ),
            SourceError::Unsupported(what) => write!(f, "Not supported by this source: {}", what),
            SourceError::Closed => write!(f, "Source closed"),
        }
    }
}

impl std::error::Error for SourceError {}

impl From<tokio::time::error::Elapsed> for SourceError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        SourceError::Timeout
    }
}

/// What a source can do, declared up front instead of probed at runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceCapabilities {
    /// Maximum inclusive block span accepted by `query_range`
    pub max_block_window: u64,
    /// True when `subscribe` is backed by real push delivery (false = polling)
    pub supports_push: bool,
    pub supports_snapshots: bool,
    pub supports_score_reads: bool,
}

/// Subscription filter: only events involving this account are delivered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFilter {
    pub account: String,
}

impl EventFilter {
    pub fn account(account: &str) -> Self {
        Self {
            account: account.to_string(),
        }
    }

    pub fn matches(&self, event: &LedgerEvent) -> bool {
        event.involves(&self.account)
    }
}

/// Current lifecycle status of a ledger entity (e.g. an invoice)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    Open,
    Funded,
    Cleared,
}

/// Point-in-time state of one account-relevant entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub subject_id: String,
    pub issuer: String,
    pub payer: Option<String>,
    pub amount: Option<FixedAmount>,
    pub status: EntityStatus,
    pub created_at: Option<i64>,
    pub created_block: Option<u64>,
    pub cleared_at: Option<i64>,
    pub cleared_block: Option<u64>,
}

/// Authoritative reputation read. `as_of_block` is the height the score is
/// known to reflect, when the source reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthoritativeScore {
    pub score: u32,
    pub as_of_block: Option<u64>,
}

#[async_trait]
pub trait LedgerEventSource: Send + Sync {
    fn capabilities(&self) -> SourceCapabilities;

    /// Latest block height known to the provider
    async fn current_block(&self) -> Result<u64, SourceError>;

    /// Push stream of events of `kind` matching `filter`. Delivery is
    /// at-least-once; consumers must deduplicate.
    async fn subscribe(
        &self,
        kind: EventKind,
        filter: EventFilter,
    ) -> Result<mpsc::Receiver<LedgerEvent>, SourceError>;

    /// Events of `kind` in `[from_block, to_block]`, ordered by block then log
    /// index. Fails with `RangeTooLarge` when the span exceeds
    /// `capabilities().max_block_window`.
    async fn query_range(
        &self,
        kind: EventKind,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<LedgerEvent>, SourceError>;

    async fn block_timestamp(&self, block_number: u64) -> Result<i64, SourceError>;

    async fn read_snapshot(&self, account: &str) -> Result<Vec<EntitySnapshot>, SourceError>;

    async fn read_score(&self, _account: &str) -> Result<AuthoritativeScore, SourceError> {
        Err(SourceError::Unsupported("score reads"))
    }
}
