//! ledgerflow: account activity aggregation, reputation reconciliation and
//! transaction lifecycle tracking over an append-only ledger.

pub mod activity;
pub mod cache;
pub mod config;
pub mod reputation;
pub mod scheduler;
pub mod session;
pub mod source;
pub mod tx;
pub mod types;

pub use activity::{ActivityAggregator, ActivityView};
pub use reputation::{ScoreReconciler, ScoreView, Tier};
pub use session::{AccountSession, SessionConfig, SessionManager};
pub use tx::{TransactionState, TransactionTracker};
pub use types::{ActivityRecord, EventKind, FixedAmount, LedgerEvent};
