//! Reputation score reconciliation and tiers

pub mod reconciler;
pub mod tier;

pub use reconciler::{ScoreReconciler, ScoreView};
pub use tier::Tier;
