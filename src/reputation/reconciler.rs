//! Score reconciliation
//!
//! Combines three inputs into one displayed score:
//! - authoritative reads from the ledger (may lag, may carry the block
//!   height they reflect)
//! - an optimistic running score built from locally observed qualifying
//!   events, each counted once per subject
//! - an estimate derived from the number of cleared entities in a snapshot
//!
//! An authoritative read that is known to cover every locally counted event
//! wins outright, including when it is lower. Anything else is a provisional
//! overlay: the display score is the maximum of the available candidates and
//! the view is flagged `provisional`.

use super::tier::{Tier, BASELINE_SCORE, MAX_SCORE, QUALIFYING_BASE, SNAPSHOT_STEP};
use crate::activity::ActivitySignal;
use crate::source::AuthoritativeScore;
use crate::types::FixedAmount;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreView {
    pub score: u32,
    pub tier: Tier,
    /// True while local knowledge is ahead of (or not covered by) the
    /// authoritative read
    pub provisional: bool,
}

impl Default for ScoreView {
    fn default() -> Self {
        Self {
            score: BASELINE_SCORE,
            tier: Tier::from_score(BASELINE_SCORE),
            provisional: true,
        }
    }
}

pub struct ScoreReconciler {
    authoritative: Option<AuthoritativeScore>,
    optimistic: u32,
    snapshot_candidate: Option<u32>,
    counted: HashSet<String>,
    /// Highest block of any counted qualifying event
    watermark: Option<u64>,
    view_tx: watch::Sender<ScoreView>,
}

impl ScoreReconciler {
    pub fn new() -> Self {
        let (view_tx, _) = watch::channel(ScoreView::default());
        Self {
            authoritative: None,
            optimistic: BASELINE_SCORE,
            snapshot_candidate: None,
            counted: HashSet::new(),
            watermark: None,
            view_tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ScoreView> {
        self.view_tx.subscribe()
    }

    pub fn on_authoritative_score(&mut self, score: AuthoritativeScore) {
        let local = self.local_score();
        if score.score < local {
            log::warn!(
                "⚠️  Authoritative score {} is below local score {} (as of block {:?}, watermark {:?})",
                score.score,
                local,
                score.as_of_block,
                self.watermark
            );
        }
        self.authoritative = Some(score);
        self.publish();
    }

    /// Count a qualifying event. Returns false if `subject_id` was already
    /// counted.
    pub fn on_qualifying_event(
        &mut self,
        subject_id: &str,
        volume: Option<FixedAmount>,
        block_number: Option<u64>,
    ) -> bool {
        if !self.counted.insert(subject_id.to_string()) {
            log::debug!("Qualifying event for subject {} already counted", subject_id);
            return false;
        }

        // One point per whole unit, whatever the amount's scale
        let bonus = volume
            .map(|v| v.whole_units().min(u128::from(MAX_SCORE)) as u32)
            .unwrap_or(0);
        self.optimistic = self
            .optimistic
            .saturating_add(QUALIFYING_BASE + bonus)
            .min(MAX_SCORE);

        if let Some(block) = block_number {
            self.watermark = Some(self.watermark.map_or(block, |w| w.max(block)));
        }

        log::info!(
            "⭐ Counted qualifying event for subject {} (+{}), optimistic score {}",
            subject_id,
            QUALIFYING_BASE + bonus,
            self.optimistic
        );
        self.publish();
        true
    }

    pub fn on_cleared_count_snapshot(&mut self, count: u32) {
        let candidate = count
            .saturating_mul(SNAPSHOT_STEP)
            .saturating_add(BASELINE_SCORE)
            .min(MAX_SCORE);
        self.snapshot_candidate = Some(candidate);
        self.publish();
    }

    pub fn apply(&mut self, signal: ActivitySignal) {
        match signal {
            ActivitySignal::Qualifying(event) => {
                self.on_qualifying_event(&event.subject_id, event.volume, event.block_number);
            }
            ActivitySignal::ClearedCount(count) => self.on_cleared_count_snapshot(count),
        }
    }

    pub fn counted_subjects(&self) -> usize {
        self.counted.len()
    }

    pub fn view(&self) -> ScoreView {
        if let Some(authoritative) = self.confirmed_authoritative() {
            let score = authoritative.score.min(MAX_SCORE);
            return ScoreView {
                score,
                tier: Tier::from_score(score),
                provisional: false,
            };
        }

        let score = self
            .authoritative
            .map(|a| a.score.min(MAX_SCORE))
            .unwrap_or(0)
            .max(self.local_score());
        ScoreView {
            score,
            tier: Tier::from_score(score),
            provisional: true,
        }
    }

    /// The authoritative read, if it reflects a height at or beyond every
    /// locally counted event
    fn confirmed_authoritative(&self) -> Option<AuthoritativeScore> {
        let authoritative = self.authoritative?;
        let as_of = authoritative.as_of_block?;
        match self.watermark {
            Some(watermark) if as_of < watermark => None,
            _ => Some(authoritative),
        }
    }

    fn local_score(&self) -> u32 {
        self.optimistic.max(self.snapshot_candidate.unwrap_or(0))
    }

    fn publish(&self) {
        let view = self.view();
        self.view_tx.send_if_modified(|current| {
            if *current == view {
                false
            } else {
                *current = view;
                true
            }
        });
    }
}

impl Default for ScoreReconciler {
    fn default() -> Self {
        Self::new()
    }
}
