//! Reputation tiers and scoring constants

use serde::{Deserialize, Serialize};
use std::fmt;

pub const MAX_SCORE: u32 = 1000;
/// Starting score for an account with no counted history
pub const BASELINE_SCORE: u32 = 450;
/// Fixed increment per qualifying event, before the volume bonus
pub const QUALIFYING_BASE: u32 = 20;
/// Increment per cleared entity when estimating from a snapshot count
pub const SNAPSHOT_STEP: u32 = 20;

const TIER_B_MIN: u32 = 500;
const TIER_A_MIN: u32 = 850;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Tier {
    A,
    B,
    C,
}

impl Tier {
    /// Always derived from the score, never taken from an upstream field
    pub fn from_score(score: u32) -> Self {
        if score >= TIER_A_MIN {
            Tier::A
        } else if score >= TIER_B_MIN {
            Tier::B
        } else {
            Tier::C
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Tier::A => "A",
            Tier::B => "B",
            Tier::C => "C",
        };
        f.write_str(label)
    }
}
