//! Backfill range planning
//!
//! Providers cap the block span of a single range query, so the lookback
//! window is split into inclusive, ascending, non-overlapping chunks.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    pub from: u64,
    pub to: u64,
}

impl BlockRange {
    pub fn block_count(&self) -> u64 {
        self.to - self.from + 1
    }
}

/// Ranges covering the last `lookback` blocks up to and including
/// `current_block`, each at most `window` blocks wide.
pub fn plan_block_ranges(current_block: u64, lookback: u64, window: u64) -> Vec<BlockRange> {
    if lookback == 0 || window == 0 {
        return Vec::new();
    }

    let start = current_block.saturating_sub(lookback - 1);
    let mut ranges = Vec::new();
    let mut from = start;

    loop {
        let to = from.saturating_add(window - 1).min(current_block);
        ranges.push(BlockRange { from, to });
        if to >= current_block {
            break;
        }
        from = to + 1;
    }

    ranges
}
