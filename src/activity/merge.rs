//! Union-by-id merge of activity records
//!
//! Pure function over the current list and a batch of incoming records. The
//! result does not depend on which task delivered a record first, so
//! backfill, live subscriptions and snapshot reconciliation can interleave
//! freely and still converge.

use crate::types::ActivityRecord;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct MergeOutcome {
    /// Full merged list, descending by timestamp
    pub records: Vec<ActivityRecord>,
    /// Records that were added or replaced a weaker entry with the same id
    pub changed: Vec<ActivityRecord>,
}

impl MergeOutcome {
    pub fn is_unchanged(&self) -> bool {
        self.changed.is_empty()
    }
}

/// Merge `incoming` into `existing`.
///
/// On id collision the existing record is kept unless the incoming one has a
/// strictly higher evidence rank (see [`ActivityRecord::evidence_rank`]).
pub fn merge_records(existing: &[ActivityRecord], incoming: Vec<ActivityRecord>) -> MergeOutcome {
    let mut records = existing.to_vec();
    let mut index: HashMap<String, usize> = records
        .iter()
        .enumerate()
        .map(|(i, r)| (r.id.clone(), i))
        .collect();
    let mut changed = Vec::new();

    for record in incoming {
        match index.get(&record.id) {
            Some(&i) => {
                if record.evidence_rank() > records[i].evidence_rank() {
                    log::debug!(
                        "Upgrading activity {} ({:?} -> {:?})",
                        record.id,
                        records[i].origin,
                        record.origin
                    );
                    records[i] = record.clone();
                    changed.push(record);
                }
            }
            None => {
                index.insert(record.id.clone(), records.len());
                records.push(record.clone());
                changed.push(record);
            }
        }
    }

    sort_descending(&mut records);
    MergeOutcome { records, changed }
}

/// Descending by timestamp. Stable, so equal timestamps keep insertion order.
pub fn sort_descending(records: &mut [ActivityRecord]) {
    records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
}
