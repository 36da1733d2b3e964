//! Account activity: translation, deduplication and aggregation of ledger
//! occurrences into a single timeline per account.

pub mod aggregator;
pub mod backfill;
pub mod id;
pub mod merge;
pub mod timestamps;
pub mod translate;

pub use aggregator::{
    ActivityAggregator, ActivitySignal, ActivityView, AggregatorConfig, BackfillReport, QualifyingEvent,
};
pub use backfill::{plan_block_ranges, BlockRange};
pub use id::{event_record_id, lifecycle_record_id};
pub use merge::{merge_records, sort_descending, MergeOutcome};
pub use timestamps::{BlockTimestampCache, ResolvedTimestamp};
pub use translate::{direction_for, record_from_event, records_from_snapshot};
