//! Ledger event and activity record types shared by every component

use serde::{Deserialize, Serialize};
use std::fmt;

/// Typed events emitted by the ledger contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    InvoiceCreated,
    InvoicePaid,
    InvoiceCleared,
    AdvanceIssued,
    AdvanceRepaid,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::InvoiceCreated,
        EventKind::InvoicePaid,
        EventKind::InvoiceCleared,
        EventKind::AdvanceIssued,
        EventKind::AdvanceRepaid,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::InvoiceCreated => "invoice_created",
            EventKind::InvoicePaid => "invoice_paid",
            EventKind::InvoiceCleared => "invoice_cleared",
            EventKind::AdvanceIssued => "advance_issued",
            EventKind::AdvanceRepaid => "advance_repaid",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(value.trim()))
    }

    /// Human-readable title shown in the activity timeline
    pub fn title(&self) -> &'static str {
        match self {
            EventKind::InvoiceCreated => "Invoice created",
            EventKind::InvoicePaid => "Invoice payment",
            EventKind::InvoiceCleared => "Invoice cleared",
            EventKind::AdvanceIssued => "Advance issued",
            EventKind::AdvanceRepaid => "Advance repaid",
        }
    }

    /// Lifecycle facts that can happen at most once for a given subject.
    ///
    /// These share one canonical record id between the event-sourced and the
    /// snapshot-derived paths.
    pub fn is_once_per_subject(&self) -> bool {
        matches!(
            self,
            EventKind::InvoiceCreated | EventKind::InvoiceCleared | EventKind::AdvanceIssued
        )
    }

    /// Events that increment the reputation score (once per subject)
    pub fn is_qualifying(&self) -> bool {
        matches!(self, EventKind::InvoiceCleared)
    }

    /// Whether the event moves value between participants
    pub fn moves_funds(&self) -> bool {
        !matches!(self, EventKind::InvoiceCreated)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed-point amount: integer raw units plus a known decimal scale.
///
/// Serialized with `raw` as a decimal string so the value survives JSON
/// consumers that only understand doubles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FixedAmount {
    #[serde(with = "raw_as_string")]
    pub raw: u128,
    pub scale: u8,
}

impl FixedAmount {
    pub fn new(raw: u128, scale: u8) -> Self {
        Self { raw, scale }
    }

    /// Integer part of the amount (floor)
    pub fn whole_units(&self) -> u128 {
        match 10u128.checked_pow(self.scale as u32) {
            Some(divisor) => self.raw / divisor,
            None => 0,
        }
    }
}

impl fmt::Display for FixedAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.scale == 0 {
            return write!(f, "{}", self.raw);
        }
        let digits = format!("{:0>width$}", self.raw, width = self.scale as usize + 1);
        let split = digits.len() - self.scale as usize;
        write!(f, "{}.{}", &digits[..split], &digits[split..])
    }
}

mod raw_as_string {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(raw: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&raw.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        let value = String::deserialize(deserializer)?;
        value.parse::<u128>().map_err(serde::de::Error::custom)
    }
}

/// Raw event observed on the ledger. Read-only fact; the timestamp is
/// resolved separately from the block number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub kind: EventKind,
    pub subject_id: String,
    pub from: Option<String>,
    pub to: Option<String>,
    pub amount: Option<FixedAmount>,
    pub tx_hash: String,
    pub log_index: u64,
    pub block_number: u64,
}

impl LedgerEvent {
    pub fn involves(&self, account: &str) -> bool {
        self.from.as_deref().is_some_and(|a| same_address(a, account))
            || self.to.as_deref().is_some_and(|a| same_address(a, account))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    In,
    Out,
    #[serde(rename = "none")]
    Neutral,
}

/// Where an activity record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOrigin {
    Event,
    Snapshot,
}

/// One entry of an account's activity timeline. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub id: String,
    pub kind: EventKind,
    pub subject_id: String,
    pub title: String,
    pub counterparty: Option<String>,
    pub amount: Option<FixedAmount>,
    pub direction: Direction,
    pub timestamp: i64,
    /// False when the block timestamp lookup failed and "now" was used
    pub timestamp_resolved: bool,
    pub tx_hash: Option<String>,
    pub block_number: Option<u64>,
    pub origin: RecordOrigin,
}

impl ActivityRecord {
    /// Strength of the evidence behind this record. A higher rank replaces a
    /// lower one on id collision; equal ranks keep the existing entry.
    pub fn evidence_rank(&self) -> u8 {
        match (self.origin, self.timestamp_resolved) {
            (RecordOrigin::Event, true) => 2,
            (RecordOrigin::Event, false) => 1,
            (RecordOrigin::Snapshot, _) => 0,
        }
    }
}

/// Case-insensitive address comparison (hex addresses may arrive checksummed)
pub fn same_address(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// Helper to get current Unix timestamp
pub fn current_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}
