//! Translation of ledger events and entity snapshots into activity records

use super::id::{event_record_id, lifecycle_record_id};
use crate::source::{EntitySnapshot, EntityStatus};
use crate::types::{same_address, ActivityRecord, Direction, EventKind, LedgerEvent, RecordOrigin};

/// Direction of a value transfer from the point of view of `account`
pub fn direction_for(account: &str, from: Option<&str>, to: Option<&str>) -> Direction {
    if to.is_some_and(|a| same_address(a, account)) {
        Direction::In
    } else if from.is_some_and(|a| same_address(a, account)) {
        Direction::Out
    } else {
        Direction::Neutral
    }
}

/// The participant on the other side of the occurrence
fn counterparty_for(account: &str, from: Option<&str>, to: Option<&str>) -> Option<String> {
    [from, to]
        .into_iter()
        .flatten()
        .find(|a| !same_address(a, account))
        .map(|a| a.to_string())
}

/// Build the record for `event` as seen by `account`.
///
/// Returns `None` when the account is not a participant.
pub fn record_from_event(
    account: &str,
    event: &LedgerEvent,
    timestamp: i64,
    timestamp_resolved: bool,
) -> Option<ActivityRecord> {
    if !event.involves(account) {
        return None;
    }

    let from = event.from.as_deref();
    let to = event.to.as_deref();
    let direction = if event.kind.moves_funds() {
        direction_for(account, from, to)
    } else {
        Direction::Neutral
    };

    Some(ActivityRecord {
        id: event_record_id(event),
        kind: event.kind,
        subject_id: event.subject_id.clone(),
        title: event.kind.title().to_string(),
        counterparty: counterparty_for(account, from, to),
        amount: event.amount,
        direction,
        timestamp,
        timestamp_resolved,
        tx_hash: Some(event.tx_hash.to_ascii_lowercase()),
        block_number: Some(event.block_number),
        origin: RecordOrigin::Event,
    })
}

/// Lifecycle facts evidenced by the current state of an entity.
///
/// Every entity the account takes part in has been created; cleared
/// entities also yield a cleared record. Missing timestamps fall back to
/// `now` and are marked unresolved.
pub fn records_from_snapshot(account: &str, entity: &EntitySnapshot, now: i64) -> Vec<ActivityRecord> {
    let issuer = Some(entity.issuer.as_str());
    let payer = entity.payer.as_deref();

    let is_issuer = same_address(&entity.issuer, account);
    let is_payer = payer.is_some_and(|p| same_address(p, account));
    if !is_issuer && !is_payer {
        return Vec::new();
    }

    let counterparty = counterparty_for(account, issuer, payer);
    let mut records = Vec::with_capacity(2);

    records.push(ActivityRecord {
        id: lifecycle_record_id(EventKind::InvoiceCreated, &entity.subject_id),
        kind: EventKind::InvoiceCreated,
        subject_id: entity.subject_id.clone(),
        title: EventKind::InvoiceCreated.title().to_string(),
        counterparty: counterparty.clone(),
        amount: entity.amount,
        direction: Direction::Neutral,
        timestamp: entity.created_at.unwrap_or(now),
        timestamp_resolved: entity.created_at.is_some(),
        tx_hash: None,
        block_number: entity.created_block,
        origin: RecordOrigin::Snapshot,
    });

    if entity.status == EntityStatus::Cleared {
        // Settlement flows from payer to issuer
        records.push(ActivityRecord {
            id: lifecycle_record_id(EventKind::InvoiceCleared, &entity.subject_id),
            kind: EventKind::InvoiceCleared,
            subject_id: entity.subject_id.clone(),
            title: EventKind::InvoiceCleared.title().to_string(),
            counterparty,
            amount: entity.amount,
            direction: direction_for(account, payer, issuer),
            timestamp: entity.cleared_at.unwrap_or(now),
            timestamp_resolved: entity.cleared_at.is_some(),
            tx_hash: None,
            block_number: entity.cleared_block,
            origin: RecordOrigin::Snapshot,
        });
    }

    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FixedAmount;

    const ISSUER: &str = "0xissuer";
    const PAYER: &str = "0xpayer";

    fn create_cleared_event() -> LedgerEvent {
        LedgerEvent {
            kind: EventKind::InvoiceCleared,
            subject_id: "7".to_string(),
            from: Some(PAYER.to_string()),
            to: Some(ISSUER.to_string()),
            amount: Some(FixedAmount::new(2_000_000, 6)),
            tx_hash: "0xABC".to_string(),
            log_index: 1,
            block_number: 100,
        }
    }

    fn create_snapshot(status: EntityStatus) -> EntitySnapshot {
        EntitySnapshot {
            subject_id: "7".to_string(),
            issuer: ISSUER.to_string(),
            payer: Some(PAYER.to_string()),
            amount: Some(FixedAmount::new(2_000_000, 6)),
            status,
            created_at: Some(1_000),
            created_block: Some(90),
            cleared_at: None,
            cleared_block: None,
        }
    }

    #[test]
    fn test_event_direction_per_participant() {
        let event = create_cleared_event();
        let incoming = record_from_event(ISSUER, &event, 5, true).unwrap();
        let outgoing = record_from_event(PAYER, &event, 5, true).unwrap();

        assert_eq!(incoming.direction, Direction::In);
        assert_eq!(incoming.counterparty.as_deref(), Some(PAYER));
        assert_eq!(outgoing.direction, Direction::Out);
        assert_eq!(outgoing.counterparty.as_deref(), Some(ISSUER));
        assert_eq!(incoming.tx_hash.as_deref(), Some("0xabc"));
    }

    #[test]
    fn test_event_for_unrelated_account_is_skipped() {
        assert!(record_from_event("0xstranger", &create_cleared_event(), 5, true).is_none());
    }

    #[test]
    fn test_created_event_has_no_direction() {
        let mut event = create_cleared_event();
        event.kind = EventKind::InvoiceCreated;
        let record = record_from_event(ISSUER, &event, 5, true).unwrap();
        assert_eq!(record.direction, Direction::Neutral);
    }

    #[test]
    fn test_open_snapshot_yields_created_only() {
        let records = records_from_snapshot(ISSUER, &create_snapshot(EntityStatus::Open), 9_999);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "invoice_created:7");
        assert_eq!(records[0].timestamp, 1_000);
        assert!(records[0].timestamp_resolved);
    }

    #[test]
    fn test_cleared_snapshot_collapses_with_event_id() {
        let records = records_from_snapshot(ISSUER, &create_snapshot(EntityStatus::Cleared), 9_999);
        assert_eq!(records.len(), 2);

        let cleared = &records[1];
        let from_event = record_from_event(ISSUER, &create_cleared_event(), 5, true).unwrap();
        assert_eq!(cleared.id, from_event.id);
        assert_eq!(cleared.direction, Direction::In);
        // No clearing time in the snapshot: falls back to now
        assert_eq!(cleared.timestamp, 9_999);
        assert!(!cleared.timestamp_resolved);
    }

    #[test]
    fn test_snapshot_for_unrelated_account_is_empty() {
        assert!(records_from_snapshot("0xstranger", &create_snapshot(EntityStatus::Cleared), 1).is_empty());
    }
}
