//! Canonical activity record ids
//!
//! One derivation shared by the event-sourced and snapshot-derived paths:
//! - once-per-subject kinds: `{kind}:{subject}`
//! - repeatable kinds: `{kind}:{subject}:{tx_hash}:{log_index}`
//!
//! Snapshot reconciliation only synthesizes once-per-subject facts, so a
//! snapshot record and the event record for the same occurrence collapse.

use crate::types::{EventKind, LedgerEvent};

pub fn event_record_id(event: &LedgerEvent) -> String {
    if event.kind.is_once_per_subject() {
        lifecycle_record_id(event.kind, &event.subject_id)
    } else {
        format!(
            "{}:{}:{}:{}",
            event.kind.as_str(),
            event.subject_id,
            event.tx_hash.to_ascii_lowercase(),
            event.log_index
        )
    }
}

pub fn lifecycle_record_id(kind: EventKind, subject_id: &str) -> String {
    format!("{}:{}", kind.as_str(), subject_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_event(kind: EventKind, tx_hash: &str, log_index: u64) -> LedgerEvent {
        LedgerEvent {
            kind,
            subject_id: "7".to_string(),
            from: None,
            to: None,
            amount: None,
            tx_hash: tx_hash.to_string(),
            log_index,
            block_number: 1,
        }
    }

    #[test]
    fn test_lifecycle_ids_ignore_transaction() {
        let a = create_test_event(EventKind::InvoiceCleared, "0xabc", 1);
        let b = create_test_event(EventKind::InvoiceCleared, "0xdef", 4);
        assert_eq!(event_record_id(&a), "invoice_cleared:7");
        assert_eq!(event_record_id(&a), event_record_id(&b));
        assert_eq!(
            event_record_id(&a),
            lifecycle_record_id(EventKind::InvoiceCleared, "7")
        );
    }

    #[test]
    fn test_repeatable_ids_include_log_position() {
        let a = create_test_event(EventKind::InvoicePaid, "0xABC", 1);
        let b = create_test_event(EventKind::InvoicePaid, "0xabc", 2);
        assert_eq!(event_record_id(&a), "invoice_paid:7:0xabc:1");
        assert_ne!(event_record_id(&a), event_record_id(&b));
    }
}
