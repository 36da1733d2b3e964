//! In-memory ledger implementing the full source contract.
//!
//! Used by the integration tests and for local development. Supports push
//! redelivery (to simulate reconnects), failure injection, and records every
//! range query it serves.

use super::{
    AuthoritativeScore, EntitySnapshot, EventFilter, LedgerEventSource, SourceCapabilities,
    SourceError,
};
use crate::types::{EventKind, LedgerEvent};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

const SUBSCRIBER_BUFFER: usize = 256;

/// Which operations should fail (or stall) on the next calls
#[derive(Debug, Clone, Default)]
pub struct FailurePlan {
    pub fail_queries: bool,
    pub fail_subscribe: bool,
    pub fail_timestamps: bool,
    pub fail_snapshots: bool,
    pub fail_scores: bool,
    /// Artificial latency added to block timestamp lookups
    pub timestamp_delay: Option<Duration>,
}

struct Subscriber {
    kind: EventKind,
    filter: EventFilter,
    tx: mpsc::Sender<LedgerEvent>,
}

#[derive(Default)]
struct LedgerState {
    head: u64,
    events: Vec<LedgerEvent>,
    block_times: HashMap<u64, i64>,
    snapshots: HashMap<String, Vec<EntitySnapshot>>,
    scores: HashMap<String, AuthoritativeScore>,
    subscribers: Vec<Subscriber>,
    failures: FailurePlan,
    queried_ranges: Vec<(EventKind, u64, u64)>,
    timestamp_lookups: usize,
}

pub struct InMemoryLedger {
    capabilities: SourceCapabilities,
    state: Mutex<LedgerState>,
}

impl InMemoryLedger {
    pub fn new(max_block_window: u64) -> Self {
        Self {
            capabilities: SourceCapabilities {
                max_block_window,
                supports_push: true,
                supports_snapshots: true,
                supports_score_reads: true,
            },
            state: Mutex::new(LedgerState::default()),
        }
    }

    pub fn with_capabilities(capabilities: SourceCapabilities) -> Self {
        Self {
            capabilities,
            state: Mutex::new(LedgerState::default()),
        }
    }

    pub async fn set_head(&self, head: u64) {
        self.state.lock().await.head = head;
    }

    pub async fn set_block_time(&self, block_number: u64, timestamp: i64) {
        self.state.lock().await.block_times.insert(block_number, timestamp);
    }

    /// Record a mined event and push it to matching subscribers
    pub async fn append_event(&self, event: LedgerEvent) {
        let mut state = self.state.lock().await;
        state.head = state.head.max(event.block_number);
        Self::deliver(&mut state.subscribers, &event);
        state.events.push(event);
    }

    /// Store an event without pushing it (visible to range queries only)
    pub async fn append_historical(&self, event: LedgerEvent) {
        let mut state = self.state.lock().await;
        state.head = state.head.max(event.block_number);
        state.events.push(event);
    }

    /// Push every stored event again, as a provider does after a reconnect
    pub async fn redeliver_all(&self) {
        let mut state = self.state.lock().await;
        let events = state.events.clone();
        for event in &events {
            Self::deliver(&mut state.subscribers, event);
        }
    }

    pub async fn set_snapshot(&self, account: &str, entities: Vec<EntitySnapshot>) {
        self.state
            .lock()
            .await
            .snapshots
            .insert(account.to_ascii_lowercase(), entities);
    }

    pub async fn set_score(&self, account: &str, score: AuthoritativeScore) {
        self.state
            .lock()
            .await
            .scores
            .insert(account.to_ascii_lowercase(), score);
    }

    pub async fn set_failures(&self, failures: FailurePlan) {
        self.state.lock().await.failures = failures;
    }

    pub async fn queried_ranges(&self) -> Vec<(EventKind, u64, u64)> {
        self.state.lock().await.queried_ranges.clone()
    }

    pub async fn timestamp_lookups(&self) -> usize {
        self.state.lock().await.timestamp_lookups
    }

    pub async fn subscriber_count(&self) -> usize {
        let mut state = self.state.lock().await;
        state.subscribers.retain(|s| !s.tx.is_closed());
        state.subscribers.len()
    }

    fn deliver(subscribers: &mut Vec<Subscriber>, event: &LedgerEvent) {
        subscribers.retain(|s| !s.tx.is_closed());
        for subscriber in subscribers.iter() {
            if subscriber.kind == event.kind && subscriber.filter.matches(event) {
                if let Err(e) = subscriber.tx.try_send(event.clone()) {
                    log::warn!("In-memory ledger dropped push for {}: {}", event.tx_hash, e);
                }
            }
        }
    }
}

#[async_trait]
impl LedgerEventSource for InMemoryLedger {
    fn capabilities(&self) -> SourceCapabilities {
        self.capabilities
    }

    async fn current_block(&self) -> Result<u64, SourceError> {
        let state = self.state.lock().await;
        if state.failures.fail_queries {
            return Err(SourceError::Transport("injected head failure".to_string()));
        }
        Ok(state.head)
    }

    async fn subscribe(
        &self,
        kind: EventKind,
        filter: EventFilter,
    ) -> Result<mpsc::Receiver<LedgerEvent>, SourceError> {
        let mut state = self.state.lock().await;
        if state.failures.fail_subscribe {
            return Err(SourceError::Transport("injected subscribe failure".to_string()));
        }
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        state.subscribers.push(Subscriber { kind, filter, tx });
        Ok(rx)
    }

    async fn query_range(
        &self,
        kind: EventKind,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<LedgerEvent>, SourceError> {
        let mut state = self.state.lock().await;
        if state.failures.fail_queries {
            return Err(SourceError::Transport("injected query failure".to_string()));
        }
        let requested = to_block.saturating_sub(from_block) + 1;
        if requested > self.capabilities.max_block_window {
            return Err(SourceError::RangeTooLarge {
                requested,
                max: self.capabilities.max_block_window,
            });
        }
        state.queried_ranges.push((kind, from_block, to_block));

        let mut events: Vec<LedgerEvent> = state
            .events
            .iter()
            .filter(|e| e.kind == kind && e.block_number >= from_block && e.block_number <= to_block)
            .cloned()
            .collect();
        events.sort_by_key(|e| (e.block_number, e.log_index));
        Ok(events)
    }

    async fn block_timestamp(&self, block_number: u64) -> Result<i64, SourceError> {
        let (delay, result) = {
            let mut state = self.state.lock().await;
            state.timestamp_lookups += 1;
            let result = if state.failures.fail_timestamps {
                Err(SourceError::Transport("injected timestamp failure".to_string()))
            } else {
                state
                    .block_times
                    .get(&block_number)
                    .copied()
                    .ok_or_else(|| SourceError::Decode(format!("unknown block {}", block_number)))
            };
            (state.failures.timestamp_delay, result)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        result
    }

    async fn read_snapshot(&self, account: &str) -> Result<Vec<EntitySnapshot>, SourceError> {
        let state = self.state.lock().await;
        if state.failures.fail_snapshots {
            return Err(SourceError::Transport("injected snapshot failure".to_string()));
        }
        Ok(state
            .snapshots
            .get(&account.to_ascii_lowercase())
            .cloned()
            .unwrap_or_default())
    }

    async fn read_score(&self, account: &str) -> Result<AuthoritativeScore, SourceError> {
        let state = self.state.lock().await;
        if state.failures.fail_scores {
            return Err(SourceError::Transport("injected score failure".to_string()));
        }
        state
            .scores
            .get(&account.to_ascii_lowercase())
            .copied()
            .ok_or(SourceError::Unsupported("no score published for account"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_event(kind: EventKind, block: u64, log_index: u64) -> LedgerEvent {
        LedgerEvent {
            kind,
            subject_id: format!("{}", block),
            from: Some("0xpayer".to_string()),
            to: Some("0xissuer".to_string()),
            amount: None,
            tx_hash: format!("0x{:04x}", block),
            log_index,
            block_number: block,
        }
    }

    #[tokio::test]
    async fn test_query_range_enforces_window() {
        let ledger = InMemoryLedger::new(10);
        let result = ledger.query_range(EventKind::InvoicePaid, 1, 11).await;
        assert!(matches!(
            result,
            Err(SourceError::RangeTooLarge { requested: 11, max: 10 })
        ));
        assert!(ledger.query_range(EventKind::InvoicePaid, 1, 10).await.is_ok());
    }

    #[tokio::test]
    async fn test_query_range_orders_by_block_and_log_index() {
        let ledger = InMemoryLedger::new(10);
        ledger.append_historical(create_test_event(EventKind::InvoicePaid, 5, 2)).await;
        ledger.append_historical(create_test_event(EventKind::InvoicePaid, 3, 0)).await;
        ledger.append_historical(create_test_event(EventKind::InvoicePaid, 5, 1)).await;
        ledger.append_historical(create_test_event(EventKind::InvoiceCleared, 4, 0)).await;

        let events = ledger.query_range(EventKind::InvoicePaid, 1, 10).await.unwrap();
        let keys: Vec<(u64, u64)> = events.iter().map(|e| (e.block_number, e.log_index)).collect();
        assert_eq!(keys, vec![(3, 0), (5, 1), (5, 2)]);
    }

    #[tokio::test]
    async fn test_push_respects_kind_and_account_filter() {
        let ledger = InMemoryLedger::new(10);
        let mut rx = ledger
            .subscribe(EventKind::InvoicePaid, EventFilter::account("0xissuer"))
            .await
            .unwrap();
        let mut other = ledger
            .subscribe(EventKind::InvoicePaid, EventFilter::account("0xsomeone"))
            .await
            .unwrap();

        ledger.append_event(create_test_event(EventKind::InvoiceCleared, 1, 0)).await;
        ledger.append_event(create_test_event(EventKind::InvoicePaid, 2, 0)).await;

        let received = rx.recv().await.unwrap();
        assert_eq!(received.block_number, 2);
        assert!(rx.try_recv().is_err());
        assert!(other.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_redeliver_pushes_duplicates() {
        let ledger = InMemoryLedger::new(10);
        let mut rx = ledger
            .subscribe(EventKind::InvoicePaid, EventFilter::account("0xpayer"))
            .await
            .unwrap();
        ledger.append_event(create_test_event(EventKind::InvoicePaid, 2, 0)).await;
        ledger.redeliver_all().await;

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first, second);
    }
}
