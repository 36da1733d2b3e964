//! Activity aggregator
//!
//! Produces one deduplicated, descending-by-timestamp activity list per
//! account, merged from three sources:
//! 1. the local cache (loaded first, for immediate display)
//! 2. a chunked backfill over the last K blocks
//! 3. live subscriptions, one per event kind
//!
//! plus a snapshot-reconciliation pass that synthesizes lifecycle records
//! from current entity state.
//!
//! Every merge runs against the latest in-memory list and the cache write
//! happens under the same lock, so the whole-snapshot cache never receives a
//! stale list. Source failures are logged and swallowed: the aggregator keeps
//! serving the best merged state it has.

use super::backfill::plan_block_ranges;
use super::merge::merge_records;
use super::timestamps::BlockTimestampCache;
use super::translate::{record_from_event, records_from_snapshot};
use crate::cache::CacheStore;
use crate::source::{EventFilter, LedgerEventSource};
use crate::types::{current_timestamp, ActivityRecord, EventKind, FixedAmount, LedgerEvent};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Backfill and snapshot passes tracked by the loading flag
const LOADING_STEPS: usize = 2;

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Number of most recent blocks covered by backfill
    pub lookback_blocks: u64,
    /// Upper bound on the span of one range query. The effective window is
    /// the smaller of this and the source's declared limit.
    pub max_block_window: u64,
    /// Bounded wait for every source call
    pub source_timeout: Duration,
    pub kinds: Vec<EventKind>,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            lookback_blocks: 10,
            max_block_window: 10,
            source_timeout: Duration::from_secs(5),
            kinds: EventKind::ALL.to_vec(),
        }
    }
}

/// Reactive projection consumed by the UI layer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActivityView {
    pub activities: Vec<ActivityRecord>,
    pub is_loading: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualifyingEvent {
    pub subject_id: String,
    pub volume: Option<FixedAmount>,
    pub block_number: Option<u64>,
}

/// Aggregator output consumed by the score reconciler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivitySignal {
    Qualifying(QualifyingEvent),
    /// Number of cleared entities visible in the latest snapshot
    ClearedCount(u32),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillReport {
    pub head: Option<u64>,
    pub ranges_queried: usize,
    pub ranges_failed: usize,
    pub events_seen: usize,
    pub records_changed: usize,
}

struct AggregatorInner {
    account: String,
    source: Arc<dyn LedgerEventSource>,
    cache: Arc<dyn CacheStore>,
    timestamps: BlockTimestampCache,
    records: Mutex<Vec<ActivityRecord>>,
    view_tx: watch::Sender<ActivityView>,
    signal_tx: Option<mpsc::Sender<ActivitySignal>>,
    pending: AtomicUsize,
    config: AggregatorConfig,
}

pub struct ActivityAggregator {
    inner: Arc<AggregatorInner>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl ActivityAggregator {
    /// `signal_tx` receives qualifying events and snapshot counts for the
    /// score reconciler; pass `None` when no reconciler is attached.
    pub fn new(
        account: &str,
        source: Arc<dyn LedgerEventSource>,
        cache: Arc<dyn CacheStore>,
        config: AggregatorConfig,
        signal_tx: Option<mpsc::Sender<ActivitySignal>>,
    ) -> Self {
        let (view_tx, _) = watch::channel(ActivityView::default());
        Self {
            inner: Arc::new(AggregatorInner {
                account: account.to_string(),
                source,
                cache,
                timestamps: BlockTimestampCache::new(config.source_timeout),
                records: Mutex::new(Vec::new()),
                view_tx,
                signal_tx,
                pending: AtomicUsize::new(0),
                config,
            }),
            tasks: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn account(&self) -> &str {
        &self.inner.account
    }

    /// Load the cache, then start backfill, snapshot reconciliation and live
    /// subscriptions in the background.
    ///
    /// Calling this again restarts all background work; that is the retry
    /// path after source failures.
    pub async fn activate(&self) {
        self.shutdown();

        let loaded = self.inner.load_cached().await;
        log::info!(
            "🚀 Activating activity for {} ({} cached records)",
            self.inner.account,
            loaded
        );

        self.inner.pending.store(LOADING_STEPS, Ordering::SeqCst);
        self.inner.publish_current().await;

        let mut handles = Vec::new();

        // Subscribe before backfilling so no gap opens between the two
        for kind in self.inner.config.kinds.clone() {
            let filter = EventFilter::account(&self.inner.account);
            match timeout(self.inner.config.source_timeout, self.inner.source.subscribe(kind, filter)).await {
                Ok(Ok(rx)) => {
                    let inner = self.inner.clone();
                    handles.push(tokio::spawn(async move {
                        inner.run_subscription(kind, rx).await;
                    }));
                }
                Ok(Err(e)) => {
                    log::warn!("⚠️  {} subscription unavailable for {}: {}", kind, self.inner.account, e);
                }
                Err(_) => {
                    log::warn!("⚠️  {} subscription timed out for {}", kind, self.inner.account);
                }
            }
        }

        let inner = self.inner.clone();
        handles.push(tokio::spawn(async move {
            inner.backfill().await;
            inner.finish_loading_step().await;
        }));

        let inner = self.inner.clone();
        handles.push(tokio::spawn(async move {
            inner.reconcile_snapshot().await;
            inner.finish_loading_step().await;
        }));

        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.extend(handles);
        }
    }

    /// Stop all background work. In-memory state and the cache are kept.
    pub fn shutdown(&self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for handle in tasks.drain(..) {
                handle.abort();
            }
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ActivityView> {
        self.inner.view_tx.subscribe()
    }

    pub fn view(&self) -> ActivityView {
        self.inner.view_tx.borrow().clone()
    }

    pub async fn load_cached(&self) -> usize {
        self.inner.load_cached().await
    }

    pub async fn run_backfill(&self) -> BackfillReport {
        self.inner.backfill().await
    }

    pub async fn reconcile_snapshot(&self) -> usize {
        self.inner.reconcile_snapshot().await
    }

    /// Merge one event (e.g. from a confirmed transaction receipt).
    /// Returns true when the timeline changed.
    pub async fn ingest_event(&self, event: &LedgerEvent) -> bool {
        match self.inner.translate(event).await {
            Some(record) => self.inner.apply(vec![record]).await > 0,
            None => false,
        }
    }

    pub async fn ingest_events(&self, events: &[LedgerEvent]) -> usize {
        let mut records = Vec::with_capacity(events.len());
        for event in events {
            if let Some(record) = self.inner.translate(event).await {
                records.push(record);
            }
        }
        self.inner.apply(records).await
    }
}

impl Drop for ActivityAggregator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl AggregatorInner {
    async fn load_cached(&self) -> usize {
        let cache = Arc::clone(&self.cache);
        let account = self.account.clone();
        let cached = match tokio::task::spawn_blocking(move || cache.load(&account)).await {
            Ok(Ok(records)) => records,
            Ok(Err(e)) => {
                log::warn!("⚠️  Failed to load cached activity for {}: {}", self.account, e);
                Vec::new()
            }
            Err(e) => {
                log::warn!("⚠️  Cache load task for {} failed: {}", self.account, e);
                Vec::new()
            }
        };
        let count = cached.len();

        let (changed, activities) = {
            let mut records = self.records.lock().await;
            let outcome = merge_records(&records, cached);
            *records = outcome.records;
            (outcome.changed, records.clone())
        };

        self.publish(activities);
        self.dispatch_qualifying(&changed).await;
        count
    }

    async fn translate(&self, event: &LedgerEvent) -> Option<ActivityRecord> {
        if !event.involves(&self.account) {
            return None;
        }
        let ts = self.timestamps.resolve(self.source.as_ref(), event.block_number).await;
        record_from_event(&self.account, event, ts.timestamp, ts.resolved)
    }

    /// Merge `incoming`, persist and publish. Returns the number of records
    /// added or upgraded.
    async fn apply(&self, incoming: Vec<ActivityRecord>) -> usize {
        if incoming.is_empty() {
            return 0;
        }

        let (changed, activities) = {
            let mut records = self.records.lock().await;
            let outcome = merge_records(&records, incoming);
            if outcome.is_unchanged() {
                return 0;
            }
            *records = outcome.records;

            // Saved before the lock is released so snapshots land in merge order
            let cache = Arc::clone(&self.cache);
            let account = self.account.clone();
            let snapshot = records.clone();
            match tokio::task::spawn_blocking(move || cache.save(&account, &snapshot)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::warn!("⚠️  Failed to persist activity for {}: {}", self.account, e),
                Err(e) => log::warn!("⚠️  Cache save task for {} failed: {}", self.account, e),
            }
            (outcome.changed, records.clone())
        };

        let count = changed.len();
        log::debug!("Merged {} activity records for {}", count, self.account);
        self.publish(activities);
        self.dispatch_qualifying(&changed).await;
        count
    }

    fn publish(&self, activities: Vec<ActivityRecord>) {
        let is_loading = self.pending.load(Ordering::SeqCst) > 0;
        self.view_tx.send_replace(ActivityView {
            activities,
            is_loading,
        });
    }

    async fn publish_current(&self) {
        let activities = self.records.lock().await.clone();
        self.publish(activities);
    }

    async fn finish_loading_step(&self) {
        let previous = self
            .pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if previous == Ok(1) {
            self.publish_current().await;
            log::info!("✅ Activity for {} loaded", self.account);
        }
    }

    async fn dispatch_qualifying(&self, records: &[ActivityRecord]) {
        let Some(tx) = &self.signal_tx else {
            return;
        };
        for record in records.iter().filter(|r| r.kind.is_qualifying()) {
            let event = QualifyingEvent {
                subject_id: record.subject_id.clone(),
                volume: record.amount,
                block_number: record.block_number,
            };
            if tx.send(ActivitySignal::Qualifying(event)).await.is_err() {
                log::debug!("Score reconciler detached; dropping qualifying events");
                return;
            }
        }
    }

    async fn run_subscription(&self, kind: EventKind, mut rx: mpsc::Receiver<LedgerEvent>) {
        log::info!("📡 Live {} subscription started for {}", kind, self.account);
        while let Some(event) = rx.recv().await {
            if let Some(record) = self.translate(&event).await {
                self.apply(vec![record]).await;
            }
        }
        log::warn!(
            "⚠️  {} subscription for {} closed, serving last known state",
            kind,
            self.account
        );
    }

    async fn backfill(&self) -> BackfillReport {
        let mut report = BackfillReport::default();

        let head = match timeout(self.config.source_timeout, self.source.current_block()).await {
            Ok(Ok(head)) => head,
            Ok(Err(e)) => {
                log::warn!("⚠️  Backfill skipped for {}: head lookup failed: {}", self.account, e);
                return report;
            }
            Err(_) => {
                log::warn!("⚠️  Backfill skipped for {}: head lookup timed out", self.account);
                return report;
            }
        };
        report.head = Some(head);

        let window = self
            .config
            .max_block_window
            .min(self.source.capabilities().max_block_window);
        let ranges = plan_block_ranges(head, self.config.lookback_blocks, window);

        let mut records = Vec::new();
        for kind in &self.config.kinds {
            for range in &ranges {
                report.ranges_queried += 1;
                let query = self.source.query_range(*kind, range.from, range.to);
                match timeout(self.config.source_timeout, query).await {
                    Ok(Ok(events)) => {
                        report.events_seen += events.len();
                        for event in &events {
                            if let Some(record) = self.translate(event).await {
                                records.push(record);
                            }
                        }
                    }
                    Ok(Err(e)) => {
                        report.ranges_failed += 1;
                        log::warn!(
                            "⚠️  Backfill {} [{}, {}] failed: {}",
                            kind,
                            range.from,
                            range.to,
                            e
                        );
                    }
                    Err(_) => {
                        report.ranges_failed += 1;
                        log::warn!("⚠️  Backfill {} [{}, {}] timed out", kind, range.from, range.to);
                    }
                }
            }
        }

        report.records_changed = self.apply(records).await;
        log::info!(
            "📥 Backfill for {} up to block {}: {} ranges ({} failed), {} events, {} new records",
            self.account,
            head,
            report.ranges_queried,
            report.ranges_failed,
            report.events_seen,
            report.records_changed
        );
        report
    }

    async fn reconcile_snapshot(&self) -> usize {
        if !self.source.capabilities().supports_snapshots {
            log::debug!("Source has no entity snapshots; skipping reconciliation");
            return 0;
        }

        let entities = match timeout(self.config.source_timeout, self.source.read_snapshot(&self.account)).await {
            Ok(Ok(entities)) => entities,
            Ok(Err(e)) => {
                log::warn!("⚠️  Snapshot read failed for {}: {}", self.account, e);
                return 0;
            }
            Err(_) => {
                log::warn!("⚠️  Snapshot read timed out for {}", self.account);
                return 0;
            }
        };

        let now = current_timestamp();
        let records: Vec<ActivityRecord> = entities
            .iter()
            .flat_map(|entity| records_from_snapshot(&self.account, entity, now))
            .collect();
        let cleared = records.iter().filter(|r| r.kind.is_qualifying()).count() as u32;

        let changed = self.apply(records).await;
        log::info!(
            "🧾 Snapshot reconciliation for {}: {} entities, {} cleared, {} new records",
            self.account,
            entities.len(),
            cleared,
            changed
        );

        if let Some(tx) = &self.signal_tx {
            if tx.send(ActivitySignal::ClearedCount(cleared)).await.is_err() {
                log::debug!("Score reconciler detached; dropping snapshot count");
            }
        }
        changed
    }
}
