//! Per-account reconciliation context
//!
//! An [`AccountSession`] owns everything derived for one account: its
//! activity aggregator, score reconciler and refresh scheduler. Nothing is
//! shared between accounts except the ledger source and the cache store
//! (which is keyed by account), so switching accounts through
//! [`SessionManager`] cannot leak state from one account into another.

use crate::activity::{ActivityAggregator, ActivitySignal, ActivityView, AggregatorConfig};
use crate::cache::CacheStore;
use crate::reputation::{ScoreReconciler, ScoreView};
use crate::scheduler::Scheduler;
use crate::source::LedgerEventSource;
use crate::tx::TxCompletion;
use crate::types::same_address;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;

const SIGNAL_BUFFER: usize = 256;
const SCORE_REFRESH_KEY: &str = "authoritative_score";
const SNAPSHOT_REFRESH_KEY: &str = "entity_snapshot";

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub aggregator: AggregatorConfig,
    /// Quiet period before refreshing score and snapshot after a confirmed
    /// transaction
    pub refresh_debounce: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            aggregator: AggregatorConfig::default(),
            refresh_debounce: Duration::from_millis(2_000),
        }
    }
}

struct SessionInner {
    account: String,
    source: Arc<dyn LedgerEventSource>,
    aggregator: ActivityAggregator,
    reconciler: Mutex<ScoreReconciler>,
    scheduler: Scheduler,
    config: SessionConfig,
}

pub struct AccountSession {
    inner: Arc<SessionInner>,
    score_rx: watch::Receiver<ScoreView>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl AccountSession {
    /// Build the session and activate it: cached activity is visible when
    /// this returns, backfill and subscriptions continue in the background.
    pub async fn start(
        account: &str,
        source: Arc<dyn LedgerEventSource>,
        cache: Arc<dyn CacheStore>,
        config: SessionConfig,
    ) -> Self {
        log::info!("👤 Starting session for {}", account);

        let (signal_tx, mut signal_rx) = mpsc::channel::<ActivitySignal>(SIGNAL_BUFFER);
        let reconciler = ScoreReconciler::new();
        let score_rx = reconciler.subscribe();

        let aggregator = ActivityAggregator::new(
            account,
            source.clone(),
            cache,
            config.aggregator.clone(),
            Some(signal_tx),
        );

        let inner = Arc::new(SessionInner {
            account: account.to_string(),
            source,
            aggregator,
            reconciler: Mutex::new(reconciler),
            scheduler: Scheduler::new(),
            config,
        });

        // Signals are applied in arrival order by a single consumer
        let pump = {
            let inner = inner.clone();
            tokio::spawn(async move {
                while let Some(signal) = signal_rx.recv().await {
                    inner.reconciler.lock().await.apply(signal);
                }
            })
        };

        let session = Self {
            inner,
            score_rx,
            tasks: std::sync::Mutex::new(vec![pump]),
        };

        session.inner.aggregator.activate().await;

        let inner = session.inner.clone();
        session.inner.scheduler.schedule(Duration::ZERO, async move {
            inner.refresh_authoritative_score().await;
        });

        session
    }

    pub fn account(&self) -> &str {
        &self.inner.account
    }

    /// `{activities, is_loading}` projection
    pub fn activities(&self) -> watch::Receiver<ActivityView> {
        self.inner.aggregator.subscribe()
    }

    pub fn activity_view(&self) -> ActivityView {
        self.inner.aggregator.view()
    }

    /// `{score, tier, provisional}` projection
    pub fn score(&self) -> watch::Receiver<ScoreView> {
        self.score_rx.clone()
    }

    pub fn score_view(&self) -> ScoreView {
        *self.score_rx.borrow()
    }

    pub fn aggregator(&self) -> &ActivityAggregator {
        &self.inner.aggregator
    }

    /// Read the authoritative score now. Returns false when the source has
    /// no score reads or the read failed.
    pub async fn refresh_authoritative_score(&self) -> bool {
        self.inner.refresh_authoritative_score().await
    }

    /// Merge the events of a confirmed transaction and schedule debounced
    /// score and snapshot refreshes
    pub async fn on_transaction_confirmed(&self, completion: &TxCompletion) {
        SessionInner::handle_completion(&self.inner, completion).await;
    }

    /// Feed confirmed transactions from a tracker into this session
    pub fn attach_tracker(&self, mut completions: broadcast::Receiver<TxCompletion>) {
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            loop {
                match completions.recv().await {
                    Ok(completion) => SessionInner::handle_completion(&inner, &completion).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        log::warn!("⚠️  Session {} missed {} transaction completions", inner.account, skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.push(handle);
        }
    }

    /// Stop all background work for this account
    pub fn shutdown(&self) {
        self.inner.aggregator.shutdown();
        self.inner.scheduler.cancel_all();
        if let Ok(mut tasks) = self.tasks.lock() {
            for handle in tasks.drain(..) {
                handle.abort();
            }
        }
        log::info!("👋 Session for {} stopped", self.inner.account);
    }
}

impl Drop for AccountSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl SessionInner {
    async fn refresh_authoritative_score(&self) -> bool {
        if !self.source.capabilities().supports_score_reads {
            log::debug!("Source has no score reads; keeping local score");
            return false;
        }

        let read = self.source.read_score(&self.account);
        match timeout(self.config.aggregator.source_timeout, read).await {
            Ok(Ok(score)) => {
                log::info!(
                    "📊 Authoritative score for {}: {} (as of block {:?})",
                    self.account,
                    score.score,
                    score.as_of_block
                );
                self.reconciler.lock().await.on_authoritative_score(score);
                true
            }
            Ok(Err(e)) => {
                log::warn!("⚠️  Score read failed for {}: {}", self.account, e);
                false
            }
            Err(_) => {
                log::warn!("⚠️  Score read timed out for {}", self.account);
                false
            }
        }
    }

    async fn handle_completion(inner: &Arc<SessionInner>, completion: &TxCompletion) {
        let merged = inner.aggregator.ingest_events(&completion.events).await;
        log::info!(
            "🧩 Transaction {} confirmed for {}: {} activity records merged",
            completion.tx_hash,
            inner.account,
            merged
        );

        let window = inner.config.refresh_debounce;

        let score_inner = inner.clone();
        inner.scheduler.debounce(SCORE_REFRESH_KEY, window, async move {
            score_inner.refresh_authoritative_score().await;
        });

        let snapshot_inner = inner.clone();
        inner.scheduler.debounce(SNAPSHOT_REFRESH_KEY, window, async move {
            snapshot_inner.aggregator.reconcile_snapshot().await;
        });
    }
}

/// Holds the active account session and tears it down on switch
pub struct SessionManager {
    source: Arc<dyn LedgerEventSource>,
    cache: Arc<dyn CacheStore>,
    config: SessionConfig,
    current: Mutex<Option<Arc<AccountSession>>>,
}

impl SessionManager {
    pub fn new(source: Arc<dyn LedgerEventSource>, cache: Arc<dyn CacheStore>, config: SessionConfig) -> Self {
        Self {
            source,
            cache,
            config,
            current: Mutex::new(None),
        }
    }

    /// Activate `account`, stopping the previous session if it belongs to a
    /// different account. Switching to the active account reactivates it,
    /// which is the retry path after source failures.
    pub async fn switch_account(&self, account: &str) -> Arc<AccountSession> {
        let mut current = self.current.lock().await;

        if let Some(session) = current.as_ref() {
            if same_address(session.account(), account) {
                session.inner.aggregator.activate().await;
                return session.clone();
            }
        }

        if let Some(previous) = current.take() {
            log::info!("🔀 Switching account {} -> {}", previous.account(), account);
            previous.shutdown();
        }

        let session = Arc::new(
            AccountSession::start(account, self.source.clone(), self.cache.clone(), self.config.clone()).await,
        );
        *current = Some(session.clone());
        session
    }

    pub async fn current(&self) -> Option<Arc<AccountSession>> {
        self.current.lock().await.clone()
    }

    pub async fn close(&self) {
        if let Some(session) = self.current.lock().await.take() {
            session.shutdown();
        }
    }
}
