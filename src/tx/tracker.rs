//! Transaction lifecycle tracking
//!
//! ```text
//! Idle -> Submitting -> { Submitted(hash) | Ambiguous | Rejected }
//! Submitted(hash) -> Confirming(hash) -> { Confirmed | Reverted }
//! ```
//!
//! Attempts are keyed by the fingerprint of their request. While an attempt
//! is in flight, ambiguous or confirmed, a second submit with the same
//! fingerprint joins it instead of reaching the signer again. Rejected and
//! reverted attempts release their fingerprint immediately; confirmed and
//! abandoned ones release it once `fingerprint_ttl` has elapsed.
//!
//! A caller may drop a `submit` or `await_confirmation` future at any point.
//! The attempt then falls back to a state someone can act on: an interrupted
//! submission becomes `Ambiguous` and an interrupted receipt wait returns to
//! `Submitted(hash)`.

use super::classify::{classify_submit_error, decode_revert_reason, SubmitFailureClass};
use super::fingerprint::{Fingerprint, TxRequest};
use super::signer::{ReceiptError, ReceiptStatus, Signer};
use crate::types::LedgerEvent;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::time::{timeout, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionState {
    Idle,
    Submitting,
    Submitted(String),
    /// Neither success nor failure is known. Never retried automatically.
    Ambiguous,
    Confirming(String),
    Confirmed(String),
    Reverted { tx_hash: String, reason: String },
    Rejected { reason: String },
}

impl TransactionState {
    pub fn tx_hash(&self) -> Option<&str> {
        match self {
            TransactionState::Submitted(hash)
            | TransactionState::Confirming(hash)
            | TransactionState::Confirmed(hash)
            | TransactionState::Reverted { tx_hash: hash, .. } => Some(hash),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionState::Confirmed(_) | TransactionState::Reverted { .. } | TransactionState::Rejected { .. }
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            TransactionState::Idle => "idle",
            TransactionState::Submitting => "submitting",
            TransactionState::Submitted(_) => "submitted",
            TransactionState::Ambiguous => "ambiguous",
            TransactionState::Confirming(_) => "confirming",
            TransactionState::Confirmed(_) => "confirmed",
            TransactionState::Reverted { .. } => "reverted",
            TransactionState::Rejected { .. } => "rejected",
        }
    }

    fn is_submitting(&self) -> bool {
        matches!(self, TransactionState::Idle | TransactionState::Submitting)
    }

    fn is_failed(&self) -> bool {
        matches!(self, TransactionState::Reverted { .. } | TransactionState::Rejected { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionAttempt {
    pub fingerprint: Fingerprint,
    pub request: TxRequest,
    pub state: TransactionState,
    /// Every state the attempt has been in, oldest first
    pub history: Vec<TransactionState>,
    /// Explicit gas limit used for the last submit, if any
    pub gas_limit: Option<u64>,
    pub abandoned: bool,
}

impl TransactionAttempt {
    fn new(fingerprint: Fingerprint, request: TxRequest) -> Self {
        Self {
            fingerprint,
            request,
            state: TransactionState::Idle,
            history: vec![TransactionState::Idle],
            gas_limit: None,
            abandoned: false,
        }
    }

    fn advance(&mut self, state: TransactionState) {
        self.history.push(state.clone());
        self.state = state;
    }
}

/// Published when a transaction is confirmed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxCompletion {
    pub fingerprint: Fingerprint,
    pub tx_hash: String,
    pub block_number: u64,
    pub events: Vec<LedgerEvent>,
}

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub fallback_gas_limit: u64,
    pub submit_timeout: Duration,
    pub receipt_timeout: Duration,
    pub fingerprint_ttl: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            fallback_gas_limit: 500_000,
            submit_timeout: Duration::from_secs(30),
            receipt_timeout: Duration::from_secs(120),
            fingerprint_ttl: Duration::from_secs(600),
        }
    }
}

#[derive(Debug)]
pub enum TrackerError {
    UnknownFingerprint(Fingerprint),
    NotAmbiguous(Fingerprint),
    /// The attempt is past the point where this engine can cancel it
    NotCancellable(Fingerprint),
    /// Confirmation requested before a transaction hash is known
    NotSubmitted(Fingerprint),
    Receipt(ReceiptError),
}

impl std::fmt::Display for TrackerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackerError::UnknownFingerprint(fp) => write!(f, "No attempt with fingerprint {}", fp),
            TrackerError::NotAmbiguous(fp) => write!(f, "Attempt {} is not ambiguous", fp),
            TrackerError::NotCancellable(fp) => write!(f, "Attempt {} can no longer be abandoned", fp),
            TrackerError::NotSubmitted(fp) => write!(f, "Attempt {} has no transaction hash", fp),
            TrackerError::Receipt(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for TrackerError {}

impl From<ReceiptError> for TrackerError {
    fn from(e: ReceiptError) -> Self {
        TrackerError::Receipt(e)
    }
}

struct AttemptSlot {
    tx: Arc<watch::Sender<TransactionAttempt>>,
    /// Set when the attempt became terminal or was abandoned
    settled_at: Option<Instant>,
}

impl AttemptSlot {
    fn new(attempt: TransactionAttempt) -> Self {
        let (tx, _) = watch::channel(attempt);
        Self {
            tx: Arc::new(tx),
            settled_at: None,
        }
    }

    fn snapshot(&self) -> TransactionAttempt {
        self.tx.borrow().clone()
    }

    fn blocks_duplicates(&self) -> bool {
        !self.tx.borrow().state.is_failed()
    }

    fn expired(&self, now: Instant, ttl: Duration) -> bool {
        let attempt = self.tx.borrow();
        let driven = matches!(
            attempt.state,
            TransactionState::Submitting | TransactionState::Confirming(_)
        );
        (attempt.abandoned || !driven) && self.settled_at.is_some_and(|at| now.duration_since(at) >= ttl)
    }
}

/// Moves an attempt out of `phase` into `fallback` if the future driving it
/// is dropped before it advanced the attempt itself
struct PhaseGuard {
    tx: Arc<watch::Sender<TransactionAttempt>>,
    phase: TransactionState,
    fallback: TransactionState,
}

impl Drop for PhaseGuard {
    fn drop(&mut self) {
        let phase = &self.phase;
        let fallback = &self.fallback;
        self.tx.send_if_modified(|attempt| {
            if attempt.state != *phase {
                return false;
            }
            log::warn!(
                "⚠️  Attempt {} interrupted while {}, now {}",
                attempt.fingerprint.short(),
                phase.label(),
                fallback.label()
            );
            attempt.advance(fallback.clone());
            true
        });
    }
}

enum ConfirmStep {
    Drive(String, Arc<watch::Sender<TransactionAttempt>>),
    Wait(watch::Receiver<TransactionAttempt>),
    Done(TransactionAttempt),
}

pub struct TransactionTracker {
    signer: Arc<dyn Signer>,
    config: TrackerConfig,
    attempts: Mutex<HashMap<Fingerprint, AttemptSlot>>,
    completions: broadcast::Sender<TxCompletion>,
}

impl TransactionTracker {
    pub fn new(signer: Arc<dyn Signer>, config: TrackerConfig) -> Self {
        let (completions, _) = broadcast::channel(64);
        Self {
            signer,
            config,
            attempts: Mutex::new(HashMap::new()),
            completions,
        }
    }

    /// Submit `request`, or join the existing attempt with the same
    /// fingerprint. Returns once the submission phase has settled.
    pub async fn submit(&self, request: TxRequest) -> Result<TransactionAttempt, TrackerError> {
        let fingerprint = request.fingerprint();

        let entry = {
            let mut attempts = self.attempts.lock().await;
            self.prune_locked(&mut attempts);
            match attempts.get(&fingerprint) {
                Some(slot) if slot.blocks_duplicates() => Err(slot.tx.subscribe()),
                _ => {
                    let mut attempt = TransactionAttempt::new(fingerprint.clone(), request.clone());
                    attempt.advance(TransactionState::Submitting);
                    let slot = AttemptSlot::new(attempt);
                    let tx = slot.tx.clone();
                    attempts.insert(fingerprint.clone(), slot);
                    Ok(tx)
                }
            }
        };

        let tx = match entry {
            Ok(tx) => tx,
            Err(rx) => {
                log::info!("🔁 Duplicate submission {} joined the existing attempt", fingerprint.short());
                let attempt = self
                    .wait_until(rx, self.config.submit_timeout, |state| !state.is_submitting())
                    .await;
                return Ok(attempt);
            }
        };

        // The request may already have reached the signer
        let _guard = PhaseGuard {
            tx,
            phase: TransactionState::Submitting,
            fallback: TransactionState::Ambiguous,
        };
        self.drive_submission(&fingerprint, &request).await
    }

    /// Submit and, if a hash is obtained, wait for the receipt
    pub async fn submit_and_confirm(&self, request: TxRequest) -> Result<TransactionAttempt, TrackerError> {
        let attempt = self.submit(request).await?;
        match attempt.state {
            TransactionState::Submitted(_) | TransactionState::Confirming(_) => {
                self.await_confirmation(&attempt.fingerprint).await
            }
            _ => Ok(attempt),
        }
    }

    /// Wait for the receipt of a submitted attempt.
    ///
    /// On receipt timeout or transport failure the attempt returns to
    /// `Submitted` so confirmation can be awaited again.
    pub async fn await_confirmation(&self, fingerprint: &Fingerprint) -> Result<TransactionAttempt, TrackerError> {
        let step = {
            let attempts = self.attempts.lock().await;
            let slot = attempts
                .get(fingerprint)
                .ok_or_else(|| TrackerError::UnknownFingerprint(fingerprint.clone()))?;
            let attempt = slot.snapshot();
            match &attempt.state {
                TransactionState::Submitted(hash) => {
                    let hash = hash.clone();
                    let confirming = TransactionState::Confirming(hash.clone());
                    slot.tx.send_modify(|a| a.advance(confirming));
                    ConfirmStep::Drive(hash, slot.tx.clone())
                }
                TransactionState::Confirming(_) => ConfirmStep::Wait(slot.tx.subscribe()),
                TransactionState::Confirmed(_) | TransactionState::Reverted { .. } => ConfirmStep::Done(attempt.clone()),
                _ => return Err(TrackerError::NotSubmitted(fingerprint.clone())),
            }
        };

        let (hash, tx) = match step {
            ConfirmStep::Done(attempt) => return Ok(attempt),
            ConfirmStep::Wait(rx) => {
                let attempt = self
                    .wait_until(rx, self.config.receipt_timeout, |state| {
                        !matches!(state, TransactionState::Confirming(_))
                    })
                    .await;
                return Ok(attempt);
            }
            ConfirmStep::Drive(hash, tx) => (hash, tx),
        };

        // Returns the attempt to Submitted on every exit short of a receipt
        let _guard = PhaseGuard {
            tx,
            phase: TransactionState::Confirming(hash.clone()),
            fallback: TransactionState::Submitted(hash.clone()),
        };

        log::info!("⏳ Awaiting receipt for {}", hash);
        let receipt = match timeout(self.config.receipt_timeout, self.signer.wait_for_receipt(&hash)).await {
            Ok(Ok(receipt)) => receipt,
            Ok(Err(e)) => {
                log::warn!("⚠️  Receipt for {} unavailable: {}", hash, e);
                return Err(TrackerError::Receipt(e));
            }
            Err(_) => {
                log::warn!(
                    "⚠️  No receipt for {} after {}s",
                    hash,
                    self.config.receipt_timeout.as_secs()
                );
                return Err(TrackerError::Receipt(ReceiptError::Timeout));
            }
        };

        match receipt.status {
            ReceiptStatus::Success => {
                let attempt = self
                    .modify(fingerprint, |a| a.advance(TransactionState::Confirmed(hash.clone())))
                    .await?;
                log::info!("✅ Transaction {} confirmed in block {}", hash, receipt.block_number);

                let completion = TxCompletion {
                    fingerprint: fingerprint.clone(),
                    tx_hash: hash,
                    block_number: receipt.block_number,
                    events: receipt.events,
                };
                if self.completions.send(completion).is_err() {
                    log::debug!("No completion listeners attached");
                }
                Ok(attempt)
            }
            ReceiptStatus::Reverted { revert_data } => {
                let reason = revert_data
                    .as_deref()
                    .and_then(decode_revert_reason)
                    .unwrap_or_else(|| "Transaction reverted".to_string());
                log::warn!("❌ Transaction {} reverted: {}", hash, reason);
                self.modify(fingerprint, |a| {
                    a.advance(TransactionState::Reverted {
                        tx_hash: hash.clone(),
                        reason,
                    })
                })
                .await
            }
        }
    }

    /// Give up on a `Submitting` or `Ambiguous` attempt. The fingerprint
    /// keeps blocking duplicates until the retention period elapses, even if
    /// a submission is still outstanding.
    pub async fn abandon(&self, fingerprint: &Fingerprint) -> Result<TransactionAttempt, TrackerError> {
        let mut attempts = self.attempts.lock().await;
        let slot = attempts
            .get_mut(fingerprint)
            .ok_or_else(|| TrackerError::UnknownFingerprint(fingerprint.clone()))?;

        let cancellable = matches!(
            slot.tx.borrow().state,
            TransactionState::Submitting | TransactionState::Ambiguous
        );
        if !cancellable {
            return Err(TrackerError::NotCancellable(fingerprint.clone()));
        }

        slot.tx.send_modify(|a| a.abandoned = true);
        slot.settled_at = Some(Instant::now());
        log::info!("🛑 Abandoned attempt {}", fingerprint.short());
        Ok(slot.snapshot())
    }

    /// Settle an ambiguous attempt after out-of-band discovery.
    ///
    /// `Some(hash)` resumes the attempt as `Submitted(hash)`; `None` means the
    /// transaction was never broadcast and releases the fingerprint.
    pub async fn resolve_ambiguous(
        &self,
        fingerprint: &Fingerprint,
        tx_hash: Option<String>,
    ) -> Result<Option<TransactionAttempt>, TrackerError> {
        let mut attempts = self.attempts.lock().await;
        let slot = attempts
            .get_mut(fingerprint)
            .ok_or_else(|| TrackerError::UnknownFingerprint(fingerprint.clone()))?;

        let ambiguous = slot.tx.borrow().state == TransactionState::Ambiguous;
        if !ambiguous {
            return Err(TrackerError::NotAmbiguous(fingerprint.clone()));
        }

        match tx_hash {
            Some(hash) => {
                let hash = hash.to_ascii_lowercase();
                log::info!("🔎 Ambiguous attempt {} resolved to {}", fingerprint.short(), hash);
                slot.tx.send_modify(|a| {
                    a.abandoned = false;
                    a.advance(TransactionState::Submitted(hash));
                });
                slot.settled_at = None;
                Ok(Some(slot.snapshot()))
            }
            None => {
                attempts.remove(fingerprint);
                log::info!("🔓 Ambiguous attempt {} released", fingerprint.short());
                Ok(None)
            }
        }
    }

    pub async fn attempt(&self, fingerprint: &Fingerprint) -> Option<TransactionAttempt> {
        self.attempts.lock().await.get(fingerprint).map(AttemptSlot::snapshot)
    }

    /// State transitions of one attempt
    pub async fn subscribe(&self, fingerprint: &Fingerprint) -> Option<watch::Receiver<TransactionAttempt>> {
        self.attempts.lock().await.get(fingerprint).map(|slot| slot.tx.subscribe())
    }

    pub fn subscribe_completions(&self) -> broadcast::Receiver<TxCompletion> {
        self.completions.subscribe()
    }

    /// Drop fingerprints whose retention period has elapsed
    pub async fn prune_expired(&self) -> usize {
        let mut attempts = self.attempts.lock().await;
        self.prune_locked(&mut attempts)
    }

    fn prune_locked(&self, attempts: &mut HashMap<Fingerprint, AttemptSlot>) -> usize {
        let now = Instant::now();
        let before = attempts.len();
        attempts.retain(|_, slot| !slot.expired(now, self.config.fingerprint_ttl));
        let pruned = before - attempts.len();
        if pruned > 0 {
            log::debug!("Released {} expired fingerprints", pruned);
        }
        pruned
    }

    async fn drive_submission(
        &self,
        fingerprint: &Fingerprint,
        request: &TxRequest,
    ) -> Result<TransactionAttempt, TrackerError> {
        let capabilities = self.signer.capabilities();
        let mut gas_limit = None;
        log::info!(
            "📤 Submitting {} via {} ({})",
            request.method,
            capabilities.label,
            fingerprint.short()
        );

        let next = loop {
            let error = match timeout(self.config.submit_timeout, self.signer.submit(request, gas_limit)).await {
                Ok(Ok(hash)) => break TransactionState::Submitted(hash.to_ascii_lowercase()),
                Ok(Err(error)) => error,
                Err(_) => {
                    log::warn!("⚠️  Submit for {} timed out, outcome unknown", fingerprint.short());
                    break TransactionState::Ambiguous;
                }
            };

            match classify_submit_error(&error) {
                SubmitFailureClass::AlreadyKnown(Some(hash)) => {
                    log::info!("♻️  Signer reports {} already known as {}", fingerprint.short(), hash);
                    break TransactionState::Submitted(hash);
                }
                SubmitFailureClass::AlreadyKnown(None) | SubmitFailureClass::Unknown => {
                    log::warn!("⚠️  Submission {} is ambiguous: {}", fingerprint.short(), error);
                    break TransactionState::Ambiguous;
                }
                SubmitFailureClass::GasEstimation if gas_limit.is_none() && capabilities.supports_gas_override => {
                    let fallback = self.config.fallback_gas_limit;
                    log::warn!(
                        "⚠️  Gas estimation failed for {}, retrying with limit {}",
                        fingerprint.short(),
                        fallback
                    );
                    gas_limit = Some(fallback);
                    self.modify(fingerprint, move |a| a.gas_limit = Some(fallback)).await?;
                }
                SubmitFailureClass::GasEstimation => {
                    break TransactionState::Rejected {
                        reason: format!("Gas estimation failed: {}", error.message),
                    };
                }
                SubmitFailureClass::UserRejected => {
                    break TransactionState::Rejected {
                        reason: "Rejected by user".to_string(),
                    };
                }
                SubmitFailureClass::InvalidParams => {
                    break TransactionState::Rejected {
                        reason: format!("Invalid parameters: {}", error.message),
                    };
                }
            }
        };

        log::info!("📨 Attempt {} is {}", fingerprint.short(), next.label());
        self.modify(fingerprint, |a| a.advance(next)).await
    }

    async fn modify<F>(&self, fingerprint: &Fingerprint, f: F) -> Result<TransactionAttempt, TrackerError>
    where
        F: FnOnce(&mut TransactionAttempt),
    {
        let mut attempts = self.attempts.lock().await;
        let slot = attempts
            .get_mut(fingerprint)
            .ok_or_else(|| TrackerError::UnknownFingerprint(fingerprint.clone()))?;
        slot.tx.send_modify(f);

        let terminal = slot.tx.borrow().state.is_terminal();
        if terminal && slot.settled_at.is_none() {
            slot.settled_at = Some(Instant::now());
        }
        Ok(slot.snapshot())
    }

    async fn wait_until<F>(
        &self,
        mut rx: watch::Receiver<TransactionAttempt>,
        limit: Duration,
        mut done: F,
    ) -> TransactionAttempt
    where
        F: FnMut(&TransactionState) -> bool,
    {
        let settled = timeout(limit, rx.wait_for(|attempt| done(&attempt.state)))
            .await
            .ok()
            .and_then(|result| result.ok())
            .map(|attempt| TransactionAttempt::clone(&attempt));
        settled.unwrap_or_else(|| rx.borrow().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx::classify::SubmitError;
    use crate::tx::signer::{Receipt, SignerCapabilities};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const HASH: &str = "0x1111111111111111111111111111111111111111111111111111111111111111";

    struct ScriptedSigner {
        supports_gas_override: bool,
        submit_results: std::sync::Mutex<VecDeque<Result<String, SubmitError>>>,
        receipts: std::sync::Mutex<HashMap<String, Receipt>>,
        gas_limits: std::sync::Mutex<Vec<Option<u64>>>,
        submit_calls: AtomicUsize,
        submit_delay: Duration,
        receipt_delay: Duration,
    }

    impl ScriptedSigner {
        fn new(results: Vec<Result<String, SubmitError>>) -> Self {
            Self {
                supports_gas_override: true,
                submit_results: std::sync::Mutex::new(results.into()),
                receipts: std::sync::Mutex::new(HashMap::new()),
                gas_limits: std::sync::Mutex::new(Vec::new()),
                submit_calls: AtomicUsize::new(0),
                submit_delay: Duration::ZERO,
                receipt_delay: Duration::ZERO,
            }
        }

        fn with_receipt(self, status: ReceiptStatus) -> Self {
            self.receipts.lock().unwrap().insert(
                HASH.to_string(),
                Receipt {
                    tx_hash: HASH.to_string(),
                    block_number: 42,
                    status,
                    events: Vec::new(),
                },
            );
            self
        }

        fn calls(&self) -> usize {
            self.submit_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Signer for ScriptedSigner {
        fn capabilities(&self) -> SignerCapabilities {
            SignerCapabilities {
                supports_gas_override: self.supports_gas_override,
                label: "scripted".to_string(),
            }
        }

        async fn submit(&self, _request: &TxRequest, gas_limit: Option<u64>) -> Result<String, SubmitError> {
            self.submit_calls.fetch_add(1, Ordering::SeqCst);
            self.gas_limits.lock().unwrap().push(gas_limit);
            if !self.submit_delay.is_zero() {
                tokio::time::sleep(self.submit_delay).await;
            }
            let next = self.submit_results.lock().unwrap().pop_front();
            next.unwrap_or_else(|| Ok(HASH.to_string()))
        }

        async fn wait_for_receipt(&self, tx_hash: &str) -> Result<Receipt, ReceiptError> {
            if !self.receipt_delay.is_zero() {
                tokio::time::sleep(self.receipt_delay).await;
            }
            self.receipts
                .lock()
                .unwrap()
                .get(tx_hash)
                .cloned()
                .ok_or_else(|| ReceiptError::Transport("receipt not found".to_string()))
        }
    }

    fn create_test_request() -> TxRequest {
        TxRequest::new("0xledger", "clearInvoice", vec!["7".to_string()])
    }

    fn create_tracker(signer: Arc<ScriptedSigner>) -> TransactionTracker {
        TransactionTracker::new(signer, TrackerConfig::default())
    }

    #[tokio::test]
    async fn test_already_known_recovers_hash() {
        let dead = format!("0xdead{}", "beef".repeat(15));
        let signer = Arc::new(ScriptedSigner::new(vec![Err(SubmitError::new(format!(
            "already known: {}",
            dead
        )))]));
        let tracker = create_tracker(signer.clone());

        let attempt = tracker.submit(create_test_request()).await.unwrap();
        assert_eq!(attempt.state, TransactionState::Submitted(dead));
        assert_eq!(signer.calls(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_duplicate_submits_once() {
        let mut signer = ScriptedSigner::new(Vec::new());
        signer.submit_delay = Duration::from_millis(50);
        let signer = Arc::new(signer);
        let tracker = create_tracker(signer.clone());

        let (first, second) = tokio::join!(
            tracker.submit(create_test_request()),
            tracker.submit(create_test_request())
        );

        assert_eq!(signer.calls(), 1);
        assert_eq!(first.unwrap().state, TransactionState::Submitted(HASH.to_string()));
        assert_eq!(second.unwrap().state, TransactionState::Submitted(HASH.to_string()));
    }

    #[tokio::test]
    async fn test_gas_estimation_retries_once_with_fallback() {
        let signer = Arc::new(ScriptedSigner::new(vec![
            Err(SubmitError::new("cannot estimate gas")),
            Err(SubmitError::new("cannot estimate gas")),
        ]));
        let tracker = create_tracker(signer.clone());

        let attempt = tracker.submit(create_test_request()).await.unwrap();
        assert!(matches!(attempt.state, TransactionState::Rejected { .. }));
        assert_eq!(attempt.gas_limit, Some(500_000));
        assert_eq!(*signer.gas_limits.lock().unwrap(), vec![None, Some(500_000)]);
    }

    #[tokio::test]
    async fn test_gas_retry_succeeds() {
        let signer = Arc::new(ScriptedSigner::new(vec![Err(SubmitError::new("gas required exceeds allowance"))]));
        let tracker = create_tracker(signer.clone());

        let attempt = tracker.submit(create_test_request()).await.unwrap();
        assert_eq!(attempt.state, TransactionState::Submitted(HASH.to_string()));
        assert_eq!(signer.calls(), 2);
    }

    #[tokio::test]
    async fn test_no_gas_retry_without_override() {
        let mut signer = ScriptedSigner::new(vec![Err(SubmitError::new("cannot estimate gas"))]);
        signer.supports_gas_override = false;
        let signer = Arc::new(signer);
        let tracker = create_tracker(signer.clone());

        let attempt = tracker.submit(create_test_request()).await.unwrap();
        assert!(matches!(attempt.state, TransactionState::Rejected { .. }));
        assert_eq!(signer.calls(), 1);
    }

    #[tokio::test]
    async fn test_user_rejection_is_terminal_and_releases_fingerprint() {
        let signer = Arc::new(ScriptedSigner::new(vec![Err(SubmitError::new("User rejected the request"))]));
        let tracker = create_tracker(signer.clone());

        let rejected = tracker.submit(create_test_request()).await.unwrap();
        assert_eq!(
            rejected.state,
            TransactionState::Rejected {
                reason: "Rejected by user".to_string()
            }
        );

        let retried = tracker.submit(create_test_request()).await.unwrap();
        assert_eq!(retried.state, TransactionState::Submitted(HASH.to_string()));
        assert_eq!(signer.calls(), 2);
    }

    #[tokio::test]
    async fn test_ambiguous_blocks_resubmission_until_resolved() {
        let signer = Arc::new(
            ScriptedSigner::new(vec![Err(SubmitError::new("connection reset"))]).with_receipt(ReceiptStatus::Success),
        );
        let tracker = create_tracker(signer.clone());

        let first = tracker.submit(create_test_request()).await.unwrap();
        assert_eq!(first.state, TransactionState::Ambiguous);

        let second = tracker.submit(create_test_request()).await.unwrap();
        assert_eq!(second.state, TransactionState::Ambiguous);
        assert_eq!(signer.calls(), 1);

        let resumed = tracker
            .resolve_ambiguous(&first.fingerprint, Some(HASH.to_string()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resumed.state, TransactionState::Submitted(HASH.to_string()));

        let mut completions = tracker.subscribe_completions();
        let confirmed = tracker.await_confirmation(&first.fingerprint).await.unwrap();
        assert_eq!(confirmed.state, TransactionState::Confirmed(HASH.to_string()));
        assert_eq!(completions.recv().await.unwrap().block_number, 42);
    }

    #[tokio::test]
    async fn test_released_ambiguous_allows_new_submission() {
        let signer = Arc::new(ScriptedSigner::new(vec![Err(SubmitError::new("connection reset"))]));
        let tracker = create_tracker(signer.clone());

        let first = tracker.submit(create_test_request()).await.unwrap();
        tracker.abandon(&first.fingerprint).await.unwrap();
        assert_eq!(tracker.resolve_ambiguous(&first.fingerprint, None).await.unwrap(), None);

        let second = tracker.submit(create_test_request()).await.unwrap();
        assert_eq!(second.state, TransactionState::Submitted(HASH.to_string()));
        assert_eq!(signer.calls(), 2);
    }

    #[tokio::test]
    async fn test_submitted_attempt_cannot_be_abandoned() {
        let signer = Arc::new(ScriptedSigner::new(Vec::new()));
        let tracker = create_tracker(signer);

        let attempt = tracker.submit(create_test_request()).await.unwrap();
        assert!(matches!(
            tracker.abandon(&attempt.fingerprint).await,
            Err(TrackerError::NotCancellable(_))
        ));
        assert!(matches!(
            tracker.resolve_ambiguous(&attempt.fingerprint, None).await,
            Err(TrackerError::NotAmbiguous(_))
        ));
    }

    #[tokio::test]
    async fn test_revert_reason_is_decoded() {
        let payload = format!("0x4e487b71{:064x}", 0x12);
        let signer = Arc::new(ScriptedSigner::new(Vec::new()).with_receipt(ReceiptStatus::Reverted {
            revert_data: Some(payload),
        }));
        let tracker = create_tracker(signer);

        let attempt = tracker.submit_and_confirm(create_test_request()).await.unwrap();
        assert_eq!(
            attempt.state,
            TransactionState::Reverted {
                tx_hash: HASH.to_string(),
                reason: "Panic(0x12): division or modulo by zero".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_missing_receipt_returns_to_submitted() {
        let signer = Arc::new(ScriptedSigner::new(Vec::new()));
        let tracker = create_tracker(signer);

        let attempt = tracker.submit(create_test_request()).await.unwrap();
        let result = tracker.await_confirmation(&attempt.fingerprint).await;
        assert!(matches!(result, Err(TrackerError::Receipt(ReceiptError::Transport(_)))));

        let current = tracker.attempt(&attempt.fingerprint).await.unwrap();
        assert_eq!(current.state, TransactionState::Submitted(HASH.to_string()));
    }

    #[tokio::test]
    async fn test_dropped_receipt_wait_can_be_resumed() {
        let mut signer = ScriptedSigner::new(Vec::new()).with_receipt(ReceiptStatus::Success);
        signer.receipt_delay = Duration::from_millis(100);
        let signer = Arc::new(signer);
        let tracker = create_tracker(signer);

        let attempt = tracker.submit(create_test_request()).await.unwrap();
        let cut_short = timeout(Duration::from_millis(10), tracker.await_confirmation(&attempt.fingerprint)).await;
        assert!(cut_short.is_err());

        let current = tracker.attempt(&attempt.fingerprint).await.unwrap();
        assert_eq!(current.state, TransactionState::Submitted(HASH.to_string()));

        let confirmed = tracker.await_confirmation(&attempt.fingerprint).await.unwrap();
        assert_eq!(confirmed.state, TransactionState::Confirmed(HASH.to_string()));
    }

    #[tokio::test]
    async fn test_dropped_submission_becomes_ambiguous_and_expires_after_abandon() {
        let mut signer = ScriptedSigner::new(Vec::new());
        signer.submit_delay = Duration::from_millis(100);
        let signer = Arc::new(signer);
        let tracker = TransactionTracker::new(
            signer.clone(),
            TrackerConfig {
                fingerprint_ttl: Duration::ZERO,
                ..TrackerConfig::default()
            },
        );

        let fingerprint = create_test_request().fingerprint();
        let cut_short = timeout(Duration::from_millis(20), tracker.submit(create_test_request())).await;
        assert!(cut_short.is_err());
        assert_eq!(
            tracker.attempt(&fingerprint).await.unwrap().state,
            TransactionState::Ambiguous
        );

        let abandoned = tracker.abandon(&fingerprint).await.unwrap();
        assert!(abandoned.abandoned);
        assert_eq!(tracker.prune_expired().await, 1);

        let retried = tracker.submit(create_test_request()).await.unwrap();
        assert_eq!(retried.state, TransactionState::Submitted(HASH.to_string()));
        assert_eq!(signer.calls(), 2);
    }

    #[tokio::test]
    async fn test_abandoned_submission_expires_while_outstanding() {
        let mut signer = ScriptedSigner::new(Vec::new());
        signer.submit_delay = Duration::from_millis(200);
        let signer = Arc::new(signer);
        let tracker = Arc::new(TransactionTracker::new(
            signer.clone(),
            TrackerConfig {
                fingerprint_ttl: Duration::ZERO,
                ..TrackerConfig::default()
            },
        ));

        let fingerprint = create_test_request().fingerprint();
        let pending = {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.submit(create_test_request()).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        tracker.abandon(&fingerprint).await.unwrap();
        assert_eq!(tracker.prune_expired().await, 1);
        assert!(tracker.attempt(&fingerprint).await.is_none());
        pending.abort();
    }

    #[tokio::test]
    async fn test_confirmed_fingerprint_blocks_until_ttl() {
        let signer = Arc::new(ScriptedSigner::new(Vec::new()).with_receipt(ReceiptStatus::Success));
        let tracker = create_tracker(signer.clone());

        tracker.submit_and_confirm(create_test_request()).await.unwrap();
        let duplicate = tracker.submit(create_test_request()).await.unwrap();
        assert_eq!(duplicate.state, TransactionState::Confirmed(HASH.to_string()));
        assert_eq!(signer.calls(), 1);

        let expiring = TransactionTracker::new(
            signer.clone(),
            TrackerConfig {
                fingerprint_ttl: Duration::ZERO,
                ..TrackerConfig::default()
            },
        );
        expiring.submit_and_confirm(create_test_request()).await.unwrap();
        assert_eq!(expiring.prune_expired().await, 1);
        expiring.submit(create_test_request()).await.unwrap();
        assert_eq!(signer.calls(), 3);
    }

    #[tokio::test]
    async fn test_history_records_transitions() {
        let signer = Arc::new(ScriptedSigner::new(Vec::new()).with_receipt(ReceiptStatus::Success));
        let tracker = create_tracker(signer);

        let attempt = tracker.submit_and_confirm(create_test_request()).await.unwrap();
        let labels: Vec<&str> = attempt.history.iter().map(TransactionState::label).collect();
        assert_eq!(labels, vec!["idle", "submitting", "submitted", "confirming", "confirmed"]);
    }
}
