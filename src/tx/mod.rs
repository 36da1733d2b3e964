//! Transaction submission and lifecycle tracking

pub mod classify;
pub mod fingerprint;
pub mod signer;
pub mod tracker;

pub use classify::{classify_submit_error, decode_revert_reason, extract_tx_hash, SubmitError, SubmitFailureClass};
pub use fingerprint::{Fingerprint, TxRequest};
pub use signer::{Receipt, ReceiptError, ReceiptStatus, Signer, SignerCapabilities};
pub use tracker::{
    TrackerConfig, TrackerError, TransactionAttempt, TransactionState, TransactionTracker, TxCompletion,
};
