//! Signer contract used by the transaction tracker

use super::classify::SubmitError;
use super::fingerprint::TxRequest;
use crate::types::LedgerEvent;
use async_trait::async_trait;

/// What a signer supports, declared at construction time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignerCapabilities {
    /// Whether `submit` honours an explicit gas limit
    pub supports_gas_override: bool,
    /// Short name for log lines
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiptStatus {
    Success,
    Reverted { revert_data: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub tx_hash: String,
    pub block_number: u64,
    pub status: ReceiptStatus,
    /// Ledger events emitted by the transaction
    pub events: Vec<LedgerEvent>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiptError {
    Timeout,
    Transport(String),
}

impl std::fmt::Display for ReceiptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReceiptError::Timeout => write!(f, "Timed out waiting for receipt"),
            ReceiptError::Transport(e) => write!(f, "Receipt transport error: {}", e),
        }
    }
}

impl std::error::Error for ReceiptError {}

impl From<tokio::time::error::Elapsed> for ReceiptError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        ReceiptError::Timeout
    }
}

#[async_trait]
pub trait Signer: Send + Sync {
    fn capabilities(&self) -> SignerCapabilities;

    /// Sign and broadcast `request`. `gas_limit` is only passed when the
    /// signer declares `supports_gas_override`. Returns the transaction hash.
    async fn submit(&self, request: &TxRequest, gas_limit: Option<u64>) -> Result<String, SubmitError>;

    async fn wait_for_receipt(&self, tx_hash: &str) -> Result<Receipt, ReceiptError>;
}
