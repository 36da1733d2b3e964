//! Content-derived keys for submission intents

use crate::types::FixedAmount;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

const FIELD_SEPARATOR: u8 = 0x1f;
const VALUE_SEPARATOR: u8 = 0x1e;

/// A logical submission intent: call `method` on `target` with `args`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxRequest {
    pub target: String,
    pub method: String,
    pub args: Vec<String>,
    pub value: Option<FixedAmount>,
}

impl TxRequest {
    pub fn new(target: &str, method: &str, args: Vec<String>) -> Self {
        Self {
            target: target.to_string(),
            method: method.to_string(),
            args,
            value: None,
        }
    }

    pub fn with_value(mut self, value: FixedAmount) -> Self {
        self.value = Some(value);
        self
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// SHA-256 over the normalized request. Target addresses compare
    /// case-insensitively; everything else is taken verbatim.
    pub fn of(request: &TxRequest) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(request.target.trim().to_ascii_lowercase().as_bytes());
        hasher.update([FIELD_SEPARATOR]);
        hasher.update(request.method.as_bytes());
        for arg in &request.args {
            hasher.update([FIELD_SEPARATOR]);
            hasher.update(arg.as_bytes());
        }
        hasher.update([VALUE_SEPARATOR]);
        if let Some(value) = request.value {
            hasher.update(value.raw.to_string().as_bytes());
            hasher.update([FIELD_SEPARATOR]);
            hasher.update([value.scale]);
        }
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex chars, for log lines
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_request() -> TxRequest {
        TxRequest::new("0xLedger", "clearInvoice", vec!["7".to_string()])
    }

    #[test]
    fn test_identical_requests_share_fingerprint() {
        let a = create_test_request();
        let mut b = create_test_request();
        b.target = "0xledger".to_string();

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().as_str().len(), 64);
    }

    #[test]
    fn test_parameters_change_fingerprint() {
        let base = create_test_request().fingerprint();

        let other_arg = TxRequest::new("0xLedger", "clearInvoice", vec!["8".to_string()]);
        let other_method = TxRequest::new("0xLedger", "payInvoice", vec!["7".to_string()]);
        let with_value = create_test_request().with_value(FixedAmount::new(1, 6));

        assert_ne!(base, other_arg.fingerprint());
        assert_ne!(base, other_method.fingerprint());
        assert_ne!(base, with_value.fingerprint());
    }

    #[test]
    fn test_argument_boundaries_matter() {
        let split = TxRequest::new("0xa", "m", vec!["1".to_string(), "23".to_string()]);
        let joined = TxRequest::new("0xa", "m", vec!["12".to_string(), "3".to_string()]);
        assert_ne!(split.fingerprint(), joined.fingerprint());
    }
}
