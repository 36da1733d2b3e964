//! Signer failure classification and revert decoding

use std::fmt;

/// Raw failure reported by a signer on submit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitError {
    pub message: String,
    /// Structured payload attached to the failure, when the signer has one
    pub data: Option<String>,
}

impl SubmitError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }
}

impl fmt::Display for SubmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.data {
            Some(data) => write!(f, "{} ({})", self.message, data),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for SubmitError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitFailureClass {
    /// The network already has this transaction. Carries its hash when one
    /// could be recovered from the error.
    AlreadyKnown(Option<String>),
    GasEstimation,
    UserRejected,
    InvalidParams,
    Unknown,
}

const ALREADY_KNOWN: &[&str] = &[
    "already known",
    "known transaction",
    "nonce too low",
    "replacement transaction underpriced",
    "replacement underpriced",
    "already imported",
];

const USER_REJECTED: &[&str] = &[
    "user rejected",
    "user denied",
    "rejected by user",
    "request rejected",
    "action_rejected",
];

const GAS_ESTIMATION: &[&str] = &[
    "cannot estimate gas",
    "gas required exceeds",
    "unpredictable_gas_limit",
    "intrinsic gas too low",
    "out of gas",
    "exceeds block gas limit",
];

const INVALID_PARAMS: &[&str] = &[
    "invalid params",
    "invalid argument",
    "invalid address",
    "insufficient funds",
];

pub fn classify_submit_error(error: &SubmitError) -> SubmitFailureClass {
    let text = error.message.to_ascii_lowercase();
    let matches_any = |patterns: &[&str]| patterns.iter().any(|p| text.contains(p));

    if matches_any(ALREADY_KNOWN) {
        let hash = extract_tx_hash(&error.message).or_else(|| error.data.as_deref().and_then(extract_tx_hash));
        SubmitFailureClass::AlreadyKnown(hash)
    } else if matches_any(USER_REJECTED) {
        SubmitFailureClass::UserRejected
    } else if matches_any(GAS_ESTIMATION) {
        SubmitFailureClass::GasEstimation
    } else if matches_any(INVALID_PARAMS) {
        SubmitFailureClass::InvalidParams
    } else {
        SubmitFailureClass::Unknown
    }
}

/// First `0x`-prefixed run of exactly 64 hex digits in `text`, lowercased
pub fn extract_tx_hash(text: &str) -> Option<String> {
    let bytes = text.as_bytes();
    let mut i = 0;
    while i + 2 <= bytes.len() {
        if bytes[i] == b'0' && (bytes[i + 1] == b'x' || bytes[i + 1] == b'X') {
            let run = bytes[i + 2..].iter().take_while(|b| b.is_ascii_hexdigit()).count();
            if run == 64 {
                return Some(format!("0x{}", text[i + 2..i + 66].to_ascii_lowercase()));
            }
            i += 2 + run;
        } else {
            i += 1;
        }
    }
    None
}

const ERROR_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];
const PANIC_SELECTOR: [u8; 4] = [0x4e, 0x48, 0x7b, 0x71];
const WORD: usize = 32;

/// Human-readable reason from ABI-encoded revert data, for `Error(string)`
/// and `Panic(uint256)` payloads
pub fn decode_revert_reason(data: &str) -> Option<String> {
    let raw = data.trim();
    let raw = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .unwrap_or(raw);
    let bytes = hex::decode(raw).ok()?;
    if bytes.len() < 4 {
        return None;
    }

    let (selector, body) = bytes.split_at(4);
    if selector == ERROR_SELECTOR {
        // offset word, length word, utf-8 bytes
        let length = usize::try_from(read_word(body, 1)?).ok()?;
        let start = 2 * WORD;
        let message = body.get(start..start.checked_add(length)?)?;
        String::from_utf8(message.to_vec()).ok()
    } else if selector == PANIC_SELECTOR {
        let code = read_word(body, 0)?;
        Some(format!("Panic(0x{:02x}): {}", code, panic_description(code)))
    } else {
        None
    }
}

/// Low 8 bytes of the `index`th 32-byte word. Larger values do not fit any
/// length or panic code we decode.
fn read_word(body: &[u8], index: usize) -> Option<u64> {
    let word = body.get(index * WORD..(index + 1) * WORD)?;
    if word[..WORD - 8].iter().any(|b| *b != 0) {
        return None;
    }
    let mut low = [0u8; 8];
    low.copy_from_slice(&word[WORD - 8..]);
    Some(u64::from_be_bytes(low))
}

fn panic_description(code: u64) -> &'static str {
    match code {
        0x01 => "assertion failed",
        0x11 => "arithmetic overflow or underflow",
        0x12 => "division or modulo by zero",
        0x21 => "invalid enum value",
        0x22 => "corrupted storage byte array",
        0x31 => "pop on empty array",
        0x32 => "array index out of bounds",
        0x41 => "out of memory",
        0x51 => "call to uninitialized function",
        _ => "unknown panic",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dead_hash() -> String {
        format!("0xdead{}", "beef".repeat(15))
    }

    #[test]
    fn test_already_known_with_hash() {
        let error = SubmitError::new(format!("already known: {}", dead_hash()));
        assert_eq!(
            classify_submit_error(&error),
            SubmitFailureClass::AlreadyKnown(Some(dead_hash()))
        );
    }

    #[test]
    fn test_already_known_hash_in_data() {
        let error = SubmitError::new("nonce too low").with_data(format!("{{\"txHash\":\"{}\"}}", dead_hash()));
        assert_eq!(
            classify_submit_error(&error),
            SubmitFailureClass::AlreadyKnown(Some(dead_hash()))
        );
    }

    #[test]
    fn test_already_known_without_hash() {
        let error = SubmitError::new("replacement transaction underpriced");
        assert_eq!(classify_submit_error(&error), SubmitFailureClass::AlreadyKnown(None));
    }

    #[test]
    fn test_other_classes() {
        assert_eq!(
            classify_submit_error(&SubmitError::new("User rejected the request.")),
            SubmitFailureClass::UserRejected
        );
        assert_eq!(
            classify_submit_error(&SubmitError::new("execution reverted: cannot estimate gas")),
            SubmitFailureClass::GasEstimation
        );
        assert_eq!(
            classify_submit_error(&SubmitError::new("insufficient funds for transfer")),
            SubmitFailureClass::InvalidParams
        );
        assert_eq!(
            classify_submit_error(&SubmitError::new("connection reset by peer")),
            SubmitFailureClass::Unknown
        );
    }

    #[test]
    fn test_extract_hash_requires_exact_length() {
        assert_eq!(extract_tx_hash("hash 0xabc"), None);
        let too_long = format!("{}0", dead_hash());
        assert_eq!(extract_tx_hash(&too_long), None);
        let upper = format!("tx {} sent", dead_hash().to_ascii_uppercase().replacen("0X", "0x", 1));
        assert_eq!(extract_tx_hash(&upper), Some(dead_hash()));
    }

    #[test]
    fn test_decode_error_string() {
        // Error("Invoice already cleared")
        let reason = "Invoice already cleared";
        let mut payload = String::from("0x08c379a0");
        payload.push_str(&format!("{:064x}", 32));
        payload.push_str(&format!("{:064x}", reason.len()));
        let mut text = hex::encode(reason);
        while text.len() % 64 != 0 {
            text.push('0');
        }
        payload.push_str(&text);

        assert_eq!(decode_revert_reason(&payload), Some(reason.to_string()));
    }

    #[test]
    fn test_decode_panic() {
        let payload = format!("0x4e487b71{:064x}", 0x11);
        assert_eq!(
            decode_revert_reason(&payload),
            Some("Panic(0x11): arithmetic overflow or underflow".to_string())
        );
    }

    #[test]
    fn test_decode_unknown_payload() {
        assert_eq!(decode_revert_reason("0xdeadbeef"), None);
        assert_eq!(decode_revert_reason("not hex"), None);
        assert_eq!(decode_revert_reason("0x08c379a0"), None);
    }
}
