//! JSON-RPC ledger source
//!
//! Reads ledger events as contract logs through a standard JSON-RPC endpoint:
//! - `eth_blockNumber` for the current head
//! - `eth_getLogs` for range queries (span checked against the provider window)
//! - `eth_getBlockByNumber` for block timestamps
//!
//! Log layout expected for every event kind:
//! - `topics[0]`: event signature (configured per kind)
//! - `topics[1]`: subject id (uint256)
//! - `topics[2]`: `from` participant (address)
//! - `topics[3]`: `to` participant (address, optional)
//! - `data[0..32]`: amount (uint256, optional)
//!
//! Subscriptions are emulated by polling new heads, so the source reports
//! `supports_push = false`. Snapshot and score reads are not available over
//! plain logs and are reported as unsupported.

use super::{
    EntitySnapshot, EventFilter, LedgerEventSource, SourceCapabilities, SourceError,
};
use crate::types::{EventKind, FixedAmount, LedgerEvent};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const SUBSCRIPTION_BUFFER: usize = 1_000;

#[derive(Debug, Clone)]
pub struct RpcSourceConfig {
    pub url: String,
    /// Ledger contract whose logs are consumed
    pub contract: String,
    pub max_block_window: u64,
    pub request_timeout: Duration,
    pub poll_interval: Duration,
    /// Decimals of amounts carried in log data
    pub amount_scale: u8,
    /// topic0 per event kind; kinds without a topic are not queryable
    pub topics: HashMap<EventKind, String>,
}

impl RpcSourceConfig {
    pub fn configured_kinds(&self) -> Vec<EventKind> {
        EventKind::ALL
            .iter()
            .copied()
            .filter(|kind| self.topics.contains_key(kind))
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Clone, Deserialize)]
struct RpcLog {
    topics: Vec<String>,
    data: String,
    #[serde(rename = "transactionHash")]
    transaction_hash: String,
    #[serde(rename = "logIndex")]
    log_index: String,
    #[serde(rename = "blockNumber")]
    block_number: String,
}

#[derive(Debug, Deserialize)]
struct RpcBlock {
    timestamp: String,
}

#[derive(Clone)]
pub struct RpcLedgerSource {
    client: reqwest::Client,
    config: Arc<RpcSourceConfig>,
    next_id: Arc<AtomicU64>,
}

impl RpcLedgerSource {
    pub fn new(config: RpcSourceConfig) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| SourceError::Transport(e.to_string()))?;

        log::info!(
            "🔌 RPC ledger source: {} (contract {}, window {} blocks, {} kinds)",
            config.url,
            config.contract,
            config.max_block_window,
            config.topics.len()
        );

        Ok(Self {
            client,
            config: Arc::new(config),
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T, SourceError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response = self
            .client
            .post(&self.config.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| map_reqwest_error(&e))?;

        if !response.status().is_success() {
            return Err(SourceError::Transport(format!(
                "{} returned HTTP {}",
                method,
                response.status()
            )));
        }

        let parsed: RpcResponse<T> = response.json().await.map_err(|e| map_reqwest_error(&e))?;
        if let Some(error) = parsed.error {
            return Err(SourceError::Transport(format!(
                "{} failed ({}): {}",
                method, error.code, error.message
            )));
        }
        parsed
            .result
            .ok_or_else(|| SourceError::Decode(format!("{} returned no result", method)))
    }
}

#[async_trait]
impl LedgerEventSource for RpcLedgerSource {
    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities {
            max_block_window: self.config.max_block_window,
            supports_push: false,
            supports_snapshots: false,
            supports_score_reads: false,
        }
    }

    async fn current_block(&self) -> Result<u64, SourceError> {
        let head: String = self.call("eth_blockNumber", json!([])).await?;
        parse_hex_u64(&head)
    }

    async fn subscribe(
        &self,
        kind: EventKind,
        filter: EventFilter,
    ) -> Result<mpsc::Receiver<LedgerEvent>, SourceError> {
        if !self.config.topics.contains_key(&kind) {
            return Err(SourceError::Unsupported("event kind has no configured topic"));
        }

        let start = self.current_block().await?;
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let source = self.clone();

        tokio::spawn(async move {
            let mut next_block = start + 1;
            let mut timer = tokio::time::interval(source.config.poll_interval);
            log::debug!("📡 Polling {} logs from block {}", kind, next_block);

            loop {
                timer.tick().await;
                if tx.is_closed() {
                    break;
                }

                let head = match source.current_block().await {
                    Ok(head) => head,
                    Err(e) => {
                        log::warn!("⚠️  Poll head lookup failed for {}: {}", kind, e);
                        continue;
                    }
                };

                while next_block <= head {
                    let to_block = head.min(next_block + source.config.max_block_window - 1);
                    match source.query_range(kind, next_block, to_block).await {
                        Ok(events) => {
                            for event in events.into_iter().filter(|e| filter.matches(e)) {
                                if tx.send(event).await.is_err() {
                                    log::debug!("Subscription for {} dropped by consumer", kind);
                                    return;
                                }
                            }
                            next_block = to_block + 1;
                        }
                        Err(e) => {
                            // Retry the same range on the next tick
                            log::warn!(
                                "⚠️  Poll query {} [{}, {}] failed: {}",
                                kind,
                                next_block,
                                to_block,
                                e
                            );
                            break;
                        }
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn query_range(
        &self,
        kind: EventKind,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<LedgerEvent>, SourceError> {
        let requested = to_block.saturating_sub(from_block) + 1;
        if requested > self.config.max_block_window {
            return Err(SourceError::RangeTooLarge {
                requested,
                max: self.config.max_block_window,
            });
        }

        let topic = self
            .config
            .topics
            .get(&kind)
            .ok_or(SourceError::Unsupported("event kind has no configured topic"))?;

        let logs: Vec<RpcLog> = self
            .call(
                "eth_getLogs",
                json!([{
                    "address": self.config.contract,
                    "fromBlock": format!("0x{:x}", from_block),
                    "toBlock": format!("0x{:x}", to_block),
                    "topics": [topic],
                }]),
            )
            .await?;

        let mut events = logs
            .iter()
            .map(|log| decode_log(kind, log, self.config.amount_scale))
            .collect::<Result<Vec<_>, _>>()?;
        events.sort_by_key(|e| (e.block_number, e.log_index));
        Ok(events)
    }

    async fn block_timestamp(&self, block_number: u64) -> Result<i64, SourceError> {
        let block: Option<RpcBlock> = self
            .call(
                "eth_getBlockByNumber",
                json!([format!("0x{:x}", block_number), false]),
            )
            .await?;
        let block = block.ok_or_else(|| SourceError::Decode(format!("unknown block {}", block_number)))?;
        Ok(parse_hex_u64(&block.timestamp)? as i64)
    }

    async fn read_snapshot(&self, _account: &str) -> Result<Vec<EntitySnapshot>, SourceError> {
        Err(SourceError::Unsupported("entity snapshots"))
    }
}

fn map_reqwest_error(err: &reqwest::Error) -> SourceError {
    if err.is_timeout() {
        return SourceError::Timeout;
    }
    if err.is_decode() {
        return SourceError::Decode(err.to_string());
    }
    SourceError::Transport(err.to_string())
}

fn parse_hex_u64(value: &str) -> Result<u64, SourceError> {
    let digits = value.trim_start_matches("0x");
    u64::from_str_radix(digits, 16)
        .map_err(|e| SourceError::Decode(format!("invalid quantity {}: {}", value, e)))
}

/// Decode a 32-byte hex word into bytes
fn decode_word(word: &str) -> Result<Vec<u8>, SourceError> {
    let bytes = hex::decode(word.trim_start_matches("0x"))
        .map_err(|e| SourceError::Decode(format!("invalid hex word: {}", e)))?;
    if bytes.len() != 32 {
        return Err(SourceError::Decode(format!(
            "expected 32-byte word, got {} bytes",
            bytes.len()
        )));
    }
    Ok(bytes)
}

fn word_to_address(word: &str) -> Result<String, SourceError> {
    let bytes = decode_word(word)?;
    Ok(format!("0x{}", hex::encode(&bytes[12..])))
}

/// uint256 word as a decimal string when it fits in u128, hex otherwise
fn word_to_subject(word: &str) -> Result<String, SourceError> {
    let bytes = decode_word(word)?;
    if bytes[..16].iter().any(|b| *b != 0) {
        return Ok(format!("0x{}", hex::encode(&bytes)));
    }
    let mut low = [0u8; 16];
    low.copy_from_slice(&bytes[16..]);
    Ok(u128::from_be_bytes(low).to_string())
}

fn word_to_u128(word: &[u8]) -> Option<u128> {
    if word.len() != 32 || word[..16].iter().any(|b| *b != 0) {
        return None;
    }
    let mut low = [0u8; 16];
    low.copy_from_slice(&word[16..]);
    Some(u128::from_be_bytes(low))
}

fn decode_log(kind: EventKind, log: &RpcLog, scale: u8) -> Result<LedgerEvent, SourceError> {
    let subject = log
        .topics
        .get(1)
        .ok_or_else(|| SourceError::Decode(format!("{} log missing subject topic", kind)))?;

    let from = log.topics.get(2).map(|t| word_to_address(t)).transpose()?;
    let to = log.topics.get(3).map(|t| word_to_address(t)).transpose()?;

    let data = hex::decode(log.data.trim_start_matches("0x"))
        .map_err(|e| SourceError::Decode(format!("invalid log data: {}", e)))?;
    let amount = if data.len() >= 32 {
        word_to_u128(&data[..32]).map(|raw| FixedAmount::new(raw, scale))
    } else {
        None
    };

    Ok(LedgerEvent {
        kind,
        subject_id: word_to_subject(subject)?,
        from,
        to,
        amount,
        tx_hash: log.transaction_hash.to_ascii_lowercase(),
        log_index: parse_hex_u64(&log.log_index)?,
        block_number: parse_hex_u64(&log.block_number)?,
    })
}
