//! Configuration from environment variables
//!
//! Every component takes its own config struct; [`LedgerflowConfig`] reads the
//! environment once and derives them.

use crate::activity::AggregatorConfig;
use crate::cache::CacheBackend;
use crate::session::SessionConfig;
use crate::source::RpcSourceConfig;
use crate::tx::TrackerConfig;
use crate::types::EventKind;
use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug)]
pub enum ConfigError {
    MissingVariable(&'static str),
    InvalidValue { name: String, value: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::MissingVariable(name) => write!(f, "{} must be set", name),
            ConfigError::InvalidValue { name, value } => write!(f, "Invalid value for {}: '{}'", name, value),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone)]
pub struct LedgerflowConfig {
    pub rpc_url: Option<String>,
    pub contract: Option<String>,
    pub account: Option<String>,
    pub cache_backend: CacheBackend,
    pub cache_path: String,
    pub lookback_blocks: u64,
    pub max_block_window: u64,
    pub source_timeout_ms: u64,
    pub submit_timeout_ms: u64,
    pub receipt_timeout_ms: u64,
    pub fallback_gas_limit: u64,
    pub fingerprint_ttl_secs: u64,
    pub score_refresh_debounce_ms: u64,
    pub amount_scale: u8,
    pub poll_interval_ms: u64,
    /// topic0 overrides from `LEDGERFLOW_TOPIC_<KIND>`
    pub topics: HashMap<EventKind, String>,
}

impl LedgerflowConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `LEDGERFLOW_RPC_URL` (http/https, required by the binary)
    /// - `LEDGERFLOW_CONTRACT`
    /// - `LEDGERFLOW_ACCOUNT`
    /// - `LEDGERFLOW_CACHE_BACKEND` (default: sqlite)
    /// - `LEDGERFLOW_CACHE_PATH` (default: ledgerflow.db)
    /// - `BACKFILL_LOOKBACK_BLOCKS` (default: 10)
    /// - `PROVIDER_MAX_BLOCK_WINDOW` (default: 10)
    /// - `SOURCE_TIMEOUT_MS` (default: 5000)
    /// - `SUBMIT_TIMEOUT_MS` (default: 30000)
    /// - `RECEIPT_TIMEOUT_MS` (default: 120000)
    /// - `FALLBACK_GAS_LIMIT` (default: 500000)
    /// - `FINGERPRINT_TTL_SECS` (default: 600)
    /// - `SCORE_REFRESH_DEBOUNCE_MS` (default: 2000)
    /// - `AMOUNT_SCALE` (default: 6)
    /// - `RPC_POLL_INTERVAL_MS` (default: 4000)
    /// - `LEDGERFLOW_TOPIC_<KIND>`, e.g. `LEDGERFLOW_TOPIC_INVOICE_CLEARED`
    pub fn from_env() -> Result<Self, ConfigError> {
        let rpc_url = optional_var("LEDGERFLOW_RPC_URL");
        if let Some(url) = &rpc_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ConfigError::InvalidValue {
                    name: "LEDGERFLOW_RPC_URL".to_string(),
                    value: url.clone(),
                });
            }
        }

        let cache_backend = match optional_var("LEDGERFLOW_CACHE_BACKEND") {
            Some(value) => CacheBackend::parse(&value).ok_or(ConfigError::InvalidValue {
                name: "LEDGERFLOW_CACHE_BACKEND".to_string(),
                value,
            })?,
            None => CacheBackend::Sqlite,
        };

        let mut topics = HashMap::new();
        for kind in EventKind::ALL {
            let name = format!("LEDGERFLOW_TOPIC_{}", kind.as_str().to_ascii_uppercase());
            if let Some(topic) = optional_var(&name) {
                topics.insert(kind, topic.to_ascii_lowercase());
            }
        }

        Ok(Self {
            rpc_url,
            contract: optional_var("LEDGERFLOW_CONTRACT"),
            account: optional_var("LEDGERFLOW_ACCOUNT"),
            cache_backend,
            cache_path: optional_var("LEDGERFLOW_CACHE_PATH").unwrap_or_else(|| "ledgerflow.db".to_string()),
            lookback_blocks: parse_var("BACKFILL_LOOKBACK_BLOCKS", 10)?,
            max_block_window: parse_var("PROVIDER_MAX_BLOCK_WINDOW", 10)?,
            source_timeout_ms: parse_var("SOURCE_TIMEOUT_MS", 5_000)?,
            submit_timeout_ms: parse_var("SUBMIT_TIMEOUT_MS", 30_000)?,
            receipt_timeout_ms: parse_var("RECEIPT_TIMEOUT_MS", 120_000)?,
            fallback_gas_limit: parse_var("FALLBACK_GAS_LIMIT", 500_000)?,
            fingerprint_ttl_secs: parse_var("FINGERPRINT_TTL_SECS", 600)?,
            score_refresh_debounce_ms: parse_var("SCORE_REFRESH_DEBOUNCE_MS", 2_000)?,
            amount_scale: parse_var("AMOUNT_SCALE", 6)?,
            poll_interval_ms: parse_var("RPC_POLL_INTERVAL_MS", 4_000)?,
            topics,
        })
    }

    pub fn require_account(&self) -> Result<&str, ConfigError> {
        self.account
            .as_deref()
            .ok_or(ConfigError::MissingVariable("LEDGERFLOW_ACCOUNT"))
    }

    pub fn aggregator_config(&self) -> AggregatorConfig {
        AggregatorConfig {
            lookback_blocks: self.lookback_blocks,
            max_block_window: self.max_block_window,
            source_timeout: Duration::from_millis(self.source_timeout_ms),
            kinds: EventKind::ALL.to_vec(),
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            aggregator: self.aggregator_config(),
            refresh_debounce: Duration::from_millis(self.score_refresh_debounce_ms),
        }
    }

    /// Session config for the JSON-RPC source: only kinds with a configured
    /// topic are backfilled and followed
    pub fn rpc_session_config(&self) -> SessionConfig {
        let mut config = self.session_config();
        config.aggregator.kinds = EventKind::ALL
            .into_iter()
            .filter(|kind| self.topics.contains_key(kind))
            .collect();
        config
    }

    pub fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig {
            fallback_gas_limit: self.fallback_gas_limit,
            submit_timeout: Duration::from_millis(self.submit_timeout_ms),
            receipt_timeout: Duration::from_millis(self.receipt_timeout_ms),
            fingerprint_ttl: Duration::from_secs(self.fingerprint_ttl_secs),
        }
    }

    pub fn rpc_source_config(&self) -> Result<RpcSourceConfig, ConfigError> {
        let url = self
            .rpc_url
            .clone()
            .ok_or(ConfigError::MissingVariable("LEDGERFLOW_RPC_URL"))?;
        let contract = self
            .contract
            .clone()
            .ok_or(ConfigError::MissingVariable("LEDGERFLOW_CONTRACT"))?;

        Ok(RpcSourceConfig {
            url,
            contract,
            max_block_window: self.max_block_window,
            request_timeout: Duration::from_millis(self.source_timeout_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            amount_scale: self.amount_scale,
            topics: self.topics.clone(),
        })
    }
}

fn optional_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Parse `name`, falling back to `default` when unset. A set but unparsable
/// value is an error rather than a silent default.
fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match optional_var(name) {
        Some(value) => value.parse().map_err(|_| ConfigError::InvalidValue {
            name: name.to_string(),
            value,
        }),
        None => Ok(default),
    }
}
