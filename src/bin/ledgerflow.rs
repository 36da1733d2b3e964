//! ledgerflow - account activity and reputation follower
//!
//! Activates one account against a JSON-RPC ledger source:
//! - loads cached activity, backfills the last blocks, follows new logs
//! - reconciles the reputation score
//! - logs every projection change until Ctrl-C
//!
//! Usage:
//!   cargo run --release --bin ledgerflow
//!
//! Environment variables:
//!   LEDGERFLOW_RPC_URL - JSON-RPC endpoint (required)
//!   LEDGERFLOW_CONTRACT - ledger contract address (required)
//!   LEDGERFLOW_ACCOUNT - account to follow (required)
//!   LEDGERFLOW_TOPIC_<KIND> - topic0 per event kind
//!   LEDGERFLOW_CACHE_BACKEND / LEDGERFLOW_CACHE_PATH - activity cache

use dotenv::dotenv;
use ledgerflow::cache::open_cache_store;
use ledgerflow::config::LedgerflowConfig;
use ledgerflow::session::SessionManager;
use ledgerflow::source::{LedgerEventSource, RpcLedgerSource};
use log::{info, warn};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("🚀 ledgerflow starting");

    let config = LedgerflowConfig::from_env()?;
    let account = config.require_account()?.to_string();
    let rpc_config = config.rpc_source_config()?;

    info!("   ├─ Account: {}", account);
    info!("   ├─ Cache: {:?} at {}", config.cache_backend, config.cache_path);
    info!("   ├─ Lookback: {} blocks (window {})", config.lookback_blocks, config.max_block_window);
    info!("   └─ Source timeout: {}ms", config.source_timeout_ms);

    if rpc_config.topics.is_empty() {
        warn!("⚠️  No LEDGERFLOW_TOPIC_<KIND> configured; no ledger events will be read");
    }

    // Only kinds with a topic can be queried or followed
    let session_config = config.rpc_session_config();
    info!("📡 Following {} event kinds", session_config.aggregator.kinds.len());

    let source: Arc<dyn LedgerEventSource> = Arc::new(RpcLedgerSource::new(rpc_config)?);
    let cache = open_cache_store(config.cache_backend, &config.cache_path)?;

    let manager = SessionManager::new(source, cache, session_config);
    let session = manager.switch_account(&account).await;

    let mut activities = session.activities();
    let mut score = session.score();

    loop {
        tokio::select! {
            changed = activities.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = activities.borrow_and_update().clone();
                info!(
                    "📋 {} activity records{}",
                    view.activities.len(),
                    if view.is_loading { " (loading)" } else { "" }
                );
                if let Some(latest) = view.activities.first() {
                    info!(
                        "   └─ Latest: {} #{} {}",
                        latest.title,
                        latest.subject_id,
                        latest.amount.map(|a| a.to_string()).unwrap_or_default()
                    );
                }
            }
            changed = score.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = *score.borrow_and_update();
                info!(
                    "⭐ Score {} (tier {}){}",
                    view.score,
                    view.tier,
                    if view.provisional { " provisional" } else { "" }
                );
            }
            _ = tokio::signal::ctrl_c() => {
                info!("🛑 Shutting down");
                break;
            }
        }
    }

    manager.close().await;
    Ok(())
}
