//! Process entrypoint.
//!
//! Wires the ambient stack (telemetry, metrics, config) to the indexing
//! core for a single chain and runs until interrupted. The chain source —
//! the poller/subscriber that actually produces `(block, txs, logs)` — and
//! the production store are external collaborators (spec §1 Non-goals);
//! this binary wires a `MemoryStore` in their place so the process is
//! runnable end to end, and logs that fact loudly rather than silently
//! behaving as if it were production-ready.

use pdp_indexer::block_processor::BlockProcessor;
use pdp_indexer::chain::Chain;
use pdp_indexer::config::IndexerConfig;
use pdp_indexer::metrics;
use pdp_indexer::rpc::http::HttpChainRpc;
use pdp_indexer::rpc::{ChainRpc, UnavailableRandomness};
use pdp_indexer::signatures::SignatureRegistry;
use pdp_indexer::store::memory::MemoryStore;
use pdp_indexer::store::Store;
use pdp_indexer::telemetry::{self, TelemetryConfig};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

fn usage() -> String {
    "usage: pdp-indexer <config.toml> [chain-name]".to_string()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    telemetry::init_tracing(TelemetryConfig::default())?;

    let args: Vec<String> = std::env::args().collect();
    let config_path = args.get(1).ok_or_else(usage)?;
    let chain_name = args.get(2).cloned().unwrap_or_else(|| "default".to_string());

    let config = IndexerConfig::load(config_path)?;
    metrics::init_metrics()?;

    let registry = SignatureRegistry::new();
    let dispatch = pdp_indexer::dispatch::DispatchTable::build(&config, &registry);
    let processor = BlockProcessor::new(
        chain_name.clone(),
        dispatch,
        &config.pending_tx,
        config.reorg_window,
        config.proving.clone(),
        config.fault.clone(),
    );

    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    warn!(
        chain = %chain_name,
        "using the in-memory store; wire a persistent Store implementation before running against a live chain"
    );

    let rpc: Arc<dyn ChainRpc> = match std::env::var("PDP_INDEXER_RPC_ENDPOINT") {
        Ok(endpoint) => {
            let method = std::env::var("PDP_INDEXER_RPC_METHOD").unwrap_or_else(|_| "pdp_getRandomness".to_string());
            info!(chain = %chain_name, %endpoint, %method, "using HTTP chain RPC for randomness lookups");
            Arc::new(HttpChainRpc::new(endpoint, method))
        }
        Err(_) => {
            warn!(chain = %chain_name, "no PDP_INDEXER_RPC_ENDPOINT set; FaultRecord randomness lookups will fail");
            Arc::new(UnavailableRandomness)
        }
    };

    let chain = Chain::new(chain_name.clone(), processor, store, rpc);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    info!(
        chain = %chain.name(),
        resources = config.resources.len(),
        "dispatch table resolved; indexer ready, awaiting a chain source integration to begin ingestion"
    );

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!(chain = %chain.name(), "received interrupt, shutting down");
        }
        _ = wait_forever() => {}
    }

    shutdown_tx.send(true).ok();
    drop(shutdown_rx);
    Ok(())
}

/// Placeholder for the real chain-source-driven loop: with no externally
/// wired `ChainSource`, the process simply stays up so operational signals
/// (ctrl-c, a process supervisor's SIGTERM) remain the only exit path.
async fn wait_forever() {
    std::future::pending::<()>().await
}
