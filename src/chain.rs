//! Chain (per-chain orchestration, spec §4.9, §5).
//!
//! Owns one [`BlockProcessor`], one store handle, and one chain RPC
//! binding, and drives ingestion for a single chain as its own task (spec
//! §5: "per-chain single-threaded cooperative pipeline; multiple chains
//! run in parallel as independent tasks with their own store handles").
//!
//! The block source itself — the poller/subscriber that actually produces
//! `(block, txs, logs)` — is an external collaborator (spec §1 Non-goals).
//! [`ChainSource`] is the seam this module expects it to implement; nothing
//! here assumes a particular transport (websocket subscription, polling
//! `eth_getLogs`, or a replay feed in tests).

use crate::block_processor::{BlockError, BlockProcessor};
use crate::domain::BlockBatch;
use crate::metrics;
use crate::rpc::ChainRpc;
use crate::store::Store;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum ChainSourceError {
    #[error("chain source error: {0}")]
    Transport(String),
}

/// Yields blocks to ingest, strictly in chain order. `Ok(None)` means the
/// source is caught up to the tip and the caller should back off before
/// asking again; it is not an error.
#[async_trait]
pub trait ChainSource: Send + Sync {
    async fn next_block(&self) -> Result<Option<BlockBatch>, ChainSourceError>;
}

/// Per-chain orchestration: one `BlockProcessor`, one store, one RPC
/// binding, named for logging and metric labels.
pub struct Chain {
    name: String,
    processor: BlockProcessor,
    store: Arc<dyn Store>,
    rpc: Arc<dyn ChainRpc>,
}

impl Chain {
    pub fn new(
        name: impl Into<String>,
        processor: BlockProcessor,
        store: Arc<dyn Store>,
        rpc: Arc<dyn ChainRpc>,
    ) -> Self {
        Self {
            name: name.into(),
            processor,
            store,
            rpc,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Drives ingestion until `shutdown` fires. Backs off for `idle_delay`
    /// whenever the source reports no new block, or whenever a block fails
    /// to process, so a transient store/RPC hiccup doesn't spin the task.
    pub async fn run(&self, source: &dyn ChainSource, shutdown: watch::Receiver<bool>, idle_delay: Duration) {
        loop {
            if *shutdown.borrow() {
                info!(chain = %self.name, "shutdown signal received, stopping ingestion");
                return;
            }

            match source.next_block().await {
                Ok(Some(batch)) => {
                    let block_number = batch.block_number;
                    match self.processor.process_block(self.store.as_ref(), self.rpc.as_ref(), &batch, &shutdown).await {
                        Ok(()) => {
                            metrics::set_pending_tx_queue_size(&self.name, self.processor.pending().len().await as i64);
                        }
                        Err(BlockError::Cancelled) => {
                            info!(chain = %self.name, "cancelled mid-block, stopping ingestion");
                            return;
                        }
                        Err(BlockError::Indexer(e)) => {
                            error!(
                                chain = %self.name,
                                block_number,
                                error = %e,
                                "block processing failed, backing off before retrying"
                            );
                            tokio::time::sleep(idle_delay).await;
                        }
                    }
                }
                Ok(None) => {
                    tokio::time::sleep(idle_delay).await;
                }
                Err(err) => {
                    error!(chain = %self.name, error = %err, "chain source error, backing off");
                    tokio::time::sleep(idle_delay).await;
                }
            }
        }
    }

    /// Re-applies a single already-ingested block through the same
    /// dispatch path used for live ingestion (SPEC_FULL §11). Used by
    /// integration tests to assert idempotent replay (spec §8 property 1)
    /// without standing up a real chain source.
    pub async fn replay(&self, batch: &BlockBatch, shutdown: &watch::Receiver<bool>) -> Result<(), BlockError> {
        self.processor
            .process_block(self.store.as_ref(), self.rpc.as_ref(), batch, shutdown)
            .await
    }
}
