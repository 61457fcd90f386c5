//! Block Processor (C9, spec §4.9).
//!
//! Orchestrates per-block dispatch: one store transaction per block, serial
//! dispatch of txs then logs in block order, with a tx-hash pre-pass so
//! handlers that need calldata alongside an event get it for free. Reorg
//! detection runs before the transaction is opened; a detected fork rolls
//! the store back to the shared ancestor before this block's effects are
//! applied (spec §4.5, §4.9).
//!
//! A `BlockProcessor` instance is scoped to one chain; the caller spawns one
//! background task per chain to serve several in parallel (spec §4.9).

use crate::config::{FaultConfig, PendingTxConfig, ProvingConfig};
use crate::dispatch::DispatchTable;
use crate::domain::{BlockBatch, RawTx};
use crate::error::{IndexerError, ReorgError, StoreError};
use crate::handlers::{registry, HandlerContext};
use crate::metrics;
use crate::pending::{PendingTxQueue, RetryOutcome};
use crate::reorg::{BlockHeader, IngestDecision, ReorgManager};
use crate::rpc::ChainRpc;
use crate::store::Store;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tracing::{error, warn};

/// Error surfaced by [`BlockProcessor::process_block`] to its supervisor
/// (spec §7). Wraps the handler/store error kinds; `Cancelled` is reported
/// when a shutdown signal fires between items, with no partial effects
/// committed.
#[derive(Debug, Error)]
pub enum BlockError {
    #[error(transparent)]
    Indexer(#[from] IndexerError),

    #[error("block processing cancelled before commit")]
    Cancelled,
}

impl From<StoreError> for BlockError {
    fn from(e: StoreError) -> Self {
        BlockError::Indexer(e.into())
    }
}

impl From<ReorgError> for BlockError {
    fn from(e: ReorgError) -> Self {
        BlockError::Indexer(e.into())
    }
}

/// Per-chain orchestration state: the routing table, the reorg window, and
/// the pending-tx queue for calldata that outruns its event.
pub struct BlockProcessor {
    chain: String,
    dispatch: DispatchTable,
    pending: PendingTxQueue,
    reorg: Mutex<ReorgManager>,
    proving: ProvingConfig,
    fault: FaultConfig,
}

impl BlockProcessor {
    pub fn new(
        chain: impl Into<String>,
        dispatch: DispatchTable,
        pending_tx: &PendingTxConfig,
        reorg_window: u64,
        proving: ProvingConfig,
        fault: FaultConfig,
    ) -> Self {
        Self {
            chain: chain.into(),
            dispatch,
            pending: PendingTxQueue::new(pending_tx),
            reorg: Mutex::new(ReorgManager::new(reorg_window as usize)),
            proving,
            fault,
        }
    }

    pub fn pending(&self) -> &PendingTxQueue {
        &self.pending
    }

    /// Processes one block: decides reorg handling, opens a store
    /// transaction, dispatches every tx and log, and commits. Any error
    /// aborts the transaction so the store shows no partial effects (spec
    /// §4.9, §7). `shutdown` is checked between items so a cancellation
    /// never leaves a log half-processed.
    pub async fn process_block(
        &self,
        store: &dyn Store,
        rpc: &dyn ChainRpc,
        batch: &BlockBatch,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<(), BlockError> {
        if is_shutting_down(shutdown) {
            return Err(BlockError::Cancelled);
        }

        let header = BlockHeader {
            number: batch.block_number,
            hash: batch.block_hash.clone(),
            parent_hash: batch.parent_hash.clone(),
        };
        let decision = {
            let reorg = self.reorg.lock().await;
            reorg.decide(&header)?
        };

        store.begin().await?;
        match self.apply_block(store, rpc, batch, &decision, shutdown).await {
            Ok(()) => {
                store.commit().await?;
                let mut reorg = self.reorg.lock().await;
                if let IngestDecision::Reorg { ancestor } = &decision {
                    reorg.forget_above(ancestor.number);
                    metrics::record_reorg(&self.chain, (header.number.saturating_sub(ancestor.number)) as i64);
                }
                reorg.record(header);
                drop(reorg);
                if let Some(finalized) = batch.finalized_height {
                    store.finalize_up_to(finalized).await?;
                }
                metrics::record_block_processed(&self.chain);
                metrics::set_pending_tx_queue_size(&self.chain, self.pending.len().await as i64);
                Ok(())
            }
            Err(err) => {
                if let Err(rollback_err) = store.rollback().await {
                    metrics::record_store_error("rollback");
                    error!(
                        block_number = batch.block_number,
                        block_hash = %batch.block_hash,
                        error = %rollback_err,
                        "rollback failed after aborted block"
                    );
                }
                Err(err)
            }
        }
    }

    async fn apply_block(
        &self,
        store: &dyn Store,
        rpc: &dyn ChainRpc,
        batch: &BlockBatch,
        decision: &IngestDecision,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<(), BlockError> {
        if let IngestDecision::Reorg { ancestor } = decision {
            store.rollback_above(ancestor.number, &ancestor.hash).await?;
        }

        let tx_by_hash: HashMap<&str, &RawTx> =
            batch.txs.iter().map(|tx| (tx.hash.as_str(), tx)).collect();

        // Park txs that match a known function trigger but whose log hasn't
        // shown up in this same block yet (spec §3, §4.9).
        for tx in &batch.txs {
            if is_shutting_down(shutdown) {
                return Err(BlockError::Cancelled);
            }
            if self.is_unmatched_function_call(tx) && !self.has_log_for(batch, &tx.hash) {
                self.pending.park(tx.clone(), batch.timestamp).await;
            }
        }

        let mut logs: Vec<_> = batch.logs.iter().collect();
        logs.sort_by_key(|log| log.log_index);

        for log in logs {
            if is_shutting_down(shutdown) {
                return Err(BlockError::Cancelled);
            }
            let Some(topic0) = log.topics.first() else {
                continue;
            };
            let Some(trigger) = self.dispatch.find_event(&log.address, topic0) else {
                continue;
            };
            let Some(handler) = registry::build(&trigger.handler) else {
                continue;
            };

            let tx = match tx_by_hash.get(log.transaction_hash.as_str()).copied() {
                Some(tx) => Some(tx.clone()),
                None => {
                    let recovered = self.pending.peek(&log.transaction_hash).await;
                    if recovered.is_some() {
                        metrics::record_tx_dispatched(&self.chain, &trigger.definition);
                    }
                    recovered
                }
            };

            let ctx = HandlerContext {
                store,
                rpc,
                proving: &self.proving,
                fault: &self.fault,
                block_number: batch.block_number,
                block_hash: &batch.block_hash,
                timestamp: batch.timestamp,
            };

            let timer = metrics::Timer::new();
            let outcome = handler.handle_event(&ctx, log, tx.as_ref()).await;
            metrics::record_handler_duration(&trigger.handler, timer.elapsed_secs());

            match outcome {
                Ok(()) => {
                    self.pending.remove(&log.transaction_hash).await;
                    metrics::record_log_dispatched(&self.chain, &trigger.definition);
                    match trigger.handler.as_str() {
                        "PossessionProven" => metrics::record_proof(),
                        "FaultRecord" => metrics::record_fault(),
                        _ => {}
                    }
                }
                Err(IndexerError::MissingPrerequisite(reason)) => {
                    warn!(
                        block_number = batch.block_number,
                        block_hash = %batch.block_hash,
                        tx_hash = %log.transaction_hash,
                        log_index = log.log_index,
                        reason = %reason,
                        "missing prerequisite; continuing the block"
                    );
                    if let Some(tx) = tx {
                        self.pending.park(tx, batch.timestamp).await;
                    }
                }
                Err(err) => {
                    error!(
                        block_number = batch.block_number,
                        block_hash = %batch.block_hash,
                        tx_hash = %log.transaction_hash,
                        log_index = log.log_index,
                        error = %err,
                        "handler failed, aborting block"
                    );
                    return Err(err.into());
                }
            }
        }

        self.retry_due_pending(batch.timestamp).await;
        Ok(())
    }

    fn is_unmatched_function_call(&self, tx: &RawTx) -> bool {
        let Some(to) = tx.to.as_deref() else {
            return false;
        };
        if tx.input.len() < 4 {
            return false;
        }
        let selector = hex::encode(&tx.input[..4]);
        self.dispatch.find_function(to, &selector).is_some()
    }

    fn has_log_for(&self, batch: &BlockBatch, tx_hash: &str) -> bool {
        batch.logs.iter().any(|log| log.transaction_hash == tx_hash)
    }

    /// Ages out entries whose last attempt is older than the configured
    /// retry delay: a tx whose event never shows up is dropped with an
    /// error log after `max_attempts` (spec §3).
    async fn retry_due_pending(&self, now: u64) {
        for tx in self.pending.due_for_retry(now).await {
            if let RetryOutcome::Dropped = self.pending.record_attempt(&tx.hash, now).await {
                metrics::record_pending_tx_dropped(&self.chain);
                error!(
                    tx_hash = %tx.hash,
                    "pending tx exceeded max retry attempts without its event arriving; dropping"
                );
            }
        }
    }
}

fn is_shutting_down(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow()
}
