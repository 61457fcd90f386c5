//! Pending-Tx Queue (C8, spec §4.8).
//!
//! Some chain orderings deliver a function-call transaction before its
//! effect-producing event; when a handler reports `MissingPrerequisite`,
//! the Block Processor parks the transaction here instead of failing the
//! block. Shared per-chain state guarded by a reader/writer lock (many
//! readers for inspection, a single writer for add/remove/attempt).

use crate::config::PendingTxConfig;
use crate::domain::RawTx;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// One parked transaction: the original tx, how many retry attempts have
/// been made, and the wall-clock timestamp of the last attempt.
#[derive(Debug, Clone)]
pub struct PendingTx {
    pub tx: RawTx,
    pub attempts: u32,
    pub last_attempt_at: u64,
}

/// Outcome of recording a retry attempt against an existing entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// Still under the attempt ceiling; remains parked.
    Retrying,
    /// Hit `max_attempts`; the entry was removed.
    Dropped,
    /// No entry existed for that hash (already resolved or never parked).
    NotFound,
}

/// In-memory, best-effort queue of parked transactions, keyed by tx hash.
/// One instance per chain.
pub struct PendingTxQueue {
    min_retry_delay_secs: u64,
    max_attempts: u32,
    entries: RwLock<HashMap<String, PendingTx>>,
}

impl PendingTxQueue {
    pub fn new(config: &PendingTxConfig) -> Self {
        Self {
            min_retry_delay_secs: config.min_retry_delay_secs,
            max_attempts: config.max_attempts,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Parks `tx` if it isn't already pending. Re-parking an in-flight hash
    /// (e.g. the same tx seen again before its first retry) is a no-op so a
    /// retry in progress doesn't lose its attempt count.
    pub async fn park(&self, tx: RawTx, now: u64) {
        let mut entries = self.entries.write().await;
        entries.entry(tx.hash.clone()).or_insert_with(|| PendingTx {
            tx,
            attempts: 0,
            last_attempt_at: now,
        });
    }

    /// Snapshot of every entry whose last attempt is old enough to retry.
    pub async fn due_for_retry(&self, now: u64) -> Vec<RawTx> {
        let entries = self.entries.read().await;
        entries
            .values()
            .filter(|p| now.saturating_sub(p.last_attempt_at) >= self.min_retry_delay_secs)
            .map(|p| p.tx.clone())
            .collect()
    }

    /// Looks up a parked tx by hash without affecting its retry state. Used
    /// by the block processor to recover calldata for a tx whose
    /// effect-producing log arrives in a later block than the tx itself.
    pub async fn peek(&self, tx_hash: &str) -> Option<RawTx> {
        self.entries.read().await.get(tx_hash).map(|p| p.tx.clone())
    }

    /// Removes an entry after its retry dispatch succeeds.
    pub async fn remove(&self, tx_hash: &str) {
        self.entries.write().await.remove(tx_hash);
    }

    /// Records a failed retry attempt, dropping the entry once
    /// `max_attempts` is reached.
    pub async fn record_attempt(&self, tx_hash: &str, now: u64) -> RetryOutcome {
        let mut entries = self.entries.write().await;
        let Some(entry) = entries.get_mut(tx_hash) else {
            return RetryOutcome::NotFound;
        };
        entry.attempts += 1;
        entry.last_attempt_at = now;
        if entry.attempts >= self.max_attempts {
            entries.remove(tx_hash);
            RetryOutcome::Dropped
        } else {
            RetryOutcome::Retrying
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(hash: &str) -> RawTx {
        RawTx {
            hash: hash.to_string(),
            from: "0xaaaa".to_string(),
            to: Some("0xcontract".to_string()),
            input: vec![1, 2, 3, 4],
            value: "0".to_string(),
            block_number: 10,
            block_hash: "0xblock10".to_string(),
            timestamp: 1_700_000_000,
        }
    }

    fn config(min_retry_delay_secs: u64, max_attempts: u32) -> PendingTxConfig {
        PendingTxConfig {
            min_retry_delay_secs,
            max_attempts,
        }
    }

    #[tokio::test]
    async fn parked_tx_is_not_due_before_the_retry_delay() {
        let queue = PendingTxQueue::new(&config(30, 5));
        queue.park(tx("0xtx1"), 1_000).await;

        assert!(queue.due_for_retry(1_010).await.is_empty());
        let due = queue.due_for_retry(1_030).await;
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].hash, "0xtx1");
    }

    #[tokio::test]
    async fn re_parking_an_in_flight_hash_does_not_reset_attempts() {
        let queue = PendingTxQueue::new(&config(30, 5));
        queue.park(tx("0xtx1"), 1_000).await;
        queue.record_attempt("0xtx1", 1_030).await;
        queue.park(tx("0xtx1"), 1_035).await;

        let due = queue.due_for_retry(1_060).await;
        assert_eq!(due.len(), 1);
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn drops_after_max_attempts() {
        let queue = PendingTxQueue::new(&config(30, 2));
        queue.park(tx("0xtx1"), 1_000).await;

        let first = queue.record_attempt("0xtx1", 1_030).await;
        assert_eq!(first, RetryOutcome::Retrying);
        assert_eq!(queue.len().await, 1);

        let second = queue.record_attempt("0xtx1", 1_060).await;
        assert_eq!(second, RetryOutcome::Dropped);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn record_attempt_on_unknown_hash_is_not_found() {
        let queue = PendingTxQueue::new(&config(30, 5));
        let outcome = queue.record_attempt("0xmissing", 1_000).await;
        assert_eq!(outcome, RetryOutcome::NotFound);
    }

    #[tokio::test]
    async fn remove_clears_a_resolved_entry() {
        let queue = PendingTxQueue::new(&config(30, 5));
        queue.park(tx("0xtx1"), 1_000).await;
        queue.remove("0xtx1").await;
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn peek_returns_the_parked_tx_without_consuming_it() {
        let queue = PendingTxQueue::new(&config(30, 5));
        queue.park(tx("0xtx1"), 1_000).await;

        let found = queue.peek("0xtx1").await.expect("tx should be parked");
        assert_eq!(found.hash, "0xtx1");
        assert_eq!(queue.len().await, 1);
        assert!(queue.peek("0xmissing").await.is_none());
    }
}
