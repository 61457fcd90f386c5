//! Metrics Rollup (C10, spec §4.10, §4.11).
//!
//! Every state-changing handler folds its effect into the same block
//! transaction as the triggering handler: a weekly and monthly bucket
//! scoped to the provider, a weekly and monthly bucket scoped to the proof
//! set (when applicable), and the singleton network bucket. Bucket ids are
//! `timestamp / 604800` (weekly) and `timestamp / 2592000` (monthly).

use crate::domain::{month_bucket, week_bucket, MetricsBucket, ReorgHeader};
use crate::error::StoreError;
use crate::store::{EntityRow, Store, StoreExt};

const NETWORK_SCOPE: &str = "network";

fn provider_scope(provider: &str) -> String {
    format!("provider:{}", provider.to_lowercase())
}

fn proof_set_scope(set_id: &str) -> String {
    format!("proofset:{}", set_id)
}

async fn update_bucket(
    store: &(impl Store + ?Sized),
    bucket_id: String,
    scope_key: String,
    block_number: u64,
    block_hash: &str,
    apply: impl Fn(&mut MetricsBucket),
) -> Result<(), StoreError> {
    let existing = store.find_latest_metrics_bucket(&bucket_id, &scope_key).await?;
    let key = MetricsBucket::key(&bucket_id, &scope_key);
    let header = match &existing {
        Some(e) => ReorgHeader::succeeding(&e.header, format!("{}@{}", key, block_number), block_number, block_hash),
        None => ReorgHeader::new(format!("{}@{}", key, block_number), block_number, block_hash),
    };
    let mut bucket = existing.unwrap_or_else(|| MetricsBucket::new(header.clone(), bucket_id.clone(), scope_key.clone()));
    bucket.header = header;
    apply(&mut bucket);
    store.store_entity(EntityRow::MetricsBucket(bucket)).await
}

/// Updates weekly/monthly buckets for provider, proof set, and network
/// scopes with the same mutator, so each rollup function stays a one-liner
/// per scope.
async fn roll_up(
    store: &(impl Store + ?Sized),
    timestamp: u64,
    provider: Option<&str>,
    set_id: Option<&str>,
    block_number: u64,
    block_hash: &str,
    apply: impl Fn(&mut MetricsBucket) + Copy,
) -> Result<(), StoreError> {
    let week = week_bucket(timestamp).to_string();
    let month = month_bucket(timestamp).to_string();

    if let Some(provider) = provider {
        let scope = provider_scope(provider);
        update_bucket(store, week.clone(), scope.clone(), block_number, block_hash, apply).await?;
        update_bucket(store, month.clone(), scope, block_number, block_hash, apply).await?;
    }
    if let Some(set_id) = set_id {
        let scope = proof_set_scope(set_id);
        update_bucket(store, week.clone(), scope.clone(), block_number, block_hash, apply).await?;
        update_bucket(store, month.clone(), scope, block_number, block_hash, apply).await?;
    }
    update_bucket(store, week, NETWORK_SCOPE.to_string(), block_number, block_hash, apply).await?;
    update_bucket(store, month, NETWORK_SCOPE.to_string(), block_number, block_hash, apply).await?;
    Ok(())
}

pub async fn record_roots_added(
    store: &(impl Store + ?Sized),
    timestamp: u64,
    set_id: &str,
    provider: &str,
    count: u64,
    block_number: u64,
    block_hash: &str,
) -> Result<(), StoreError> {
    roll_up(store, timestamp, Some(provider), Some(set_id), block_number, block_hash, move |b| {
        b.roots_added += count;
    })
    .await
}

pub async fn record_root_removed(
    store: &(impl Store + ?Sized),
    timestamp: u64,
    set_id: &str,
    provider: &str,
    count: u64,
    block_number: u64,
    block_hash: &str,
) -> Result<(), StoreError> {
    roll_up(store, timestamp, Some(provider), Some(set_id), block_number, block_hash, move |b| {
        b.roots_removed += count;
    })
    .await
}

pub async fn record_proof_submitted(
    store: &(impl Store + ?Sized),
    timestamp: u64,
    set_id: &str,
    provider: &str,
    block_number: u64,
    block_hash: &str,
) -> Result<(), StoreError> {
    roll_up(store, timestamp, Some(provider), Some(set_id), block_number, block_hash, |b| {
        b.proofs_submitted += 1;
    })
    .await
}

pub async fn record_fault(
    store: &(impl Store + ?Sized),
    timestamp: u64,
    set_id: &str,
    provider: &str,
    count: u64,
    block_number: u64,
    block_hash: &str,
) -> Result<(), StoreError> {
    roll_up(store, timestamp, Some(provider), Some(set_id), block_number, block_hash, move |b| {
        b.faults += count;
    })
    .await
}

pub async fn record_fee_paid(
    store: &(impl Store + ?Sized),
    timestamp: u64,
    set_id: &str,
    provider: &str,
    fee: u128,
    block_number: u64,
    block_hash: &str,
) -> Result<(), StoreError> {
    roll_up(store, timestamp, Some(provider), Some(set_id), block_number, block_hash, move |b| {
        b.fee_paid += fee;
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    #[tokio::test]
    async fn records_roots_added_across_scopes() {
        let store = MemoryStore::new();
        record_roots_added(&store, 1_700_000_000, "1", "0xaa", 2, 1, "h1")
            .await
            .unwrap();

        let week = week_bucket(1_700_000_000).to_string();
        let provider_bucket = store
            .find_latest_metrics_bucket(&week, &provider_scope("0xaa"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(provider_bucket.roots_added, 2);

        let network_bucket = store
            .find_latest_metrics_bucket(&week, NETWORK_SCOPE)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(network_bucket.roots_added, 2);
    }

    #[tokio::test]
    async fn accumulates_across_calls() {
        let store = MemoryStore::new();
        record_fee_paid(&store, 1_700_000_000, "1", "0xaa", 100, 1, "h1").await.unwrap();
        record_fee_paid(&store, 1_700_000_000, "1", "0xaa", 50, 2, "h2").await.unwrap();

        let week = week_bucket(1_700_000_000).to_string();
        let bucket = store
            .find_latest_metrics_bucket(&week, &proof_set_scope("1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(bucket.fee_paid, 150);
    }
}
