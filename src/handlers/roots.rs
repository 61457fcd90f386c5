//! `RootsAdded`, `RootsRemoved` (spec §4.7).

use super::common::{append_key, next_header};
use super::{Handler, HandlerContext};
use crate::codec::{decode_method_call, decode_tuple_array, decode_uint256, DecodedArgs};
use crate::domain::{clamp_sub_u128, clamp_sub_u64, narrow_u128, narrow_u64, EventLog, ReorgHeader, Root, RawLog, RawTx};
use crate::error::IndexerError;
use crate::metrics_rollup;
use crate::store::{EntityRow, StoreExt};
use crate::sumtree;
use async_trait::async_trait;
use num_bigint::BigUint;

fn topic_uint_string(topic: &str) -> Result<String, IndexerError> {
    let bytes = crate::codec::Bytes32::from_hex(topic).map_err(IndexerError::Codec)?;
    Ok(BigUint::from_bytes_be(&bytes.0).to_string())
}

/// Decodes a top-level, non-indexed `uint256[]` event argument: the data
/// blob is a single offset-pointing head word followed by the array region,
/// same shape as a dynamic function argument.
fn decode_uint256_array(data: &[u8]) -> Result<Vec<u64>, IndexerError> {
    decode_tuple_array(data, 0, 0, 1, false, |data, offset| {
        let v = decode_uint256(data, offset)?;
        Ok(narrow_u64(&v, "rootId"))
    })
    .map_err(IndexerError::Codec)
}

async fn append_event_log(ctx: &HandlerContext<'_>, log: &RawLog, name: &str) -> Result<(), IndexerError> {
    ctx.store
        .append_event_log(EventLog {
            id: append_key(&log.transaction_hash, log.log_index),
            name: name.to_string(),
            address: log.address.clone(),
            topics: log.topics.clone(),
            data: hex::encode(&log.data),
            removed: log.removed,
            block_number: log.block_number,
            block_hash: log.block_hash.clone(),
            timestamp: log.timestamp,
        })
        .await
        .map_err(IndexerError::Store)
}

pub struct RootsAddedHandler;

#[async_trait]
impl Handler for RootsAddedHandler {
    async fn handle_event(
        &self,
        ctx: &HandlerContext<'_>,
        log: &RawLog,
        tx: Option<&RawTx>,
    ) -> Result<(), IndexerError> {
        if log.topics.len() < 2 {
            return Err(IndexerError::DecodeMismatch(
                "RootsAdded requires a setId topic".to_string(),
            ));
        }
        let set_id = topic_uint_string(&log.topics[1])?;
        let root_ids = decode_uint256_array(&log.data)?;

        let Some(tx) = tx else {
            return Err(IndexerError::MissingPrerequisite(format!(
                "RootsAdded for set {} has no associated transaction",
                set_id
            )));
        };
        let decoded = decode_method_call(&tx.input, "addRoots(uint256,(bytes,uint256)[],bytes)")
            .map_err(IndexerError::Codec)?;
        let DecodedArgs::AddRoots { root_data, .. } = decoded else {
            return Err(IndexerError::DecodeMismatch(
                "addRoots calldata decoded to the wrong shape".to_string(),
            ));
        };
        if root_ids.len() != root_data.len() {
            return Err(IndexerError::DecodeMismatch(format!(
                "RootsAdded event carries {} ids but calldata carries {} entries",
                root_ids.len(),
                root_data.len()
            )));
        }

        let Some(mut proof_set) = ctx.store.find_latest_proof_set(&set_id).await.map_err(IndexerError::Store)? else {
            return Err(IndexerError::MissingPrerequisite(format!(
                "ProofSet {} not found for RootsAdded",
                set_id
            )));
        };
        let owner = proof_set.owner.clone();

        let mut total_raw_size: u128 = 0;
        let mut total_leaf_count: u64 = 0;
        for (root_id, rd) in root_ids.iter().zip(root_data.iter()) {
            let raw_size = narrow_u128(&rd.raw_size);
            let header = ReorgHeader::new(
                format!("{}_{}@{}", set_id, root_id, ctx.block_number),
                ctx.block_number,
                ctx.block_hash,
            );
            let root = Root::new(header, set_id.clone(), *root_id, raw_size, format!("0x{}", hex::encode(&rd.cid)));
            total_raw_size = total_raw_size.saturating_add(raw_size);
            total_leaf_count = total_leaf_count.saturating_add(root.leaf_count);
            ctx.store
                .store_entity(EntityRow::Root(root))
                .await
                .map_err(IndexerError::Store)?;
            sumtree::add(ctx.store, &set_id, *root_id, (raw_size as u64) / crate::domain::LEAF_SIZE, ctx.block_number, ctx.block_hash)
                .await
                .map_err(IndexerError::Store)?;
        }

        let n = root_ids.len() as u64;
        proof_set.header = next_header(Some(&proof_set.header), format!("{}@{}", set_id, ctx.block_number), ctx.block_number, ctx.block_hash);
        proof_set.total_roots += n;
        proof_set.next_root_id += n;
        proof_set.total_data_size = proof_set.total_data_size.saturating_add(total_raw_size);
        proof_set.leaf_count = proof_set.leaf_count.saturating_add(total_leaf_count);
        ctx.store
            .store_entity(EntityRow::ProofSet(proof_set))
            .await
            .map_err(IndexerError::Store)?;

        if let Some(mut provider) = ctx.store.find_latest_provider(&owner).await.map_err(IndexerError::Store)? {
            provider.header = next_header(Some(&provider.header), format!("{}@{}", owner, ctx.block_number), ctx.block_number, ctx.block_hash);
            provider.total_roots += n;
            provider.total_data_size = provider.total_data_size.saturating_add(total_raw_size);
            ctx.store
                .store_entity(EntityRow::Provider(provider))
                .await
                .map_err(IndexerError::Store)?;
        }

        metrics_rollup::record_roots_added(ctx.store, ctx.timestamp, &set_id, &owner, n, ctx.block_number, ctx.block_hash)
            .await
            .map_err(IndexerError::Store)?;

        append_event_log(ctx, log, "RootsAdded").await
    }
}

pub struct RootsRemovedHandler;

#[async_trait]
impl Handler for RootsRemovedHandler {
    async fn handle_event(
        &self,
        ctx: &HandlerContext<'_>,
        log: &RawLog,
        _tx: Option<&RawTx>,
    ) -> Result<(), IndexerError> {
        if log.topics.len() < 2 {
            return Err(IndexerError::DecodeMismatch(
                "RootsRemoved requires a setId topic".to_string(),
            ));
        }
        let set_id = topic_uint_string(&log.topics[1])?;
        let root_ids = decode_uint256_array(&log.data)?;

        let Some(mut proof_set) = ctx.store.find_latest_proof_set(&set_id).await.map_err(IndexerError::Store)? else {
            return Err(IndexerError::MissingPrerequisite(format!(
                "ProofSet {} not found for RootsRemoved",
                set_id
            )));
        };
        let owner = proof_set.owner.clone();

        let mut removed_raw_size: u128 = 0;
        let mut removed_leaf_count: u64 = 0;
        let mut removed_count: u64 = 0;
        for root_id in &root_ids {
            let Some(mut root) = ctx.store.find_latest_root(&set_id, *root_id).await.map_err(IndexerError::Store)? else {
                tracing::warn!(set_id = %set_id, root_id, "root missing for RootsRemoved, skipping");
                continue;
            };
            if root.removed {
                continue;
            }
            removed_raw_size = removed_raw_size.saturating_add(root.raw_size);
            removed_leaf_count = removed_leaf_count.saturating_add(root.leaf_count);
            removed_count += 1;

            sumtree::remove(ctx.store, &set_id, *root_id, root.leaf_count, ctx.block_number, ctx.block_hash)
                .await
                .map_err(IndexerError::Store)?;

            root.header = next_header(
                Some(&root.header),
                format!("{}_{}@{}", set_id, root_id, ctx.block_number),
                ctx.block_number,
                ctx.block_hash,
            );
            root.removed = true;
            ctx.store
                .store_entity(EntityRow::Root(root))
                .await
                .map_err(IndexerError::Store)?;
        }

        proof_set.header = next_header(Some(&proof_set.header), format!("{}@{}", set_id, ctx.block_number), ctx.block_number, ctx.block_hash);
        if clamp_sub_u64(&mut proof_set.total_roots, removed_count) {
            tracing::warn!(set_id = %set_id, "proof_set total_roots would go negative, clamped to 0");
        }
        if clamp_sub_u128(&mut proof_set.total_data_size, removed_raw_size) {
            tracing::warn!(set_id = %set_id, "proof_set total_data_size would go negative, clamped to 0");
        }
        if clamp_sub_u64(&mut proof_set.leaf_count, removed_leaf_count) {
            tracing::warn!(set_id = %set_id, "proof_set leaf_count would go negative, clamped to 0");
        }
        ctx.store
            .store_entity(EntityRow::ProofSet(proof_set))
            .await
            .map_err(IndexerError::Store)?;

        if let Some(mut provider) = ctx.store.find_latest_provider(&owner).await.map_err(IndexerError::Store)? {
            provider.header = next_header(Some(&provider.header), format!("{}@{}", owner, ctx.block_number), ctx.block_number, ctx.block_hash);
            if clamp_sub_u64(&mut provider.total_roots, removed_count) {
                tracing::warn!(set_id = %set_id, owner = %owner, "provider total_roots would go negative, clamped to 0");
            }
            if clamp_sub_u128(&mut provider.total_data_size, removed_raw_size) {
                tracing::warn!(set_id = %set_id, owner = %owner, "provider total_data_size would go negative, clamped to 0");
            }
            ctx.store
                .store_entity(EntityRow::Provider(provider))
                .await
                .map_err(IndexerError::Store)?;
        }

        if removed_count > 0 {
            metrics_rollup::record_root_removed(ctx.store, ctx.timestamp, &set_id, &owner, removed_count, ctx.block_number, ctx.block_hash)
                .await
                .map_err(IndexerError::Store)?;
        }

        append_event_log(ctx, log, "RootsRemoved").await
    }
}
