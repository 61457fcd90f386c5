//! `FaultRecord` (spec §4.7), emitted from `nextProvingPeriod(...)`.
//!
//! The faulting root set is not carried in the event itself; it is
//! reconstructed deterministically from chain randomness and the sum-tree,
//! the same way the contract derives its challenge indices.

use super::common::{append_key, next_header};
use super::{Handler, HandlerContext};
use crate::codec::{decode_uint256, keccak256};
use crate::domain::{narrow_u64, EventLog, RawLog, RawTx};
use crate::error::IndexerError;
use crate::metrics_rollup;
use crate::store::{EntityRow, StoreExt};
use crate::sumtree;
use async_trait::async_trait;
use num_bigint::BigUint;
use std::collections::BTreeSet;

fn topic_uint(topic: &str) -> Result<BigUint, IndexerError> {
    let bytes = crate::codec::Bytes32::from_hex(topic).map_err(IndexerError::Codec)?;
    Ok(BigUint::from_bytes_be(&bytes.0))
}

fn pad32(value: &BigUint) -> [u8; 32] {
    let bytes = value.to_bytes_be();
    let mut out = [0u8; 32];
    if bytes.len() >= 32 {
        out.copy_from_slice(&bytes[bytes.len() - 32..]);
    } else {
        out[32 - bytes.len()..].copy_from_slice(&bytes);
    }
    out
}

/// Derives the `i`-th challenge's offset into the sum-tree's leaf space:
/// `keccak256(pad32(seed) || pad32(setId) || be_u64(i)) mod challenge_range`.
fn challenge_index(seed: &BigUint, set_id: &BigUint, i: u64, challenge_range: u64) -> u64 {
    if challenge_range == 0 {
        return 0;
    }
    let mut preimage = Vec::with_capacity(72);
    preimage.extend_from_slice(&pad32(seed));
    preimage.extend_from_slice(&pad32(set_id));
    preimage.extend_from_slice(&i.to_be_bytes());
    let digest = keccak256(&preimage);
    let value = BigUint::from_bytes_be(&digest.0);
    narrow_u64(&(value % BigUint::from(challenge_range)), "challengeIndex")
}

pub struct FaultRecordHandler;

#[async_trait]
impl Handler for FaultRecordHandler {
    async fn handle_event(
        &self,
        ctx: &HandlerContext<'_>,
        log: &RawLog,
        _tx: Option<&RawTx>,
    ) -> Result<(), IndexerError> {
        if log.topics.len() < 2 {
            return Err(IndexerError::DecodeMismatch(
                "FaultRecord requires a setId topic".to_string(),
            ));
        }
        let set_id_num = topic_uint(&log.topics[1])?;
        let set_id = set_id_num.to_string();
        let periods_faulted = narrow_u64(&decode_uint256(&log.data, 0).map_err(IndexerError::Codec)?, "periodsFaulted");
        let deadline = narrow_u64(&decode_uint256(&log.data, 32).map_err(IndexerError::Codec)?, "deadline");

        let Some(mut proof_set) = ctx.store.find_latest_proof_set(&set_id).await.map_err(IndexerError::Store)? else {
            return Err(IndexerError::MissingPrerequisite(format!(
                "ProofSet {} not found for FaultRecord",
                set_id
            )));
        };
        let owner = proof_set.owner.clone();
        let challenge_epoch = proof_set.next_challenge_epoch;
        let challenge_range = proof_set.challenge_range;
        let next_root_id = proof_set.next_root_id;

        let root_ids: Vec<u64> = match ctx.rpc.get_randomness(challenge_epoch).await {
            Ok(seed) => {
                let indices: Vec<u64> = (0..ctx.fault.num_challenges as u64)
                    .map(|i| challenge_index(&seed, &set_id_num, i, challenge_range))
                    .collect();
                sumtree::find_root_ids(ctx.store, &set_id, next_root_id, &indices, ctx.block_number)
                    .await
                    .map_err(IndexerError::Store)?
            }
            Err(err) => {
                tracing::warn!(set_id = %set_id, challenge_epoch, error = %err, "randomness unavailable, recording fault with empty root list");
                Vec::new()
            }
        };
        let unique_roots: BTreeSet<u64> = root_ids.into_iter().collect();

        for root_id in &unique_roots {
            let Some(mut root) = ctx.store.find_latest_root(&set_id, *root_id).await.map_err(IndexerError::Store)? else {
                tracing::warn!(set_id = %set_id, root_id, "root missing for FaultRecord");
                continue;
            };
            root.header = next_header(Some(&root.header), format!("{}_{}@{}", set_id, root_id, ctx.block_number), ctx.block_number, ctx.block_hash);
            if root.last_faulted_epoch != challenge_epoch {
                root.total_periods_faulted += periods_faulted;
            }
            root.last_faulted_epoch = challenge_epoch;
            root.last_faulted_at = ctx.timestamp;
            ctx.store
                .store_entity(EntityRow::Root(root))
                .await
                .map_err(IndexerError::Store)?;
        }

        proof_set.header = next_header(Some(&proof_set.header), format!("{}@{}", set_id, ctx.block_number), ctx.block_number, ctx.block_hash);
        proof_set.total_faulted_periods += periods_faulted;
        proof_set.total_faulted_roots += unique_roots.len() as u64;
        ctx.store
            .store_entity(EntityRow::ProofSet(proof_set))
            .await
            .map_err(IndexerError::Store)?;

        if let Some(mut provider) = ctx.store.find_latest_provider(&owner).await.map_err(IndexerError::Store)? {
            provider.header = next_header(Some(&provider.header), format!("{}@{}", owner, ctx.block_number), ctx.block_number, ctx.block_hash);
            provider.total_faulted_periods += periods_faulted;
            provider.total_faulted_roots += unique_roots.len() as u64;
            ctx.store
                .store_entity(EntityRow::Provider(provider))
                .await
                .map_err(IndexerError::Store)?;
        }

        ctx.store
            .append_fault_record(crate::domain::FaultRecord {
                id: append_key(&log.transaction_hash, log.log_index),
                set_id: set_id.clone(),
                root_ids: unique_roots.into_iter().collect(),
                current_challenge_epoch: challenge_epoch,
                next_challenge_epoch: deadline,
                periods_faulted,
                deadline,
                block_number: ctx.block_number,
                block_hash: ctx.block_hash.to_string(),
            })
            .await
            .map_err(IndexerError::Store)?;

        if periods_faulted > 0 {
            metrics_rollup::record_fault(
                ctx.store,
                ctx.timestamp,
                &set_id,
                &owner,
                periods_faulted,
                ctx.block_number,
                ctx.block_hash,
            )
            .await
            .map_err(IndexerError::Store)?;
        }

        ctx.store
            .append_event_log(EventLog {
                id: append_key(&log.transaction_hash, log.log_index),
                name: "FaultRecord".to_string(),
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
}
