//! `NextProvingPeriod`, `PossessionProven` (spec §4.7).

use super::common::{append_key, next_header};
use super::{Handler, HandlerContext};
use crate::codec::{decode_method_call, decode_tuple_array, decode_uint256, encode_merkle_proof, DecodedArgs};
use crate::domain::{narrow_u64, EventLog, Proof, ProvingWindow, RawLog, RawTx};
use crate::error::IndexerError;
use crate::metrics_rollup;
use crate::store::{EntityRow, StoreExt};
use async_trait::async_trait;
use num_bigint::BigUint;
use std::collections::HashSet;

fn topic_uint_string(topic: &str) -> Result<String, IndexerError> {
    let bytes = crate::codec::Bytes32::from_hex(topic).map_err(IndexerError::Codec)?;
    Ok(BigUint::from_bytes_be(&bytes.0).to_string())
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

pub struct NextProvingPeriodHandler;

#[async_trait]
impl Handler for NextProvingPeriodHandler {
    async fn handle_event(
        &self,
        ctx: &HandlerContext<'_>,
        log: &RawLog,
        _tx: Option<&RawTx>,
    ) -> Result<(), IndexerError> {
        if log.topics.len() < 2 {
            return Err(IndexerError::DecodeMismatch(
                "NextProvingPeriod requires a setId topic".to_string(),
            ));
        }
        let set_id = topic_uint_string(&log.topics[1])?;
        let challenge_epoch = narrow_u64(&decode_uint256(&log.data, 0).map_err(IndexerError::Codec)?, "challengeEpoch");
        let leaf_count = narrow_u64(&decode_uint256(&log.data, 32).map_err(IndexerError::Codec)?, "challengeRange");

        let Some(mut proof_set) = ctx.store.find_latest_proof_set(&set_id).await.map_err(IndexerError::Store)? else {
            return Err(IndexerError::MissingPrerequisite(format!(
                "ProofSet {} not found for NextProvingPeriod",
                set_id
            )));
        };

        proof_set.header = next_header(Some(&proof_set.header), format!("{}@{}", set_id, ctx.block_number), ctx.block_number, ctx.block_hash);
        proof_set.next_challenge_epoch = challenge_epoch;
        proof_set.challenge_range = leaf_count;
        let freshly_initialized = proof_set.max_proving_period.is_none();
        if freshly_initialized {
            proof_set.max_proving_period = Some(ctx.proving.max_proving_period);
        }
        ctx.store
            .store_entity(EntityRow::ProofSet(proof_set))
            .await
            .map_err(IndexerError::Store)?;

        let deadline = challenge_epoch;
        let window_start = deadline.saturating_sub(ctx.proving.challenge_window_size);
        let existing_window = ctx.store.find_latest_proving_window(&set_id, deadline).await.map_err(IndexerError::Store)?;
        let key = ProvingWindow::key(&set_id, deadline);
        let header = next_header(existing_window.as_ref().map(|w| &w.header), format!("{}@{}", key, ctx.block_number), ctx.block_number, ctx.block_hash);
        let window = existing_window
            .map(|mut w| {
                w.header = header.clone();
                w
            })
            .unwrap_or_else(|| ProvingWindow::new(header, set_id.clone(), deadline, window_start));
        ctx.store
            .store_entity(EntityRow::ProvingWindow(window))
            .await
            .map_err(IndexerError::Store)?;

        append_event_log(ctx, log, "NextProvingPeriod").await
    }
}

pub struct PossessionProvenHandler;

#[async_trait]
impl Handler for PossessionProvenHandler {
    async fn handle_event(
        &self,
        ctx: &HandlerContext<'_>,
        log: &RawLog,
        tx: Option<&RawTx>,
    ) -> Result<(), IndexerError> {
        if log.topics.len() < 2 {
            return Err(IndexerError::DecodeMismatch(
                "PossessionProven requires a setId topic".to_string(),
            ));
        }
        let set_id = topic_uint_string(&log.topics[1])?;

        let challenges = decode_tuple_array(&log.data, 0, 0, 2, false, |data, offset| {
            let root_id = decode_uint256(data, offset)?;
            let challenge_offset = decode_uint256(data, offset + 32)?;
            Ok((narrow_u64(&root_id, "rootId"), narrow_u64(&challenge_offset, "offset")))
        })
        .map_err(IndexerError::Codec)?;

        let Some(tx) = tx else {
            return Err(IndexerError::MissingPrerequisite(format!(
                "PossessionProven for set {} has no associated transaction",
                set_id
            )));
        };
        let decoded = decode_method_call(&tx.input, "provePossession(uint256,(bytes32,bytes32[])[])")
            .map_err(IndexerError::Codec)?;
        let DecodedArgs::ProvePossession { proofs, .. } = decoded else {
            return Err(IndexerError::DecodeMismatch(
                "provePossession calldata decoded to the wrong shape".to_string(),
            ));
        };
        if challenges.len() != proofs.len() {
            return Err(IndexerError::DecodeMismatch(format!(
                "PossessionProven event carries {} challenges but calldata carries {} proofs",
                challenges.len(),
                proofs.len()
            )));
        }

        let mut unique_roots = HashSet::new();
        for (i, ((root_id, offset), proof)) in challenges.iter().zip(proofs.iter()).enumerate() {
            unique_roots.insert(*root_id);

            ctx.store
                .append_proof(Proof {
                    id: append_key(&log.transaction_hash, log.log_index * 1_000_000 + i as u64),
                    set_id: set_id.clone(),
                    root_id: *root_id,
                    offset: *offset,
                    leaf: proof.leaf.to_hex(),
                    merkle_proof: encode_merkle_proof(&proof.proof),
                    proven_at: ctx.timestamp,
                    block_number: ctx.block_number,
                    block_hash: ctx.block_hash.to_string(),
                })
                .await
                .map_err(IndexerError::Store)?;

            if let Some(mut root) = ctx.store.find_latest_root(&set_id, *root_id).await.map_err(IndexerError::Store)? {
                root.header = next_header(Some(&root.header), format!("{}_{}@{}", set_id, root_id, ctx.block_number), ctx.block_number, ctx.block_hash);
                root.total_proofs_submitted += 1;
                root.last_proven_epoch = ctx.block_number;
                root.last_proven_at = ctx.timestamp;
                ctx.store
                    .store_entity(EntityRow::Root(root))
                    .await
                    .map_err(IndexerError::Store)?;
            } else {
                tracing::warn!(set_id = %set_id, root_id, "root missing for PossessionProven");
            }
        }

        let Some(mut proof_set) = ctx.store.find_latest_proof_set(&set_id).await.map_err(IndexerError::Store)? else {
            return Err(IndexerError::MissingPrerequisite(format!(
                "ProofSet {} not found for PossessionProven",
                set_id
            )));
        };
        proof_set.header = next_header(Some(&proof_set.header), format!("{}@{}", set_id, ctx.block_number), ctx.block_number, ctx.block_hash);
        proof_set.total_proofs += 1;
        proof_set.total_proved_roots += unique_roots.len() as u64;
        proof_set.last_proven_epoch = ctx.block_number;
        let deadline = proof_set.next_challenge_epoch;
        let owner = proof_set.owner.clone();
        ctx.store
            .store_entity(EntityRow::ProofSet(proof_set))
            .await
            .map_err(IndexerError::Store)?;

        if let Some(mut window) = ctx.store.find_latest_proving_window(&set_id, deadline).await.map_err(IndexerError::Store)? {
            let key = ProvingWindow::key(&set_id, deadline);
            window.header = next_header(Some(&window.header), format!("{}@{}", key, ctx.block_number), ctx.block_number, ctx.block_hash);
            window.proof_submitted = true;
            window.is_valid = ctx.block_number >= window.window_start && ctx.block_number <= window.deadline;
            ctx.store
                .store_entity(EntityRow::ProvingWindow(window))
                .await
                .map_err(IndexerError::Store)?;
        }

        metrics_rollup::record_proof_submitted(ctx.store, ctx.timestamp, &set_id, &owner, ctx.block_number, ctx.block_hash)
            .await
            .map_err(IndexerError::Store)?;

        append_event_log(ctx, log, "PossessionProven").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{keccak256, Address};
    use crate::config::{FaultConfig, ProvingConfig};
    use crate::domain::{ProofSet, ReorgHeader, Root};
    use crate::rpc::UnavailableRandomness;
    use crate::store::memory::MemoryStore;
    use crate::store::Store;

    fn topic_uint256(v: u64) -> String {
        let mut word = [0u8; 32];
        word[24..].copy_from_slice(&v.to_be_bytes());
        format!("0x{}", hex::encode(word))
    }

    fn word_u64(v: u64) -> [u8; 32] {
        let mut word = [0u8; 32];
        word[24..].copy_from_slice(&v.to_be_bytes());
        word
    }

    fn next_proving_period_event_data(challenge_epoch: u64, leaf_count: u64) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&word_u64(challenge_epoch));
        out.extend_from_slice(&word_u64(leaf_count));
        out
    }

    /// A static `(uint256,uint256)[]` array: pointer, length, then each pair
    /// packed back-to-back with no per-element indirection.
    fn challenges_event_data(pairs: &[(u64, u64)]) -> Vec<u8> {
        let mut out = word_u64(32).to_vec();
        out.extend_from_slice(&word_u64(pairs.len() as u64));
        for (root_id, offset) in pairs {
            out.extend_from_slice(&word_u64(*root_id));
            out.extend_from_slice(&word_u64(*offset));
        }
        out
    }

    fn encode_bytes32_array(entries: &[[u8; 32]]) -> Vec<u8> {
        let mut out = word_u64(entries.len() as u64).to_vec();
        for e in entries {
            out.extend_from_slice(e);
        }
        out
    }

    /// Encodes a single `(bytes32 leaf, bytes32[] proof)` tuple as it
    /// appears inside the dynamic `proofs` array of `provePossession`.
    fn encode_merkle_entry(leaf: [u8; 32], proof: &[[u8; 32]]) -> Vec<u8> {
        let proof_region = encode_bytes32_array(proof);
        let mut out = Vec::new();
        out.extend_from_slice(&leaf);
        out.extend_from_slice(&word_u64(64)); // offset to proof array, relative to tuple start
        out.extend_from_slice(&proof_region);
        out
    }

    fn prove_possession_calldata(set_id: u64, entries: &[(u64, [u8; 32], Vec<[u8; 32]>)]) -> Vec<u8> {
        let tuples: Vec<Vec<u8>> = entries
            .iter()
            .map(|(_, leaf, proof)| encode_merkle_entry(*leaf, proof))
            .collect();
        let heads_len = entries.len() * 32;
        let mut array_region = word_u64(entries.len() as u64).to_vec();
        let mut running = heads_len;
        for t in &tuples {
            array_region.extend_from_slice(&word_u64(running as u64));
            running += t.len();
        }
        for t in &tuples {
            array_region.extend_from_slice(t);
        }

        let heads_len_outer = 2 * 32;
        let mut data = vec![0u8; 4];
        data.extend_from_slice(&word_u64(set_id));
        data.extend_from_slice(&word_u64(heads_len_outer as u64));
        data.extend_from_slice(&array_region);
        data
    }

    fn ctx<'a>(store: &'a MemoryStore, rpc: &'a UnavailableRandomness, proving: &'a ProvingConfig, fault: &'a FaultConfig) -> HandlerContext<'a> {
        HandlerContext {
            store,
            rpc,
            proving,
            fault,
            block_number: 10,
            block_hash: "0xblock10",
            timestamp: 1_700_000_000,
        }
    }

    async fn seed_proof_set(store: &MemoryStore, set_id: &str, owner: &str) {
        let header = ReorgHeader::new(format!("{}@1", set_id), 1, "0xblock1");
        let proof_set = ProofSet::new(header, set_id.to_string(), owner.to_string(), Address([0u8; 20]).to_hex());
        store.store_entity(EntityRow::ProofSet(proof_set)).await.unwrap();
    }

    async fn seed_root(store: &MemoryStore, set_id: &str, root_id: u64) {
        let header = ReorgHeader::new(format!("{}_{}@1", set_id, root_id), 1, "0xblock1");
        let root = Root::new(header, set_id.to_string(), root_id, 640, "0xcid".to_string());
        store.store_entity(EntityRow::Root(root)).await.unwrap();
    }

    fn raw_log(topics: Vec<String>, data: Vec<u8>) -> RawLog {
        RawLog {
            address: "0xcontract".to_string(),
            topics,
            data,
            log_index: 0,
            block_number: 10,
            block_hash: "0xblock10".to_string(),
            transaction_hash: "0xtx1".to_string(),
            transaction_index: 0,
            removed: false,
            timestamp: 1_700_000_000,
        }
    }

    #[tokio::test]
    async fn next_proving_period_updates_proof_set_and_opens_window() {
        let store = MemoryStore::new();
        let rpc = UnavailableRandomness;
        let proving = ProvingConfig::default();
        let fault = FaultConfig::default();
        let c = ctx(&store, &rpc, &proving, &fault);
        seed_proof_set(&store, "7", "0x1111111111111111111111111111111111111111").await;

        let log = raw_log(
            vec![topic_uint256(0), topic_uint256(7)],
            next_proving_period_event_data(1000, 20),
        );
        NextProvingPeriodHandler.handle_event(&c, &log, None).await.unwrap();

        let proof_set = store.find_latest_proof_set("7").await.unwrap().unwrap();
        assert_eq!(proof_set.next_challenge_epoch, 1000);
        assert_eq!(proof_set.challenge_range, 20);
        assert_eq!(proof_set.max_proving_period, Some(proving.max_proving_period));

        let window = store.find_latest_proving_window("7", 1000).await.unwrap().unwrap();
        assert_eq!(window.window_start, 1000 - proving.challenge_window_size);
        assert!(!window.proof_submitted);
    }

    #[tokio::test]
    async fn possession_proven_records_proofs_and_marks_window_valid() {
        let store = MemoryStore::new();
        let rpc = UnavailableRandomness;
        let proving = ProvingConfig::default();
        let fault = FaultConfig::default();
        let c = ctx(&store, &rpc, &proving, &fault);
        let set_id = "7";
        seed_proof_set(&store, set_id, "0x1111111111111111111111111111111111111111").await;
        seed_root(&store, set_id, 1).await;
        seed_root(&store, set_id, 2).await;

        let window_log = raw_log(
            vec![topic_uint256(0), topic_uint256(7)],
            next_proving_period_event_data(10, 20),
        );
        NextProvingPeriodHandler.handle_event(&c, &window_log, None).await.unwrap();

        let leaf0 = keccak256(b"leaf0").0;
        let leaf1 = keccak256(b"leaf1").0;
        let proof0 = vec![keccak256(b"sibling0").0];
        let proof1 = vec![keccak256(b"sibling1").0];

        let log = raw_log(
            vec![topic_uint256(0), topic_uint256(7)],
            challenges_event_data(&[(1, 5), (2, 9)]),
        );
        let tx = RawTx {
            hash: "0xtx1".to_string(),
            from: "0x1111111111111111111111111111111111111111".to_string(),
            to: Some("0xcontract".to_string()),
            input: prove_possession_calldata(
                7,
                &[(1, leaf0, proof0.clone()), (2, leaf1, proof1.clone())],
            ),
            value: "0".to_string(),
            block_number: 10,
            block_hash: "0xblock10".to_string(),
            timestamp: 1_700_000_000,
        };

        PossessionProvenHandler.handle_event(&c, &log, Some(&tx)).await.unwrap();

        let proof_set = store.find_latest_proof_set(set_id).await.unwrap().unwrap();
        assert_eq!(proof_set.total_proofs, 1);
        assert_eq!(proof_set.total_proved_roots, 2);

        let root1 = store.find_latest_root(set_id, 1).await.unwrap().unwrap();
        assert_eq!(root1.total_proofs_submitted, 1);

        let window = store.find_latest_proving_window(set_id, 10).await.unwrap().unwrap();
        assert!(window.proof_submitted);
    }

    #[tokio::test]
    async fn possession_proven_rejects_challenge_proof_length_mismatch() {
        let store = MemoryStore::new();
        let rpc = UnavailableRandomness;
        let proving = ProvingConfig::default();
        let fault = FaultConfig::default();
        let c = ctx(&store, &rpc, &proving, &fault);
        seed_proof_set(&store, "7", "0x1111111111111111111111111111111111111111").await;

        let log = raw_log(
            vec![topic_uint256(0), topic_uint256(7)],
            challenges_event_data(&[(1, 5), (2, 9)]),
        );
        let leaf0 = keccak256(b"leaf0").0;
        let tx = RawTx {
            hash: "0xtx1".to_string(),
            from: "0x1111111111111111111111111111111111111111".to_string(),
            to: Some("0xcontract".to_string()),
            input: prove_possession_calldata(7, &[(1, leaf0, vec![])]),
            value: "0".to_string(),
            block_number: 10,
            block_hash: "0xblock10".to_string(),
            timestamp: 1_700_000_000,
        };

        let err = PossessionProvenHandler.handle_event(&c, &log, Some(&tx)).await.unwrap_err();
        assert!(matches!(err, IndexerError::DecodeMismatch(_)));
    }
}
