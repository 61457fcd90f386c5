//! `ProofFeePaid` (spec §4.7).

use super::common::{append_key, next_header};
use super::{Handler, HandlerContext};
use crate::codec::{decode_int32, decode_uint256, CodecError, CodecErrorKind};
use crate::domain::{narrow_u128, narrow_u64, EventLog, ProofFee, RawLog, RawTx};
use crate::error::IndexerError;
use crate::metrics_rollup;
use crate::store::{EntityRow, StoreExt};
use async_trait::async_trait;
use num_bigint::BigUint;

fn topic_uint_string(topic: &str) -> Result<String, IndexerError> {
    let bytes = crate::codec::Bytes32::from_hex(topic).map_err(IndexerError::Codec)?;
    Ok(BigUint::from_bytes_be(&bytes.0).to_string())
}

pub struct ProofFeePaidHandler;

#[async_trait]
impl Handler for ProofFeePaidHandler {
    async fn handle_event(
        &self,
        ctx: &HandlerContext<'_>,
        log: &RawLog,
        _tx: Option<&RawTx>,
    ) -> Result<(), IndexerError> {
        if log.topics.len() < 2 {
            return Err(IndexerError::DecodeMismatch(
                "ProofFeePaid requires a setId topic".to_string(),
            ));
        }
        if log.data.len() != 96 {
            return Err(IndexerError::Codec(CodecError::new(CodecErrorKind::BadLength, 0)));
        }
        let set_id = topic_uint_string(&log.topics[1])?;
        let fee = decode_uint256(&log.data, 0).map_err(IndexerError::Codec)?;
        let price = narrow_u64(&decode_uint256(&log.data, 32).map_err(IndexerError::Codec)?, "price");
        let expo = decode_int32(&log.data, 64).map_err(IndexerError::Codec)?;
        let fee_u128 = narrow_u128(&fee);

        let Some(mut proof_set) = ctx.store.find_latest_proof_set(&set_id).await.map_err(IndexerError::Store)? else {
            return Err(IndexerError::MissingPrerequisite(format!(
                "ProofSet {} not found for ProofFeePaid",
                set_id
            )));
        };
        let owner = proof_set.owner.clone();

        ctx.store
            .append_proof_fee(ProofFee {
                id: append_key(&log.transaction_hash, log.log_index),
                set_id: set_id.clone(),
                fee: fee_u128,
                price,
                expo,
                block_number: ctx.block_number,
                block_hash: ctx.block_hash.to_string(),
            })
            .await
            .map_err(IndexerError::Store)?;

        proof_set.header = next_header(Some(&proof_set.header), format!("{}@{}", set_id, ctx.block_number), ctx.block_number, ctx.block_hash);
        proof_set.total_fee_paid = proof_set.total_fee_paid.saturating_add(fee_u128);
        ctx.store
            .store_entity(EntityRow::ProofSet(proof_set))
            .await
            .map_err(IndexerError::Store)?;

        metrics_rollup::record_fee_paid(ctx.store, ctx.timestamp, &set_id, &owner, fee_u128, ctx.block_number, ctx.block_hash)
            .await
            .map_err(IndexerError::Store)?;

        ctx.store
            .append_event_log(EventLog {
                id: append_key(&log.transaction_hash, log.log_index),
                name: "ProofFeePaid".to_string(),
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
