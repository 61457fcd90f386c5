//! `ProofSetCreated`, `ProofSetOwnerChanged`, `ProofSetDeleted`,
//! `ProofSetEmpty` (spec §4.7).

use super::common::{append_key, decrement_service_link, increment_service_link, link_provider_to_service, next_header};
use super::{Handler, HandlerContext};
use crate::codec::{decode_method_call, Address, Bytes32, DecodedArgs};
use crate::domain::{
    clamp_sub_u128, clamp_sub_u64, EventLog, Provider, ProofSet, ReorgHeader, Transaction, RawLog, RawTx,
};
use crate::error::IndexerError;
use crate::store::{EntityRow, StoreExt};
use async_trait::async_trait;
use num_bigint::BigUint;

fn topic_uint(topic: &str) -> Result<BigUint, IndexerError> {
    let bytes = Bytes32::from_hex(topic).map_err(IndexerError::Codec)?;
    Ok(BigUint::from_bytes_be(&bytes.0))
}

fn topic_address(topic: &str) -> Result<Address, IndexerError> {
    let bytes = Bytes32::from_hex(topic).map_err(IndexerError::Codec)?;
    Ok(crate::codec::decode_address_from_topic(&bytes.0))
}

async fn append_event_log(
    ctx: &HandlerContext<'_>,
    log: &RawLog,
    name: &str,
) -> Result<(), IndexerError> {
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

async fn upsert_creating_tx(
    ctx: &HandlerContext<'_>,
    tx: Option<&RawTx>,
    method: &str,
    proof_set_id: &str,
) -> Result<(), IndexerError> {
    if let Some(tx) = tx {
        ctx.store
            .upsert_transaction(Transaction {
                hash: tx.hash.clone(),
                from: tx.from.clone(),
                to: tx.to.clone(),
                value: tx.value.clone(),
                method: Some(method.to_string()),
                height: tx.block_number,
                block_hash: tx.block_hash.clone(),
                status: true,
                proof_set_id: Some(proof_set_id.to_string()),
            })
            .await
            .map_err(IndexerError::Store)?;
    }
    Ok(())
}

pub struct ProofSetCreatedHandler;

#[async_trait]
impl Handler for ProofSetCreatedHandler {
    async fn handle_event(
        &self,
        ctx: &HandlerContext<'_>,
        log: &RawLog,
        tx: Option<&RawTx>,
    ) -> Result<(), IndexerError> {
        if log.topics.len() < 3 {
            return Err(IndexerError::DecodeMismatch(
                "ProofSetCreated requires 3 topics (topic0, setId, owner)".to_string(),
            ));
        }
        let set_id = topic_uint(&log.topics[1])?.to_string();
        let owner = topic_address(&log.topics[2])?.to_hex();

        if ctx.store.find_latest_proof_set(&set_id).await.map_err(IndexerError::Store)?.is_some() {
            return Err(IndexerError::EntityAlreadyExists(format!(
                "ProofSet {} already exists",
                set_id
            )));
        }

        let listener = match tx.map(|t| decode_method_call(&t.input, "createProofSet(address)")) {
            Some(Ok(DecodedArgs::CreateProofSet { listener })) => listener.to_hex(),
            Some(Ok(_)) => unreachable!("decode_method_call returned the wrong variant"),
            Some(Err(err)) => return Err(IndexerError::Codec(err)),
            None => {
                tracing::warn!(set_id = %set_id, "no associated tx for ProofSetCreated; listener unknown");
                Address([0u8; 20]).to_hex()
            }
        };

        let existing_provider = ctx.store.find_latest_provider(&owner).await.map_err(IndexerError::Store)?;
        let provider_header = next_header(
            existing_provider.as_ref().map(|p| &p.header),
            format!("{}@{}", owner, ctx.block_number),
            ctx.block_number,
            ctx.block_hash,
        );
        let mut provider = existing_provider
            .unwrap_or_else(|| Provider::new(provider_header.clone(), owner.clone()));
        provider.header = provider_header;
        provider.total_proof_sets += 1;
        ctx.store
            .store_entity(EntityRow::Provider(provider))
            .await
            .map_err(IndexerError::Store)?;

        let mut proof_set = ProofSet::new(
            ReorgHeader::new(format!("{}@{}", set_id, ctx.block_number), ctx.block_number, ctx.block_hash),
            set_id.clone(),
            owner.clone(),
            listener.clone(),
        );
        proof_set.total_event_logs += 1;
        if tx.is_some() {
            proof_set.total_transactions += 1;
        }
        ctx.store
            .store_entity(EntityRow::ProofSet(proof_set))
            .await
            .map_err(IndexerError::Store)?;

        increment_service_link(ctx.store, &listener, &owner, ctx.block_number, ctx.block_hash)
            .await
            .map_err(IndexerError::Store)?;

        append_event_log(ctx, log, "ProofSetCreated").await?;
        upsert_creating_tx(ctx, tx, "createProofSet", &set_id).await?;

        Ok(())
    }
}

pub struct ProofSetOwnerChangedHandler;

#[async_trait]
impl Handler for ProofSetOwnerChangedHandler {
    async fn handle_event(
        &self,
        ctx: &HandlerContext<'_>,
        log: &RawLog,
        _tx: Option<&RawTx>,
    ) -> Result<(), IndexerError> {
        if log.topics.len() < 4 {
            return Err(IndexerError::DecodeMismatch(
                "ProofSetOwnerChanged requires 4 topics".to_string(),
            ));
        }
        let set_id = topic_uint(&log.topics[1])?.to_string();
        let old_owner = topic_address(&log.topics[2])?.to_hex();
        let new_owner = topic_address(&log.topics[3])?.to_hex();

        let Some(mut proof_set) = ctx.store.find_latest_proof_set(&set_id).await.map_err(IndexerError::Store)? else {
            return Err(IndexerError::MissingPrerequisite(format!(
                "ProofSet {} not found for ownership change",
                set_id
            )));
        };
        let listener = proof_set.listener.clone();

        proof_set.header = next_header(
            Some(&proof_set.header),
            format!("{}@{}", set_id, ctx.block_number),
            ctx.block_number,
            ctx.block_hash,
        );
        proof_set.owner = new_owner.clone();
        ctx.store
            .store_entity(EntityRow::ProofSet(proof_set))
            .await
            .map_err(IndexerError::Store)?;

        if let Some(mut old_provider) = ctx.store.find_latest_provider(&old_owner).await.map_err(IndexerError::Store)? {
            old_provider.header = next_header(
                Some(&old_provider.header),
                format!("{}@{}", old_owner, ctx.block_number),
                ctx.block_number,
                ctx.block_hash,
            );
            if clamp_sub_u64(&mut old_provider.total_proof_sets, 1) {
                tracing::warn!(set_id = %set_id, old_owner = %old_owner, "old provider total_proof_sets would go negative, clamped to 0");
            }
            ctx.store
                .store_entity(EntityRow::Provider(old_provider))
                .await
                .map_err(IndexerError::Store)?;
        } else {
            tracing::warn!(set_id = %set_id, old_owner = %old_owner, "old provider missing on ownership change");
        }

        let existing_new_provider = ctx.store.find_latest_provider(&new_owner).await.map_err(IndexerError::Store)?;
        let new_provider_header = next_header(
            existing_new_provider.as_ref().map(|p| &p.header),
            format!("{}@{}", new_owner, ctx.block_number),
            ctx.block_number,
            ctx.block_hash,
        );
        let mut new_provider = existing_new_provider
            .unwrap_or_else(|| Provider::new(new_provider_header.clone(), new_owner.clone()));
        new_provider.header = new_provider_header;
        new_provider.total_proof_sets += 1;
        ctx.store
            .store_entity(EntityRow::Provider(new_provider))
            .await
            .map_err(IndexerError::Store)?;

        decrement_service_link(ctx.store, &listener, &old_owner, ctx.block_number, ctx.block_hash)
            .await
            .map_err(IndexerError::Store)?;
        link_provider_to_service(ctx.store, &listener, &new_owner, ctx.block_number, ctx.block_hash)
            .await
            .map_err(IndexerError::Store)?;

        append_event_log(ctx, log, "ProofSetOwnerChanged").await?;
        Ok(())
    }
}

pub struct ProofSetDeletedHandler;

#[async_trait]
impl Handler for ProofSetDeletedHandler {
    async fn handle_event(
        &self,
        ctx: &HandlerContext<'_>,
        log: &RawLog,
        _tx: Option<&RawTx>,
    ) -> Result<(), IndexerError> {
        if log.topics.len() < 2 {
            return Err(IndexerError::DecodeMismatch(
                "ProofSetDeleted requires a setId topic".to_string(),
            ));
        }
        let set_id = topic_uint(&log.topics[1])?.to_string();

        let Some(mut proof_set) = ctx.store.find_latest_proof_set(&set_id).await.map_err(IndexerError::Store)? else {
            return Err(IndexerError::MissingPrerequisite(format!(
                "ProofSet {} not found for deletion",
                set_id
            )));
        };
        let owner = proof_set.owner.clone();
        let total_data_size = proof_set.total_data_size;

        proof_set.header = next_header(
            Some(&proof_set.header),
            format!("{}@{}", set_id, ctx.block_number),
            ctx.block_number,
            ctx.block_hash,
        );
        proof_set.total_roots = 0;
        proof_set.total_data_size = 0;
        proof_set.total_fee_paid = 0;
        proof_set.total_proofs = 0;
        proof_set.total_proved_roots = 0;
        proof_set.total_faulted_periods = 0;
        proof_set.total_faulted_roots = 0;
        proof_set.leaf_count = 0;
        proof_set.owner = Address([0u8; 20]).to_hex();
        proof_set.is_active = false;
        proof_set.last_proven_epoch = 0;
        proof_set.next_challenge_epoch = 0;
        ctx.store
            .store_entity(EntityRow::ProofSet(proof_set))
            .await
            .map_err(IndexerError::Store)?;

        if let Some(mut provider) = ctx.store.find_latest_provider(&owner).await.map_err(IndexerError::Store)? {
            provider.header = next_header(
                Some(&provider.header),
                format!("{}@{}", owner, ctx.block_number),
                ctx.block_number,
                ctx.block_hash,
            );
            if clamp_sub_u64(&mut provider.total_proof_sets, 1) {
                tracing::warn!(set_id = %set_id, owner = %owner, "provider total_proof_sets would go negative, clamped to 0");
            }
            if clamp_sub_u128(&mut provider.total_data_size, total_data_size) {
                tracing::warn!(set_id = %set_id, owner = %owner, "provider total_data_size would go negative, clamped to 0");
            }
            ctx.store
                .store_entity(EntityRow::Provider(provider))
                .await
                .map_err(IndexerError::Store)?;
        } else {
            tracing::warn!(set_id = %set_id, owner = %owner, "owning provider missing on proof set deletion");
        }

        append_event_log(ctx, log, "ProofSetDeleted").await?;
        Ok(())
    }
}

pub struct ProofSetEmptyHandler;

#[async_trait]
impl Handler for ProofSetEmptyHandler {
    async fn handle_event(
        &self,
        ctx: &HandlerContext<'_>,
        log: &RawLog,
        _tx: Option<&RawTx>,
    ) -> Result<(), IndexerError> {
        if log.topics.len() < 2 {
            return Err(IndexerError::DecodeMismatch(
                "ProofSetEmpty requires a setId topic".to_string(),
            ));
        }
        let set_id = topic_uint(&log.topics[1])?.to_string();

        let Some(mut proof_set) = ctx.store.find_latest_proof_set(&set_id).await.map_err(IndexerError::Store)? else {
            return Err(IndexerError::MissingPrerequisite(format!(
                "ProofSet {} not found for empty notice",
                set_id
            )));
        };
        let owner = proof_set.owner.clone();
        let prior_data_size = proof_set.total_data_size;

        proof_set.header = next_header(
            Some(&proof_set.header),
            format!("{}@{}", set_id, ctx.block_number),
            ctx.block_number,
            ctx.block_hash,
        );
        proof_set.total_roots = 0;
        proof_set.total_data_size = 0;
        proof_set.leaf_count = 0;
        ctx.store
            .store_entity(EntityRow::ProofSet(proof_set))
            .await
            .map_err(IndexerError::Store)?;

        if let Some(mut provider) = ctx.store.find_latest_provider(&owner).await.map_err(IndexerError::Store)? {
            provider.header = next_header(
                Some(&provider.header),
                format!("{}@{}", owner, ctx.block_number),
                ctx.block_number,
                ctx.block_hash,
            );
            if clamp_sub_u128(&mut provider.total_data_size, prior_data_size) {
                tracing::warn!(set_id = %set_id, owner = %owner, "provider total_data_size would go negative, clamped to 0");
            }
            ctx.store
                .store_entity(EntityRow::Provider(provider))
                .await
                .map_err(IndexerError::Store)?;
        }

        append_event_log(ctx, log, "ProofSetEmpty").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FaultConfig, ProvingConfig};
    use crate::rpc::UnavailableRandomness;
    use crate::store::memory::MemoryStore;
    use crate::store::Store;

    fn topic_uint256(v: u64) -> String {
        let mut word = [0u8; 32];
        word[24..].copy_from_slice(&v.to_be_bytes());
        format!("0x{}", hex::encode(word))
    }

    fn topic_address(addr: &str) -> String {
        let addr = Address::from_hex(addr).unwrap();
        let mut word = [0u8; 32];
        word[12..].copy_from_slice(&addr.0);
        format!("0x{}", hex::encode(word))
    }

    fn create_proof_set_calldata(listener: &str) -> Vec<u8> {
        let listener = Address::from_hex(listener).unwrap();
        let mut data = vec![0u8; 4];
        let mut word = [0u8; 32];
        word[12..].copy_from_slice(&listener.0);
        data.extend_from_slice(&word);
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

    fn raw_log(topics: Vec<String>) -> RawLog {
        RawLog {
            address: "0xcontract".to_string(),
            topics,
            data: Vec::new(),
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
    async fn proof_set_created_decodes_listener_from_calldata_and_creates_provider() {
        let store = MemoryStore::new();
        let rpc = UnavailableRandomness;
        let proving = ProvingConfig::default();
        let fault = FaultConfig::default();
        let c = ctx(&store, &rpc, &proving, &fault);

        let owner = "0x1111111111111111111111111111111111111111";
        let listener = "0x2222222222222222222222222222222222222222";
        let log = raw_log(vec![
            topic_uint256(0), // topic0 placeholder
            topic_uint256(7),
            topic_address(owner),
        ]);
        let tx = RawTx {
            hash: "0xtx1".to_string(),
            from: owner.to_string(),
            to: Some("0xcontract".to_string()),
            input: create_proof_set_calldata(listener),
            value: "0".to_string(),
            block_number: 10,
            block_hash: "0xblock10".to_string(),
            timestamp: 1_700_000_000,
        };

        ProofSetCreatedHandler
            .handle_event(&c, &log, Some(&tx))
            .await
            .unwrap();

        let proof_set = store.find_latest_proof_set("7").await.unwrap().unwrap();
        assert_eq!(proof_set.owner, Address::from_hex(owner).unwrap().to_hex());
        assert_eq!(proof_set.listener, Address::from_hex(listener).unwrap().to_hex());

        let provider = store.find_latest_provider(&proof_set.owner).await.unwrap().unwrap();
        assert_eq!(provider.total_proof_sets, 1);

        let link = store
            .find_latest_service_link(&proof_set.listener, &proof_set.owner)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(link.proof_set_count, 1);
    }

    #[tokio::test]
    async fn proof_set_created_rejects_duplicate_set_id() {
        let store = MemoryStore::new();
        let rpc = UnavailableRandomness;
        let proving = ProvingConfig::default();
        let fault = FaultConfig::default();
        let c = ctx(&store, &rpc, &proving, &fault);

        let owner = "0x1111111111111111111111111111111111111111";
        let listener = "0x2222222222222222222222222222222222222222";
        let log = raw_log(vec![topic_uint256(0), topic_uint256(7), topic_address(owner)]);
        let tx = RawTx {
            hash: "0xtx1".to_string(),
            from: owner.to_string(),
            to: Some("0xcontract".to_string()),
            input: create_proof_set_calldata(listener),
            value: "0".to_string(),
            block_number: 10,
            block_hash: "0xblock10".to_string(),
            timestamp: 1_700_000_000,
        };
        ProofSetCreatedHandler.handle_event(&c, &log, Some(&tx)).await.unwrap();

        let err = ProofSetCreatedHandler.handle_event(&c, &log, Some(&tx)).await.unwrap_err();
        assert!(matches!(err, IndexerError::EntityAlreadyExists(_)));
    }

    #[tokio::test]
    async fn proof_set_deleted_zeroes_counters_and_clears_owner() {
        let store = MemoryStore::new();
        let rpc = UnavailableRandomness;
        let proving = ProvingConfig::default();
        let fault = FaultConfig::default();
        let c = ctx(&store, &rpc, &proving, &fault);

        let owner = "0x1111111111111111111111111111111111111111";
        let listener = "0x2222222222222222222222222222222222222222";
        let created_log = raw_log(vec![topic_uint256(0), topic_uint256(7), topic_address(owner)]);
        let tx = RawTx {
            hash: "0xtx1".to_string(),
            from: owner.to_string(),
            to: Some("0xcontract".to_string()),
            input: create_proof_set_calldata(listener),
            value: "0".to_string(),
            block_number: 10,
            block_hash: "0xblock10".to_string(),
            timestamp: 1_700_000_000,
        };
        ProofSetCreatedHandler.handle_event(&c, &created_log, Some(&tx)).await.unwrap();

        let delete_log = raw_log(vec![topic_uint256(0), topic_uint256(7)]);
        ProofSetDeletedHandler.handle_event(&c, &delete_log, None).await.unwrap();

        let proof_set = store.find_latest_proof_set("7").await.unwrap().unwrap();
        assert!(!proof_set.is_active);
        assert_eq!(proof_set.total_roots, 0);
        assert_eq!(proof_set.owner, Address([0u8; 20]).to_hex());

        let provider = store
            .find_latest_provider(&Address::from_hex(owner).unwrap().to_hex())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(provider.total_proof_sets, 0);
    }

    #[tokio::test]
    async fn proof_set_owner_changed_transfers_provider_and_service_link_counts() {
        let store = MemoryStore::new();
        let rpc = UnavailableRandomness;
        let proving = ProvingConfig::default();
        let fault = FaultConfig::default();
        let c = ctx(&store, &rpc, &proving, &fault);

        let old_owner = "0x1111111111111111111111111111111111111111";
        let new_owner = "0x3333333333333333333333333333333333333333";
        let listener = "0x2222222222222222222222222222222222222222";
        let created_log = raw_log(vec![topic_uint256(0), topic_uint256(7), topic_address(old_owner)]);
        let tx = RawTx {
            hash: "0xtx1".to_string(),
            from: old_owner.to_string(),
            to: Some("0xcontract".to_string()),
            input: create_proof_set_calldata(listener),
            value: "0".to_string(),
            block_number: 10,
            block_hash: "0xblock10".to_string(),
            timestamp: 1_700_000_000,
        };
        ProofSetCreatedHandler.handle_event(&c, &created_log, Some(&tx)).await.unwrap();

        let service_before = store.find_latest_service(listener).await.unwrap().unwrap();
        assert_eq!(service_before.total_proof_sets, 1);
        assert_eq!(service_before.total_providers, 1);

        let change_log = raw_log(vec![
            topic_uint256(0),
            topic_address(old_owner),
            topic_address(new_owner),
        ]);
        ProofSetOwnerChangedHandler.handle_event(&c, &change_log, None).await.unwrap();

        let proof_set = store.find_latest_proof_set("7").await.unwrap().unwrap();
        assert_eq!(proof_set.owner, Address::from_hex(new_owner).unwrap().to_hex());

        let old_provider = store
            .find_latest_provider(&Address::from_hex(old_owner).unwrap().to_hex())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(old_provider.total_proof_sets, 0);

        let new_provider = store
            .find_latest_provider(&Address::from_hex(new_owner).unwrap().to_hex())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(new_provider.total_proof_sets, 1);

        let old_link = store
            .find_latest_service_link(listener, &Address::from_hex(old_owner).unwrap().to_hex())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(old_link.proof_set_count, 0);

        let new_link = store
            .find_latest_service_link(listener, &Address::from_hex(new_owner).unwrap().to_hex())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(new_link.proof_set_count, 1);

        // An owner change on an already-counted proof set is not a new proof
        // set for the service, and one provider left while another joined.
        let service_after = store.find_latest_service(listener).await.unwrap().unwrap();
        assert_eq!(service_after.total_proof_sets, 1);
        assert_eq!(service_after.total_providers, 1);
    }
}
