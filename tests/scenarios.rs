//! Cross-component scenarios driving `Chain` end to end against the
//! in-memory store: a dispatch table built from a real config document,
//! real ABI-encoded logs and calldata, no mocked handler behavior.

use pdp_indexer::block_processor::BlockProcessor;
use pdp_indexer::chain::Chain;
use pdp_indexer::codec::Address;
use pdp_indexer::config::{IndexerConfig, ResourceConfig, TriggerConfig, TriggerType};
use pdp_indexer::domain::{BlockBatch, RawLog, RawTx};
use pdp_indexer::dispatch::DispatchTable;
use pdp_indexer::rpc::UnavailableRandomness;
use pdp_indexer::signatures::SignatureRegistry;
use pdp_indexer::store::memory::MemoryStore;
use pdp_indexer::store::{Store, StoreExt};
use std::sync::Arc;
use tokio::sync::watch;

const PROOF_SET_CREATED: &str = "ProofSetCreated(uint256 indexed setId, address indexed owner)";
const ROOTS_ADDED: &str = "RootsAdded(uint256 indexed setId, uint256[] rootIds)";
const ADD_ROOTS_FN: &str = "addRoots(uint256,(bytes,uint256)[],bytes)";
const CREATE_PROOF_SET_FN: &str = "createProofSet(address)";
const CONTRACT: &str = "0xaaaa000000000000000000000000000000aaaa";

fn cfg() -> IndexerConfig {
    IndexerConfig {
        resources: vec![ResourceConfig {
            name: "PDPVerifier".to_string(),
            address: CONTRACT.to_string(),
            triggers: vec![
                TriggerConfig {
                    trigger_type: TriggerType::Event,
                    definition: PROOF_SET_CREATED.to_string(),
                    handler: "ProofSetCreated".to_string(),
                    method_name: None,
                },
                TriggerConfig {
                    trigger_type: TriggerType::Event,
                    definition: ROOTS_ADDED.to_string(),
                    handler: "RootsAdded".to_string(),
                    method_name: None,
                },
                TriggerConfig {
                    trigger_type: TriggerType::Function,
                    definition: ADD_ROOTS_FN.to_string(),
                    handler: "RootsAdded".to_string(),
                    method_name: Some("addRoots".to_string()),
                },
            ],
        }],
        reorg_window: 10,
        pending_tx: Default::default(),
        proving: Default::default(),
        fault: Default::default(),
        finality: Default::default(),
    }
}

fn chain_with_store(store: Arc<dyn Store>) -> Chain {
    let config = cfg();
    let registry = SignatureRegistry::new();
    let dispatch = DispatchTable::build(&config, &registry);
    let processor = BlockProcessor::new(
        "testchain",
        dispatch,
        &config.pending_tx,
        config.reorg_window,
        config.proving.clone(),
        config.fault.clone(),
    );
    Chain::new("testchain", processor, store, Arc::new(UnavailableRandomness))
}

fn never_shuts_down() -> watch::Receiver<bool> {
    let (_tx, rx) = watch::channel(false);
    rx
}

fn word_u64(v: u64) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[24..].copy_from_slice(&v.to_be_bytes());
    word
}

fn topic_uint256(v: u64) -> String {
    format!("0x{}", hex::encode(word_u64(v)))
}

fn topic_address(addr: &str) -> String {
    let addr = Address::from_hex(addr).unwrap();
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(&addr.0);
    format!("0x{}", hex::encode(word))
}

fn create_proof_set_calldata(listener: &str) -> Vec<u8> {
    let listener = Address::from_hex(listener).unwrap();
    let selector = SignatureRegistry::new().selector(CREATE_PROOF_SET_FN);
    let mut data = selector.to_vec();
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(&listener.0);
    data.extend_from_slice(&word);
    data
}

/// Mirrors the `addRoots(uint256,(bytes,uint256)[],bytes)` calldata shape
/// verified against the `roots` handler's own decoder.
fn encode_root_data_array(items: &[(&[u8], u64)]) -> Vec<u8> {
    fn encode_tuple(cid: &[u8], size: u64) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&word_u64(2 * 32));
        out.extend_from_slice(&word_u64(size));
        out.extend_from_slice(&word_u64(cid.len() as u64));
        out.extend_from_slice(cid);
        let pad = (32 - cid.len() % 32) % 32;
        out.extend(std::iter::repeat(0u8).take(pad));
        out
    }
    let tuples: Vec<Vec<u8>> = items.iter().map(|(cid, size)| encode_tuple(cid, *size)).collect();
    let heads_len = items.len() * 32;
    let mut out = word_u64(items.len() as u64).to_vec();
    let mut running = heads_len;
    for t in &tuples {
        out.extend_from_slice(&word_u64(running as u64));
        running += t.len();
    }
    for t in &tuples {
        out.extend_from_slice(t);
    }
    out
}

fn add_roots_calldata(set_id: u64, items: &[(&[u8], u64)]) -> Vec<u8> {
    let array_chunk = encode_root_data_array(items);
    let extra_chunk = word_u64(0).to_vec();
    let heads_len = 3 * 32;
    let array_offset = heads_len;
    let extra_offset = heads_len + array_chunk.len();

    let mut data = SignatureRegistry::new().selector(ADD_ROOTS_FN).to_vec();
    data.extend_from_slice(&word_u64(set_id));
    data.extend_from_slice(&word_u64(array_offset as u64));
    data.extend_from_slice(&word_u64(extra_offset as u64));
    data.extend_from_slice(&array_chunk);
    data.extend_from_slice(&extra_chunk);
    data
}

fn uint256_array_event_data(values: &[u64]) -> Vec<u8> {
    let mut out = word_u64(32).to_vec();
    out.extend_from_slice(&word_u64(values.len() as u64));
    for v in values {
        out.extend_from_slice(&word_u64(*v));
    }
    out
}

fn proof_set_created_log(set_id: u64, owner: &str, block_number: u64, block_hash: &str, tx_hash: &str) -> RawLog {
    RawLog {
        address: CONTRACT.to_string(),
        topics: vec![
            SignatureRegistry::new().topic0(PROOF_SET_CREATED).to_hex(),
            topic_uint256(set_id),
            topic_address(owner),
        ],
        data: Vec::new(),
        log_index: 0,
        block_number,
        block_hash: block_hash.to_string(),
        transaction_hash: tx_hash.to_string(),
        transaction_index: 0,
        removed: false,
        timestamp: 1_700_000_000 + block_number,
    }
}

fn roots_added_log(set_id: u64, root_ids: &[u64], block_number: u64, block_hash: &str, tx_hash: &str, log_index: u64) -> RawLog {
    RawLog {
        address: CONTRACT.to_string(),
        topics: vec![SignatureRegistry::new().topic0(ROOTS_ADDED).to_hex(), topic_uint256(set_id)],
        data: uint256_array_event_data(root_ids),
        log_index,
        block_number,
        block_hash: block_hash.to_string(),
        transaction_hash: tx_hash.to_string(),
        transaction_index: 0,
        removed: false,
        timestamp: 1_700_000_000 + block_number,
    }
}

#[tokio::test]
async fn s1_create_and_add_roots_across_two_blocks() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let chain = chain_with_store(store.clone());
    let shutdown = never_shuts_down();

    let owner = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    let listener = "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
    let create_tx = RawTx {
        hash: "0xtx1".to_string(),
        from: owner.to_string(),
        to: Some(CONTRACT.to_string()),
        input: create_proof_set_calldata(listener),
        value: "0".to_string(),
        block_number: 1,
        block_hash: "0xh1".to_string(),
        timestamp: 1_700_000_001,
    };
    let block_n = BlockBatch {
        block_number: 1,
        block_hash: "0xh1".to_string(),
        parent_hash: "0xh0".to_string(),
        timestamp: 1_700_000_001,
        txs: vec![create_tx],
        logs: vec![proof_set_created_log(1, owner, 1, "0xh1", "0xtx1")],
        finalized_height: None,
    };
    chain.replay(&block_n, &shutdown).await.unwrap();

    let cid0 = [0xde, 0xad, 0xbe, 0xef];
    let cid1 = [0xca, 0xfe, 0x01];
    let add_roots_tx = RawTx {
        hash: "0xtx2".to_string(),
        from: owner.to_string(),
        to: Some(CONTRACT.to_string()),
        input: add_roots_calldata(1, &[(&cid0, 4096), (&cid1, 2048)]),
        value: "0".to_string(),
        block_number: 2,
        block_hash: "0xh2".to_string(),
        timestamp: 1_700_000_002,
    };
    let block_n1 = BlockBatch {
        block_number: 2,
        block_hash: "0xh2".to_string(),
        parent_hash: "0xh1".to_string(),
        timestamp: 1_700_000_002,
        txs: vec![add_roots_tx],
        logs: vec![roots_added_log(1, &[0, 1], 2, "0xh2", "0xtx2", 0)],
        finalized_height: None,
    };
    chain.replay(&block_n1, &shutdown).await.unwrap();

    let proof_set = store.find_latest_proof_set("1").await.unwrap().unwrap();
    assert_eq!(proof_set.total_roots, 2);
    assert_eq!(proof_set.next_root_id, 2);
    assert_eq!(proof_set.total_data_size, 6144);
    assert_eq!(proof_set.leaf_count, 6144 / pdp_indexer::domain::LEAF_SIZE);

    let provider = store
        .find_latest_provider(&Address::from_hex(owner).unwrap().to_hex())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(provider.total_data_size, 6144);
    assert_eq!(provider.total_roots, 2);
    assert_eq!(provider.total_proof_sets, 1);

    for root_id in [0u64, 1u64] {
        let root = store.find_latest_root("1", root_id).await.unwrap().unwrap();
        assert!(!root.removed);
    }
}

#[tokio::test]
async fn s2_reorg_reverts_roots_added_to_its_pre_fork_state() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let chain = chain_with_store(store.clone());
    let shutdown = never_shuts_down();

    let owner = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    let listener = "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
    let create_tx = RawTx {
        hash: "0xtx1".to_string(),
        from: owner.to_string(),
        to: Some(CONTRACT.to_string()),
        input: create_proof_set_calldata(listener),
        value: "0".to_string(),
        block_number: 1,
        block_hash: "0xh1".to_string(),
        timestamp: 1_700_000_001,
    };
    let block_n = BlockBatch {
        block_number: 1,
        block_hash: "0xh1".to_string(),
        parent_hash: "0xh0".to_string(),
        timestamp: 1_700_000_001,
        txs: vec![create_tx],
        logs: vec![proof_set_created_log(1, owner, 1, "0xh1", "0xtx1")],
        finalized_height: None,
    };
    chain.replay(&block_n, &shutdown).await.unwrap();

    let cid0 = [0xde, 0xad, 0xbe, 0xef];
    let add_roots_tx = RawTx {
        hash: "0xtx2".to_string(),
        from: owner.to_string(),
        to: Some(CONTRACT.to_string()),
        input: add_roots_calldata(1, &[(&cid0, 4096)]),
        value: "0".to_string(),
        block_number: 2,
        block_hash: "0xh2".to_string(),
        timestamp: 1_700_000_002,
    };
    let block_n1 = BlockBatch {
        block_number: 2,
        block_hash: "0xh2".to_string(),
        parent_hash: "0xh1".to_string(),
        timestamp: 1_700_000_002,
        txs: vec![add_roots_tx],
        logs: vec![roots_added_log(1, &[0], 2, "0xh2", "0xtx2", 0)],
        finalized_height: None,
    };
    chain.replay(&block_n1, &shutdown).await.unwrap();

    let proof_set = store.find_latest_proof_set("1").await.unwrap().unwrap();
    assert_eq!(proof_set.total_roots, 1);

    // Competing N+1' forks from block 1 and carries no RootsAdded.
    let block_n1_prime = BlockBatch {
        block_number: 2,
        block_hash: "0xh2prime".to_string(),
        parent_hash: "0xh1".to_string(),
        timestamp: 1_700_000_003,
        txs: vec![],
        logs: vec![],
        finalized_height: None,
    };
    chain.replay(&block_n1_prime, &shutdown).await.unwrap();

    let proof_set = store.find_latest_proof_set("1").await.unwrap().unwrap();
    assert_eq!(proof_set.total_roots, 0);
    assert_eq!(proof_set.total_data_size, 0);
    assert_eq!(proof_set.header.block_hash, "0xh1");

    let provider = store
        .find_latest_provider(&Address::from_hex(owner).unwrap().to_hex())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(provider.total_roots, 0);
    assert_eq!(provider.total_data_size, 0);
}

#[tokio::test]
async fn s6_pending_tx_parked_then_resolved_when_its_event_lands_next_block() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let chain = chain_with_store(store.clone());
    let shutdown = never_shuts_down();

    let owner = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    let listener = "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
    let create_tx = RawTx {
        hash: "0xtx1".to_string(),
        from: owner.to_string(),
        to: Some(CONTRACT.to_string()),
        input: create_proof_set_calldata(listener),
        value: "0".to_string(),
        block_number: 1,
        block_hash: "0xh1".to_string(),
        timestamp: 1_700_000_001,
    };
    let block_n = BlockBatch {
        block_number: 1,
        block_hash: "0xh1".to_string(),
        parent_hash: "0xh0".to_string(),
        timestamp: 1_700_000_001,
        txs: vec![create_tx],
        logs: vec![proof_set_created_log(1, owner, 1, "0xh1", "0xtx1")],
        finalized_height: None,
    };
    chain.replay(&block_n, &shutdown).await.unwrap();

    // The addRoots tx lands in block N+1 but its RootsAdded log is reordered
    // to N+2 by the source.
    let cid0 = [0xde, 0xad, 0xbe, 0xef];
    let add_roots_tx = RawTx {
        hash: "0xtx2".to_string(),
        from: owner.to_string(),
        to: Some(CONTRACT.to_string()),
        input: add_roots_calldata(1, &[(&cid0, 4096)]),
        value: "0".to_string(),
        block_number: 2,
        block_hash: "0xh2".to_string(),
        timestamp: 1_700_000_002,
    };
    let block_n1 = BlockBatch {
        block_number: 2,
        block_hash: "0xh2".to_string(),
        parent_hash: "0xh1".to_string(),
        timestamp: 1_700_000_002,
        txs: vec![add_roots_tx],
        logs: vec![],
        finalized_height: None,
    };
    chain.replay(&block_n1, &shutdown).await.unwrap();

    let block_n2 = BlockBatch {
        block_number: 3,
        block_hash: "0xh3".to_string(),
        parent_hash: "0xh2".to_string(),
        timestamp: 1_700_000_003,
        txs: vec![],
        logs: vec![roots_added_log(1, &[0], 3, "0xh3", "0xtx2", 0)],
        finalized_height: None,
    };
    chain.replay(&block_n2, &shutdown).await.unwrap();

    let proof_set = store.find_latest_proof_set("1").await.unwrap().unwrap();
    assert_eq!(proof_set.total_roots, 1);
    assert_eq!(proof_set.total_data_size, 4096);
}
