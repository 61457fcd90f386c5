//! Domain model (C4 types, spec §3).
//!
//! Mutable entities compose a `ReorgHeader` rather than inheriting from it
//! (spec §9 design note: "embedded reorg header becomes composition"). The
//! write path in `store` is a single generic routine parameterized by
//! `EntityKind`, not one insert function per entity type.

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

/// Common row identity/versioning columns carried by every mutable entity
/// (spec §3, §6 persisted-state layout). `id` is an opaque row identifier
/// assigned by the store, distinct from the entity's natural key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReorgHeader {
    pub id: String,
    pub block_number: u64,
    pub block_hash: String,
    pub previous_id: Option<String>,
    pub is_latest: bool,
}

impl ReorgHeader {
    pub fn new(id: impl Into<String>, block_number: u64, block_hash: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            block_number,
            block_hash: block_hash.into(),
            previous_id: None,
            is_latest: true,
        }
    }

    /// Builds the header for a new version superseding `previous`.
    pub fn succeeding(
        previous: &ReorgHeader,
        id: impl Into<String>,
        block_number: u64,
        block_hash: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            block_number,
            block_hash: block_hash.into(),
            previous_id: Some(previous.id.clone()),
            is_latest: true,
        }
    }
}

/// Implemented by every versioned entity so the store's write path can stay
/// generic over entity kind (spec §9).
pub trait Versioned {
    fn header(&self) -> &ReorgHeader;
    fn header_mut(&mut self) -> &mut ReorgHeader;
    /// The entity's natural key (not its row id), used for `find_latest` and
    /// for the uniqueness constraint on `(block_hash, natural_key)`.
    fn natural_key(&self) -> String;
}

macro_rules! impl_versioned {
    ($ty:ty, $key_field:ident) => {
        impl Versioned for $ty {
            fn header(&self) -> &ReorgHeader {
                &self.header
            }
            fn header_mut(&mut self) -> &mut ReorgHeader {
                &mut self.header
            }
            fn natural_key(&self) -> String {
                self.$key_field.clone()
            }
        }
    };
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityKind {
    Provider,
    ProofSet,
    Root,
    Service,
    ServiceProviderLink,
    ProvingWindow,
    WeeklyProviderMetric,
    WeeklyProofSetMetric,
    MonthlyProviderMetric,
    MonthlyProofSetMetric,
    NetworkMetric,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Provider => "Provider",
            EntityKind::ProofSet => "ProofSet",
            EntityKind::Root => "Root",
            EntityKind::Service => "Service",
            EntityKind::ServiceProviderLink => "ServiceProviderLink",
            EntityKind::ProvingWindow => "ProvingWindow",
            EntityKind::WeeklyProviderMetric => "WeeklyProviderMetric",
            EntityKind::WeeklyProofSetMetric => "WeeklyProofSetMetric",
            EntityKind::MonthlyProviderMetric => "MonthlyProviderMetric",
            EntityKind::MonthlyProofSetMetric => "MonthlyProofSetMetric",
            EntityKind::NetworkMetric => "NetworkMetric",
        }
    }
}

/// Fixed-size unit of data within a root; `rawSize / LEAF_SIZE == leafCount`
/// (spec GLOSSARY).
pub const LEAF_SIZE: u64 = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provider {
    pub header: ReorgHeader,
    pub address: String,
    pub total_data_size: u128,
    pub total_roots: u64,
    pub total_proof_sets: u64,
    pub total_faulted_periods: u64,
    pub total_faulted_roots: u64,
}
impl_versioned!(Provider, address);

impl Provider {
    pub fn new(header: ReorgHeader, address: String) -> Self {
        Self {
            header,
            address,
            total_data_size: 0,
            total_roots: 0,
            total_proof_sets: 0,
            total_faulted_periods: 0,
            total_faulted_roots: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofSet {
    pub header: ReorgHeader,
    pub set_id: String,
    pub owner: String,
    pub listener: String,
    pub is_active: bool,
    pub total_roots: u64,
    pub total_data_size: u128,
    pub total_fee_paid: u128,
    pub total_proofs: u64,
    pub total_proved_roots: u64,
    pub total_faulted_periods: u64,
    pub total_faulted_roots: u64,
    pub total_transactions: u64,
    pub total_event_logs: u64,
    pub last_proven_epoch: u64,
    pub next_challenge_epoch: u64,
    pub challenge_range: u64,
    pub leaf_count: u64,
    pub next_root_id: u64,
    pub max_proving_period: Option<u64>,
}
impl_versioned!(ProofSet, set_id);

impl ProofSet {
    pub fn new(header: ReorgHeader, set_id: String, owner: String, listener: String) -> Self {
        Self {
            header,
            set_id,
            owner,
            listener,
            is_active: true,
            total_roots: 0,
            total_data_size: 0,
            total_fee_paid: 0,
            total_proofs: 0,
            total_proved_roots: 0,
            total_faulted_periods: 0,
            total_faulted_roots: 0,
            total_transactions: 0,
            total_event_logs: 0,
            last_proven_epoch: 0,
            next_challenge_epoch: 0,
            challenge_range: 0,
            leaf_count: 0,
            next_root_id: 0,
            max_proving_period: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Root {
    pub header: ReorgHeader,
    pub set_id: String,
    pub root_id: u64,
    pub raw_size: u128,
    pub leaf_count: u64,
    pub cid: String,
    pub removed: bool,
    pub total_proofs_submitted: u64,
    pub last_proven_epoch: u64,
    pub last_proven_at: u64,
    pub total_periods_faulted: u64,
    pub last_faulted_epoch: u64,
    pub last_faulted_at: u64,
}
impl_versioned!(Root, composite_key);

impl Root {
    pub fn key(set_id: &str, root_id: u64) -> String {
        format!("{}_{}", set_id, root_id)
    }

    fn composite_key(&self) -> String {
        Self::key(&self.set_id, self.root_id)
    }

    pub fn new(header: ReorgHeader, set_id: String, root_id: u64, raw_size: u128, cid: String) -> Self {
        let leaf_count = (raw_size as u64) / LEAF_SIZE;
        Self {
            header,
            set_id,
            root_id,
            raw_size,
            leaf_count,
            cid,
            removed: false,
            total_proofs_submitted: 0,
            last_proven_epoch: 0,
            last_proven_at: 0,
            total_periods_faulted: 0,
            last_faulted_epoch: 0,
            last_faulted_at: 0,
        }
    }
}

/// Append-only: a persisted Merkle path for one challenge answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    pub id: String,
    pub set_id: String,
    pub root_id: u64,
    pub offset: u64,
    pub leaf: String,
    pub merkle_proof: Vec<u8>,
    pub proven_at: u64,
    pub block_number: u64,
    pub block_hash: String,
}

/// Append-only: a fee payment record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofFee {
    pub id: String,
    pub set_id: String,
    pub fee: u128,
    pub price: u64,
    pub expo: i32,
    pub block_number: u64,
    pub block_hash: String,
}

/// Append-only: a fault observation linking the roots it affected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultRecord {
    pub id: String,
    pub set_id: String,
    pub root_ids: Vec<u64>,
    pub current_challenge_epoch: u64,
    pub next_challenge_epoch: u64,
    pub periods_faulted: u64,
    pub deadline: u64,
    pub block_number: u64,
    pub block_hash: String,
}

/// Append-only: the raw decoded log, independent of handler interpretation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLog {
    pub id: String,
    pub name: String,
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    pub removed: bool,
    pub block_number: u64,
    pub block_hash: String,
    pub timestamp: u64,
}

/// One row per transaction hash observed within a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub hash: String,
    pub from: String,
    pub to: Option<String>,
    pub value: String,
    pub method: Option<String>,
    pub height: u64,
    pub block_hash: String,
    pub status: bool,
    pub proof_set_id: Option<String>,
}

/// Versioned Fenwick-tree node (C6). Keyed `(set_id, index, block_number)`;
/// reads pick the latest row with `block_number <= at_block` (spec §9).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SumTreeNode {
    pub set_id: String,
    pub index: u64,
    pub block_number: u64,
    pub block_hash: String,
    pub aggregate_leaf_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub header: ReorgHeader,
    pub address: String,
    pub total_proof_sets: u64,
    pub total_providers: u64,
}
impl_versioned!(Service, address);

impl Service {
    pub fn new(header: ReorgHeader, address: String) -> Self {
        Self {
            header,
            address,
            total_proof_sets: 0,
            total_providers: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceProviderLink {
    pub header: ReorgHeader,
    pub service: String,
    pub provider: String,
    pub proof_set_count: u64,
}
impl_versioned!(ServiceProviderLink, composite_key);

impl ServiceProviderLink {
    pub fn key(service: &str, provider: &str) -> String {
        format!("{}_{}", service, provider)
    }

    fn composite_key(&self) -> String {
        Self::key(&self.service, &self.provider)
    }

    pub fn new(header: ReorgHeader, service: String, provider: String) -> Self {
        Self {
            header,
            service,
            provider,
            proof_set_count: 0,
        }
    }
}

/// Derived window `[deadline - challenge_window_size, deadline]` for a
/// proof set's current proving period (spec §4.7 `NextProvingPeriod`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvingWindow {
    pub header: ReorgHeader,
    pub set_id: String,
    pub deadline: u64,
    pub window_start: u64,
    pub proof_submitted: bool,
    pub is_valid: bool,
}
impl_versioned!(ProvingWindow, composite_key);

impl ProvingWindow {
    pub fn key(set_id: &str, deadline: u64) -> String {
        format!("{}_{}", set_id, deadline)
    }

    fn composite_key(&self) -> String {
        Self::key(&self.set_id, self.deadline)
    }

    pub fn new(header: ReorgHeader, set_id: String, deadline: u64, window_start: u64) -> Self {
        Self {
            header,
            set_id,
            deadline,
            window_start,
            proof_submitted: false,
            is_valid: false,
        }
    }
}

/// Weekly/monthly/network rollup counters (C10, §4.11). `bucket_id` is
/// `timestamp / 604800` for weekly buckets and `timestamp / 2592000` for
/// monthly ones; the network singleton always uses bucket id `"network"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsBucket {
    pub header: ReorgHeader,
    pub bucket_id: String,
    pub scope_key: String,
    pub roots_added: u64,
    pub roots_removed: u64,
    pub proofs_submitted: u64,
    pub faults: u64,
    pub fee_paid: u128,
}
impl_versioned!(MetricsBucket, composite_key);

impl MetricsBucket {
    pub fn key(bucket_id: &str, scope_key: &str) -> String {
        format!("{}_{}", bucket_id, scope_key)
    }

    fn composite_key(&self) -> String {
        Self::key(&self.bucket_id, &self.scope_key)
    }

    pub fn new(header: ReorgHeader, bucket_id: String, scope_key: String) -> Self {
        Self {
            header,
            bucket_id,
            scope_key,
            roots_added: 0,
            roots_removed: 0,
            proofs_submitted: 0,
            faults: 0,
            fee_paid: 0,
        }
    }
}

/// One decoded log as delivered by the chain source (spec §6). Distinct
/// from the persisted `EventLog` row, which records the handler's
/// interpretation of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: Vec<u8>,
    pub log_index: u64,
    pub block_number: u64,
    pub block_hash: String,
    pub transaction_hash: String,
    pub transaction_index: u64,
    pub removed: bool,
    pub timestamp: u64,
}

/// One transaction as delivered by the chain source (spec §6).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTx {
    pub hash: String,
    pub from: String,
    pub to: Option<String>,
    pub input: Vec<u8>,
    pub value: String,
    pub block_number: u64,
    pub block_hash: String,
    pub timestamp: u64,
}

/// A full block as delivered by the chain source (spec §4.5 `BlockBatch`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockBatch {
    pub block_number: u64,
    pub block_hash: String,
    pub parent_hash: String,
    pub timestamp: u64,
    pub txs: Vec<RawTx>,
    pub logs: Vec<RawLog>,
    pub finalized_height: Option<u64>,
}

pub fn week_bucket(timestamp: u64) -> u64 {
    timestamp / 604_800
}

pub fn month_bucket(timestamp: u64) -> u64 {
    timestamp / 2_592_000
}

/// Decrements `*counter` by `delta`, clamping at zero and returning whether
/// clamping occurred (spec §8 invariant 6, §7 "negative-clamp" warning).
pub fn clamp_sub_u64(counter: &mut u64, delta: u64) -> bool {
    if delta > *counter {
        *counter = 0;
        true
    } else {
        *counter -= delta;
        false
    }
}

pub fn clamp_sub_u128(counter: &mut u128, delta: u128) -> bool {
    if delta > *counter {
        *counter = 0;
        true
    } else {
        *counter -= delta;
        false
    }
}

/// Convenience used by handlers decoding event-carried `uint256` values into
/// the narrower widths entities persist, saturating-and-flagging per spec
/// §4.1/§4.7. `label` identifies the field for the warning log.
pub fn narrow_u64(value: &BigUint, label: &str) -> u64 {
    let (narrowed, overflowed) = crate::codec::saturate_u64(value);
    if overflowed {
        tracing::warn!(field = label, "value exceeds u64, saturated");
    }
    narrowed
}

pub fn narrow_u128(value: &BigUint) -> u128 {
    let bytes = value.to_bytes_be();
    if bytes.len() > 16 {
        return u128::MAX;
    }
    let mut buf = [0u8; 16];
    buf[16 - bytes.len()..].copy_from_slice(&bytes);
    u128::from_be_bytes(buf)
}
