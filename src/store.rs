//! Abstract transactional store contract (C4, spec §4.4).
//!
//! The real backing store (a relational database providing transactional
//! upserts) is an external collaborator per spec §1 Non-goals; this module
//! defines only the contract handlers and the reorg/sum-tree machinery are
//! written against. `store::memory` supplies an in-memory implementation
//! used as the test double for the whole suite.

pub mod memory;

use crate::domain::{
    EntityKind, EventLog, FaultRecord, Proof, ProofFee, ProofSet, Provider, ProvingWindow, Root,
    Service, ServiceProviderLink, SumTreeNode, Transaction, Versioned, MetricsBucket,
};
use crate::error::StoreError;
use async_trait::async_trait;

/// A versioned row of any mutable entity kind, used by the generic
/// `store_entity`/`find_latest` pair (spec §4.4). Handlers normally go
/// through the typed `find_latest_*` convenience methods below instead of
/// matching on this enum directly.
#[derive(Debug, Clone)]
pub enum EntityRow {
    Provider(Provider),
    ProofSet(ProofSet),
    Root(Root),
    Service(Service),
    ServiceProviderLink(ServiceProviderLink),
    ProvingWindow(ProvingWindow),
    MetricsBucket(MetricsBucket),
}

impl EntityRow {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityRow::Provider(_) => EntityKind::Provider,
            EntityRow::ProofSet(_) => EntityKind::ProofSet,
            EntityRow::Root(_) => EntityKind::Root,
            EntityRow::Service(_) => EntityKind::Service,
            EntityRow::ServiceProviderLink(_) => EntityKind::ServiceProviderLink,
            EntityRow::ProvingWindow(_) => EntityKind::ProvingWindow,
            EntityRow::MetricsBucket(_) => EntityKind::MetricsBucket,
        }
    }

    pub fn natural_key(&self) -> String {
        match self {
            EntityRow::Provider(e) => e.natural_key(),
            EntityRow::ProofSet(e) => e.natural_key(),
            EntityRow::Root(e) => e.natural_key(),
            EntityRow::Service(e) => e.natural_key(),
            EntityRow::ServiceProviderLink(e) => e.natural_key(),
            EntityRow::ProvingWindow(e) => e.natural_key(),
            EntityRow::MetricsBucket(e) => e.natural_key(),
        }
    }

    pub fn header(&self) -> &crate::domain::ReorgHeader {
        match self {
            EntityRow::Provider(e) => e.header(),
            EntityRow::ProofSet(e) => e.header(),
            EntityRow::Root(e) => e.header(),
            EntityRow::Service(e) => e.header(),
            EntityRow::ServiceProviderLink(e) => e.header(),
            EntityRow::ProvingWindow(e) => e.header(),
            EntityRow::MetricsBucket(e) => e.header(),
        }
    }
}

macro_rules! unwrap_variant {
    ($name:ident, $variant:ident, $ty:ty) => {
        pub fn $name(self) -> Option<$ty> {
            match self {
                EntityRow::$variant(e) => Some(e),
                _ => None,
            }
        }
    };
}

impl EntityRow {
    unwrap_variant!(into_provider, Provider, Provider);
    unwrap_variant!(into_proof_set, ProofSet, ProofSet);
    unwrap_variant!(into_root, Root, Root);
    unwrap_variant!(into_service, Service, Service);
    unwrap_variant!(into_service_link, ServiceProviderLink, ServiceProviderLink);
    unwrap_variant!(into_proving_window, ProvingWindow, ProvingWindow);
    unwrap_variant!(into_metrics_bucket, MetricsBucket, MetricsBucket);
}

/// The abstract transactional store contract (spec §4.4). One transaction
/// is open per chain at a time (spec §5); handlers never call
/// `commit`/`rollback` themselves — only the block processor does.
#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<(), StoreError>;
    async fn commit(&self) -> Result<(), StoreError>;
    async fn rollback(&self) -> Result<(), StoreError>;

    /// Inserts a new version for a mutable entity, clearing `is_latest` on
    /// the prior version and setting `previous_id` (spec §4.4). Must reject
    /// a duplicate `(block_hash, natural_key)` with
    /// `StoreError::DuplicateKey` so that replaying a block is idempotent
    /// (spec §8 property 1) rather than silently double-applying.
    async fn store_entity(&self, row: EntityRow) -> Result<(), StoreError>;

    /// Returns the `is_latest=true` version for `(kind, natural_key)`.
    async fn find_latest(
        &self,
        kind: EntityKind,
        natural_key: &str,
    ) -> Result<Option<EntityRow>, StoreError>;

    async fn append_event_log(&self, row: EventLog) -> Result<(), StoreError>;
    async fn append_proof(&self, row: Proof) -> Result<(), StoreError>;
    async fn append_proof_fee(&self, row: ProofFee) -> Result<(), StoreError>;
    async fn append_fault_record(&self, row: FaultRecord) -> Result<(), StoreError>;

    async fn upsert_transaction(&self, row: Transaction) -> Result<(), StoreError>;
    async fn find_transaction(&self, hash: &str) -> Result<Option<Transaction>, StoreError>;

    /// Versioned Fenwick-tree node storage (C6). Not `is_latest`-tracked:
    /// reads pick the highest `block_number <= at_block` (spec §9).
    async fn store_sumtree_node(&self, row: SumTreeNode) -> Result<(), StoreError>;
    async fn find_sumtree_node(
        &self,
        set_id: &str,
        index: u64,
        at_block: u64,
    ) -> Result<Option<SumTreeNode>, StoreError>;

    /// Derived reverse-list accessors (spec §9, §11): computed from the
    /// versioned base tables at read time rather than maintained as arrays.
    async fn find_provider_proof_set_ids(&self, provider: &str) -> Result<Vec<String>, StoreError>;
    async fn find_service_provider_addresses(
        &self,
        service: &str,
    ) -> Result<Vec<String>, StoreError>;

    /// Deletes every row in every entity with `block_number > n OR
    /// (block_number == n AND block_hash != hash)`, resurrecting each
    /// deleted row's predecessor as the new latest version. Must be
    /// transactional (spec §4.4).
    async fn rollback_above(&self, block_number: u64, block_hash: &str) -> Result<(), StoreError>;

    /// Optional hint to drop superseded historical rows whose replacement
    /// is older than `block_number` (spec §4.4).
    async fn finalize_up_to(&self, block_number: u64) -> Result<(), StoreError>;
}

/// Typed convenience accessors layered over `find_latest`/`store_entity` so
/// handler code never matches on `EntityRow` directly. Blanket-implemented
/// for every `Store`.
#[async_trait]
pub trait StoreExt: Store {
    async fn find_latest_provider(&self, address: &str) -> Result<Option<Provider>, StoreError> {
        Ok(self
            .find_latest(EntityKind::Provider, address)
            .await?
            .and_then(EntityRow::into_provider))
    }

    async fn find_latest_proof_set(&self, set_id: &str) -> Result<Option<ProofSet>, StoreError> {
        Ok(self
            .find_latest(EntityKind::ProofSet, set_id)
            .await?
            .and_then(EntityRow::into_proof_set))
    }

    async fn find_latest_root(&self, set_id: &str, root_id: u64) -> Result<Option<Root>, StoreError> {
        let key = Root::key(set_id, root_id);
        Ok(self
            .find_latest(EntityKind::Root, &key)
            .await?
            .and_then(EntityRow::into_root))
    }

    async fn find_latest_service(&self, address: &str) -> Result<Option<Service>, StoreError> {
        Ok(self
            .find_latest(EntityKind::Service, address)
            .await?
            .and_then(EntityRow::into_service))
    }

    async fn find_latest_service_link(
        &self,
        service: &str,
        provider: &str,
    ) -> Result<Option<ServiceProviderLink>, StoreError> {
        let key = ServiceProviderLink::key(service, provider);
        Ok(self
            .find_latest(EntityKind::ServiceProviderLink, &key)
            .await?
            .and_then(EntityRow::into_service_link))
    }

    async fn find_latest_proving_window(
        &self,
        set_id: &str,
        deadline: u64,
    ) -> Result<Option<ProvingWindow>, StoreError> {
        let key = ProvingWindow::key(set_id, deadline);
        Ok(self
            .find_latest(EntityKind::ProvingWindow, &key)
            .await?
            .and_then(EntityRow::into_proving_window))
    }

    async fn find_latest_metrics_bucket(
        &self,
        bucket_id: &str,
        scope_key: &str,
    ) -> Result<Option<MetricsBucket>, StoreError> {
        let key = MetricsBucket::key(bucket_id, scope_key);
        Ok(self
            .find_latest(EntityKind::MetricsBucket, &key)
            .await?
            .and_then(EntityRow::into_metrics_bucket))
    }
}

impl<T: Store + ?Sized> StoreExt for T {}
