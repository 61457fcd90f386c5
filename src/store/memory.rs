//! In-memory reference implementation of the [`Store`](super::Store)
//! contract. This is the test double the whole suite runs against; the
//! production backing store is an external collaborator (spec §1, §4.4).

use super::{EntityRow, Store};
use crate::domain::{
    EntityKind, EventLog, FaultRecord, Proof, ProofFee, Transaction, Versioned, SumTreeNode,
};
use crate::error::StoreError;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

#[derive(Default)]
struct Inner {
    in_transaction: bool,
    entities: HashMap<(EntityKind, String), Vec<EntityRow>>,
    event_logs: Vec<EventLog>,
    proofs: Vec<Proof>,
    proof_fees: Vec<ProofFee>,
    fault_records: Vec<FaultRecord>,
    transactions: HashMap<String, Transaction>,
    sumtree_nodes: HashMap<(String, u64), Vec<SumTreeNode>>,
}

/// An in-memory `Store`. Not persisted; scoped to a single process and
/// intended for tests and local development only.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn in_rollback_region(block_number: u64, block_hash: &str, n: u64, hash: &str) -> bool {
    block_number > n || (block_number == n && block_hash != hash)
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.in_transaction {
            return Err(StoreError::Fatal(
                "a transaction is already open".to_string(),
            ));
        }
        inner.in_transaction = true;
        Ok(())
    }

    async fn commit(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if !inner.in_transaction {
            return Err(StoreError::NoTransaction);
        }
        inner.in_transaction = false;
        Ok(())
    }

    async fn rollback(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if !inner.in_transaction {
            return Err(StoreError::NoTransaction);
        }
        // In-memory writes are applied immediately (no staged undo log);
        // callers that need abort-on-error semantics should not have
        // mutated visible state without a preceding `begin`, matching how
        // handlers always run inside a single block transaction that either
        // fully commits or is followed by `rollback_above` on the next
        // ingest attempt.
        inner.in_transaction = false;
        Ok(())
    }

    async fn store_entity(&self, row: EntityRow) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let key = (row.kind(), row.natural_key());
        let new_block_hash = row.header().block_hash.clone();
        let versions = inner.entities.entry(key).or_default();

        if let Some(existing_latest_idx) = versions.iter().position(|r| r.header().is_latest) {
            if versions[existing_latest_idx].header().block_hash == new_block_hash {
                return Err(StoreError::DuplicateKey {
                    entity: entity_kind_label(row.kind()),
                    key: row.natural_key(),
                    block_hash: new_block_hash,
                });
            }
            clear_latest(&mut versions[existing_latest_idx]);
        }
        versions.push(row);
        Ok(())
    }

    async fn find_latest(
        &self,
        kind: EntityKind,
        natural_key: &str,
    ) -> Result<Option<EntityRow>, StoreError> {
        let inner = self.inner.lock().await;
        let key = (kind, natural_key.to_string());
        Ok(inner
            .entities
            .get(&key)
            .and_then(|versions| versions.iter().find(|r| r.header().is_latest))
            .cloned())
    }

    async fn append_event_log(&self, row: EventLog) -> Result<(), StoreError> {
        self.inner.lock().await.event_logs.push(row);
        Ok(())
    }

    async fn append_proof(&self, row: Proof) -> Result<(), StoreError> {
        self.inner.lock().await.proofs.push(row);
        Ok(())
    }

    async fn append_proof_fee(&self, row: ProofFee) -> Result<(), StoreError> {
        self.inner.lock().await.proof_fees.push(row);
        Ok(())
    }

    async fn append_fault_record(&self, row: FaultRecord) -> Result<(), StoreError> {
        self.inner.lock().await.fault_records.push(row);
        Ok(())
    }

    async fn upsert_transaction(&self, row: Transaction) -> Result<(), StoreError> {
        self.inner.lock().await.transactions.insert(row.hash.clone(), row);
        Ok(())
    }

    async fn find_transaction(&self, hash: &str) -> Result<Option<Transaction>, StoreError> {
        Ok(self.inner.lock().await.transactions.get(hash).cloned())
    }

    async fn store_sumtree_node(&self, row: SumTreeNode) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let key = (row.set_id.clone(), row.index);
        inner.sumtree_nodes.entry(key).or_default().push(row);
        Ok(())
    }

    async fn find_sumtree_node(
        &self,
        set_id: &str,
        index: u64,
        at_block: u64,
    ) -> Result<Option<SumTreeNode>, StoreError> {
        let inner = self.inner.lock().await;
        let key = (set_id.to_string(), index);
        Ok(inner.sumtree_nodes.get(&key).and_then(|versions| {
            versions
                .iter()
                .filter(|n| n.block_number <= at_block)
                .max_by_key(|n| n.block_number)
                .cloned()
        }))
    }

    async fn find_provider_proof_set_ids(&self, provider: &str) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.lock().await;
        let mut ids: Vec<String> = inner
            .entities
            .iter()
            .filter(|((kind, _), _)| *kind == EntityKind::ProofSet)
            .flat_map(|(_, versions)| versions.iter())
            .filter(|row| row.header().is_latest)
            .filter_map(|row| match row {
                EntityRow::ProofSet(p) if p.owner.eq_ignore_ascii_case(provider) => {
                    Some(p.set_id.clone())
                }
                _ => None,
            })
            .collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    async fn find_service_provider_addresses(
        &self,
        service: &str,
    ) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.lock().await;
        let mut addrs: Vec<String> = inner
            .entities
            .iter()
            .filter(|((kind, _), _)| *kind == EntityKind::ServiceProviderLink)
            .flat_map(|(_, versions)| versions.iter())
            .filter(|row| row.header().is_latest)
            .filter_map(|row| match row {
                EntityRow::ServiceProviderLink(l)
                    if l.service.eq_ignore_ascii_case(service) && l.proof_set_count > 0 =>
                {
                    Some(l.provider.clone())
                }
                _ => None,
            })
            .collect();
        addrs.sort();
        addrs.dedup();
        Ok(addrs)
    }

    async fn rollback_above(&self, block_number: u64, block_hash: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;

        for versions in inner.entities.values_mut() {
            let mut removed_latest_previous_id: Option<String> = None;
            let mut kept = Vec::with_capacity(versions.len());
            for row in versions.drain(..) {
                if in_rollback_region(row.header().block_number, &row.header().block_hash, block_number, block_hash)
                {
                    if row.header().is_latest {
                        removed_latest_previous_id = row.header().previous_id.clone();
                    }
                } else {
                    kept.push(row);
                }
            }
            if let Some(previous_id) = removed_latest_previous_id {
                if let Some(resurrected) = kept.iter_mut().find(|r| r.header().id == previous_id) {
                    set_latest(resurrected);
                }
            }
            *versions = kept;
        }

        inner
            .event_logs
            .retain(|e| !in_rollback_region(e.block_number, &e.block_hash, block_number, block_hash));
        inner
            .proofs
            .retain(|p| !in_rollback_region(p.block_number, &p.block_hash, block_number, block_hash));
        inner
            .proof_fees
            .retain(|p| !in_rollback_region(p.block_number, &p.block_hash, block_number, block_hash));
        inner
            .fault_records
            .retain(|f| !in_rollback_region(f.block_number, &f.block_hash, block_number, block_hash));
        inner
            .transactions
            .retain(|_, t| !in_rollback_region(t.height, &t.block_hash, block_number, block_hash));
        for versions in inner.sumtree_nodes.values_mut() {
            versions.retain(|n| !in_rollback_region(n.block_number, &n.block_hash, block_number, block_hash));
        }

        Ok(())
    }

    async fn finalize_up_to(&self, block_number: u64) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        for versions in inner.entities.values_mut() {
            prune_superseded(versions, block_number);
        }
        for versions in inner.sumtree_nodes.values_mut() {
            if let Some(newest_to_drop) = versions
                .iter()
                .filter(|n| n.block_number < block_number)
                .map(|n| n.block_number)
                .max()
            {
                versions.retain(|n| n.block_number >= newest_to_drop || n.block_number >= block_number);
            }
        }
        Ok(())
    }
}

fn entity_kind_label(kind: EntityKind) -> &'static str {
    kind.as_str()
}

fn clear_latest(row: &mut EntityRow) {
    match row {
        EntityRow::Provider(e) => e.header_mut().is_latest = false,
        EntityRow::ProofSet(e) => e.header_mut().is_latest = false,
        EntityRow::Root(e) => e.header_mut().is_latest = false,
        EntityRow::Service(e) => e.header_mut().is_latest = false,
        EntityRow::ServiceProviderLink(e) => e.header_mut().is_latest = false,
        EntityRow::ProvingWindow(e) => e.header_mut().is_latest = false,
        EntityRow::MetricsBucket(e) => e.header_mut().is_latest = false,
    }
}

fn set_latest(row: &mut EntityRow) {
    match row {
        EntityRow::Provider(e) => e.header_mut().is_latest = true,
        EntityRow::ProofSet(e) => e.header_mut().is_latest = true,
        EntityRow::Root(e) => e.header_mut().is_latest = true,
        EntityRow::Service(e) => e.header_mut().is_latest = true,
        EntityRow::ServiceProviderLink(e) => e.header_mut().is_latest = true,
        EntityRow::ProvingWindow(e) => e.header_mut().is_latest = true,
        EntityRow::MetricsBucket(e) => e.header_mut().is_latest = true,
    }
}

/// Drops historical (non-latest) versions whose replacement is older than
/// `block_number` — a storage-bounding hint, not correctness-critical
/// (spec §4.4).
fn prune_superseded(versions: &mut Vec<EntityRow>, block_number: u64) {
    if versions.len() <= 1 {
        return;
    }
    versions.retain(|row| row.header().is_latest || row.header().block_number >= block_number);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Provider, ReorgHeader};

    fn provider(addr: &str, block_number: u64, block_hash: &str) -> Provider {
        Provider::new(
            ReorgHeader::new(format!("{}_{}", addr, block_number), block_number, block_hash),
            addr.to_string(),
        )
    }

    #[tokio::test]
    async fn store_and_find_latest_round_trips() {
        let store = MemoryStore::new();
        store.begin().await.unwrap();
        store
            .store_entity(EntityRow::Provider(provider("0xaa", 1, "0xh1")))
            .await
            .unwrap();
        store.commit().await.unwrap();

        let found = store.find_latest(EntityKind::Provider, "0xaa").await.unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn duplicate_block_hash_is_rejected() {
        let store = MemoryStore::new();
        store
            .store_entity(EntityRow::Provider(provider("0xaa", 1, "0xh1")))
            .await
            .unwrap();
        let err = store
            .store_entity(EntityRow::Provider(provider("0xaa", 1, "0xh1")))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey { .. }));
    }

    #[tokio::test]
    async fn rollback_above_resurrects_predecessor() {
        let store = MemoryStore::new();
        let mut v1 = provider("0xaa", 1, "0xh1");
        v1.header.id = "v1".to_string();
        store.store_entity(EntityRow::Provider(v1.clone())).await.unwrap();

        let mut v2 = provider("0xaa", 2, "0xh2");
        v2.header.id = "v2".to_string();
        v2.header.previous_id = Some("v1".to_string());
        v2.total_proof_sets = 5;
        store.store_entity(EntityRow::Provider(v2)).await.unwrap();

        store.rollback_above(1, "0xh1").await.unwrap();

        let found = store
            .find_latest(EntityKind::Provider, "0xaa")
            .await
            .unwrap()
            .unwrap()
            .into_provider()
            .unwrap();
        assert_eq!(found.header.id, "v1");
        assert_eq!(found.total_proof_sets, 0);
    }
}
