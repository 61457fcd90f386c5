//! Small helpers shared across handler implementations: row-id formatting
//! and reorg-header construction for create-or-update entity writes.

use crate::domain::ReorgHeader;

pub fn append_key(tx_hash: &str, log_index: u64) -> String {
    format!("{}_{}", tx_hash, log_index)
}

/// Builds the header for a new version of an entity, chaining off
/// `existing` when present (spec §3: `previous_id` recorded, `is_latest`
/// cleared on the prior row by the store on write).
pub fn next_header(
    existing: Option<&ReorgHeader>,
    row_id: impl Into<String>,
    block_number: u64,
    block_hash: &str,
) -> ReorgHeader {
    match existing {
        Some(prev) => ReorgHeader::succeeding(prev, row_id, block_number, block_hash),
        None => ReorgHeader::new(row_id, block_number, block_hash),
    }
}

/// Registers (or increments) the service-provider link for `service` and
/// `provider`, creating `Service`/`ServiceProviderLink` rows as needed, and
/// bumps `Service.total_proof_sets` for a newly indexed proof set (spec
/// §4.7 `ProofSetCreated`).
pub async fn increment_service_link(
    store: &(impl crate::store::Store + ?Sized),
    service: &str,
    provider: &str,
    block_number: u64,
    block_hash: &str,
) -> Result<(), crate::error::StoreError> {
    bump_service_link(store, service, provider, block_number, block_hash, true).await
}

/// Registers (or increments) the service-provider link for `service` and
/// `provider` without touching `Service.total_proof_sets` — used when a
/// proof set already counted for this service changes owner under the
/// same listener (spec §4.7 `ProofSetOwnerChanged`); the service's set
/// count doesn't change, only which provider holds the link.
pub async fn link_provider_to_service(
    store: &(impl crate::store::Store + ?Sized),
    service: &str,
    provider: &str,
    block_number: u64,
    block_hash: &str,
) -> Result<(), crate::error::StoreError> {
    bump_service_link(store, service, provider, block_number, block_hash, false).await
}

/// `Service.total_providers` is bumped alongside the link whenever this is
/// the provider's first proof set under this listener (link count leaving
/// zero), regardless of whether the proof set itself is new.
async fn bump_service_link(
    store: &(impl crate::store::Store + ?Sized),
    service: &str,
    provider: &str,
    block_number: u64,
    block_hash: &str,
    count_new_proof_set: bool,
) -> Result<(), crate::error::StoreError> {
    use crate::domain::{Service, ServiceProviderLink};
    use crate::store::{EntityRow, StoreExt};

    let key = ServiceProviderLink::key(service, provider);
    let existing_link = store.find_latest_service_link(service, provider).await?;
    let provider_is_new_to_service = existing_link.as_ref().map_or(true, |l| l.proof_set_count == 0);
    let header = next_header(
        existing_link.as_ref().map(|l| &l.header),
        format!("{}@{}", key, block_number),
        block_number,
        block_hash,
    );
    let mut link = existing_link
        .unwrap_or_else(|| ServiceProviderLink::new(header.clone(), service.to_string(), provider.to_string()));
    link.header = header;
    link.proof_set_count += 1;
    store.store_entity(EntityRow::ServiceProviderLink(link)).await?;

    let existing_service = store.find_latest_service(service).await?;
    let svc_header = next_header(
        existing_service.as_ref().map(|s| &s.header),
        format!("{}@{}", service, block_number),
        block_number,
        block_hash,
    );
    let mut svc = existing_service.unwrap_or_else(|| Service::new(svc_header.clone(), service.to_string()));
    svc.header = svc_header;
    if count_new_proof_set {
        svc.total_proof_sets += 1;
    }
    if provider_is_new_to_service {
        svc.total_providers += 1;
    }
    store.store_entity(EntityRow::Service(svc)).await?;
    Ok(())
}

/// Decrements the service-provider link. `Service.total_providers` is
/// decremented alongside it when the link's count just dropped to zero
/// (spec §4.7 `ProofSetOwnerChanged`).
pub async fn decrement_service_link(
    store: &(impl crate::store::Store + ?Sized),
    service: &str,
    provider: &str,
    block_number: u64,
    block_hash: &str,
) -> Result<(), crate::error::StoreError> {
    use crate::domain::{clamp_sub_u64, Service, ServiceProviderLink};
    use crate::store::{EntityRow, StoreExt};

    let existing_link = store.find_latest_service_link(service, provider).await?;
    let Some(mut link) = existing_link else {
        tracing::warn!(service, provider, "no service-provider link to decrement");
        return Ok(());
    };
    let was_linked = link.proof_set_count > 0;
    let key = ServiceProviderLink::key(service, provider);
    let header = next_header(Some(&link.header), format!("{}@{}", key, block_number), block_number, block_hash);
    link.header = header;
    if clamp_sub_u64(&mut link.proof_set_count, 1) {
        tracing::warn!(service, provider, "service-provider link proof_set_count would go negative, clamped to 0");
    }
    let provider_left_service = was_linked && link.proof_set_count == 0;
    store.store_entity(EntityRow::ServiceProviderLink(link)).await?;

    if provider_left_service {
        if let Some(mut svc) = store.find_latest_service(service).await? {
            svc.header = next_header(Some(&svc.header), format!("{}@{}", service, block_number), block_number, block_hash);
            if clamp_sub_u64(&mut svc.total_providers, 1) {
                tracing::warn!(service, "Service.total_providers would go negative, clamped to 0");
            }
            store.store_entity(EntityRow::Service(svc)).await?;
        }
    }
    Ok(())
}
