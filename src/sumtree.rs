//! Sum-Tree Index (C6, spec §4.6).
//!
//! A per-proof-set Fenwick (binary indexed) tree over root-leaf-counts,
//! persisted as versioned rows rather than held in memory (spec §9: "this
//! sidesteps the need for an in-memory tree while preserving O(log N) cost
//! per add/remove/find"). Each touched Fenwick index is written as a new
//! `SumTreeNode` row keyed `(set_id, index, block_number)`; reads pick the
//! latest row with `block_number <= at_block`.
//!
//! Fenwick indices are 1-based; root id `r` (0-based) occupies index
//! `r + 1`. `CAPACITY` bounds how far an update climbs and how far a query
//! descends — generous enough that no real proof set approaches it.

use crate::domain::SumTreeNode;
use crate::error::StoreError;
use crate::store::Store;

const CAPACITY: u64 = 1 << 40;

fn lowbit(i: u64) -> u64 {
    i & i.wrapping_neg()
}

fn highest_power_of_two_leq(n: u64) -> u64 {
    if n == 0 {
        0
    } else {
        1u64 << (63 - n.leading_zeros())
    }
}

async fn read_node(
    store: &(impl Store + ?Sized),
    set_id: &str,
    index: u64,
    at_block: u64,
) -> Result<u64, StoreError> {
    Ok(store
        .find_sumtree_node(set_id, index, at_block)
        .await?
        .map(|n| n.aggregate_leaf_count)
        .unwrap_or(0))
}

async fn apply_delta(
    store: &(impl Store + ?Sized),
    set_id: &str,
    root_id: u64,
    delta: i64,
    block_number: u64,
    block_hash: &str,
) -> Result<(), StoreError> {
    let mut index = root_id + 1;
    while index <= CAPACITY {
        // Read as of (and including) this block: a prior root add/remove
        // already processed earlier in the same block may have written this
        // same index at `block_number`, and that write must be seen here.
        let prior = read_node(store, set_id, index, block_number).await?;
        let updated = if delta >= 0 {
            prior.saturating_add(delta as u64)
        } else {
            prior.saturating_sub((-delta) as u64)
        };
        store
            .store_sumtree_node(SumTreeNode {
                set_id: set_id.to_string(),
                index,
                block_number,
                block_hash: block_hash.to_string(),
                aggregate_leaf_count: updated,
            })
            .await?;
        index += lowbit(index);
    }
    Ok(())
}

/// Adds `leaf_count` for `root_id` at `block_number` (spec §4.6 Add): walks
/// the lowest-set-bit ancestor chain upward from `root_id + 1`, storing a
/// new versioned row at each touched index.
pub async fn add(
    store: &(impl Store + ?Sized),
    set_id: &str,
    root_id: u64,
    leaf_count: u64,
    block_number: u64,
    block_hash: &str,
) -> Result<(), StoreError> {
    apply_delta(store, set_id, root_id, leaf_count as i64, block_number, block_hash).await
}

/// Symmetrically subtracts `leaf_count` for `root_id` at `block_number`
/// (spec §4.6 Remove).
pub async fn remove(
    store: &(impl Store + ?Sized),
    set_id: &str,
    root_id: u64,
    leaf_count: u64,
    block_number: u64,
    block_hash: &str,
) -> Result<(), StoreError> {
    apply_delta(store, set_id, root_id, -(leaf_count as i64), block_number, block_hash).await
}

/// Resolves each challenge offset to the root id whose cumulative
/// leaf-count interval contains it, using tree state as of `at_block`
/// (spec §4.6 FindRootIds). `next_root_id` bounds the binary descent to the
/// set's actual populated range.
pub async fn find_root_ids(
    store: &(impl Store + ?Sized),
    set_id: &str,
    next_root_id: u64,
    challenges: &[u64],
    at_block: u64,
) -> Result<Vec<u64>, StoreError> {
    let mut out = Vec::with_capacity(challenges.len());
    for &challenge in challenges {
        let root_id = find_one(store, set_id, next_root_id, challenge, at_block).await?;
        out.push(root_id);
    }
    Ok(out)
}

async fn find_one(
    store: &(impl Store + ?Sized),
    set_id: &str,
    next_root_id: u64,
    challenge: u64,
    at_block: u64,
) -> Result<u64, StoreError> {
    let mut pos: u64 = 0;
    let mut remaining = challenge;
    let mut pow = highest_power_of_two_leq(next_root_id.max(1));
    while pow > 0 {
        let next = pos + pow;
        if next <= next_root_id {
            let val = read_node(store, set_id, next, at_block).await?;
            if remaining >= val {
                pos = next;
                remaining -= val;
            }
        }
        pow >>= 1;
    }
    Ok(pos)
}
