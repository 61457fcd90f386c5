//! Shared error kinds (spec §7).
//!
//! `CodecError` and `ReorgError` are narrow, leaf-level error types produced
//! deep inside the codec and reorg manager; `IndexerError` is the error
//! surfaced at the handler/block-processor boundary. Kinds are named the way
//! the spec names them, not the way a generic library would.

use crate::codec::CodecError;
use thiserror::Error;

/// Errors that can occur while reconciling the local chain view with the
/// chain source during reorg handling (C5).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReorgError {
    #[error("no common ancestor found within the last {window} blocks (searched back from height {from})")]
    TooDeep { from: u64, window: u64 },
}

/// Top-level error surfaced by handlers (C7) and the block processor (C9).
///
/// Propagation policy (spec §7): everything here aborts the current block's
/// store transaction except `MissingPrerequisite`, which the block processor
/// recovers from locally by parking the originating tx (§4.8).
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("bad trigger definition: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("decode mismatch: {0}")]
    DecodeMismatch(String),

    #[error(transparent)]
    ReorgTooDeep(#[from] ReorgError),

    #[error("missing prerequisite: {0}")]
    MissingPrerequisite(String),

    #[error("randomness unavailable for epoch {epoch}: {source}")]
    RandomnessUnavailable { epoch: String, source: String },

    #[error("entity already exists: {0}")]
    EntityAlreadyExists(String),
}

impl IndexerError {
    /// True when the block processor should park the originating tx instead
    /// of failing the whole block (spec §4.8, §7).
    pub fn is_missing_prerequisite(&self) -> bool {
        matches!(self, IndexerError::MissingPrerequisite(_))
    }
}

/// Errors from the abstract store contract (C4). Transient variants are
/// expected to be retried by the block processor's supervisor; `Fatal`
/// variants abort the block and propagate to the operator.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("transient store error: {0}")]
    Transient(String),

    #[error("fatal store error: {0}")]
    Fatal(String),

    #[error("uniqueness violation on {entity} for key {key} at block_hash {block_hash}")]
    DuplicateKey {
        entity: &'static str,
        key: String,
        block_hash: String,
    },

    #[error("no transaction is open")]
    NoTransaction,
}
