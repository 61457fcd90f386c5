//! Event Handlers (C7, spec §4.7).
//!
//! One module per related group of protocol events/functions. Handlers are
//! pure functions of `(ctx, log, tx)` or `(ctx, tx)` plus store state — no
//! hidden globals (spec §4.7). Errors are typed (`error::IndexerError`) and
//! propagate to the block transaction except `MissingPrerequisite`, which
//! the block processor recovers from (§4.8).

pub mod common;
pub mod fault;
pub mod fees;
pub mod proof_set;
pub mod proving;
pub mod registry;
pub mod roots;

use crate::config::{FaultConfig, ProvingConfig};
use crate::domain::{RawLog, RawTx};
use crate::error::IndexerError;
use crate::rpc::ChainRpc;
use crate::store::Store;
use async_trait::async_trait;

/// Everything a handler needs beyond its own decoded arguments: the open
/// store transaction, the current block's identity, and the small set of
/// configuration values the catalog references (proving-period defaults,
/// fault challenge count).
pub struct HandlerContext<'a> {
    pub store: &'a (dyn Store + 'a),
    pub rpc: &'a (dyn ChainRpc + 'a),
    pub proving: &'a ProvingConfig,
    pub fault: &'a FaultConfig,
    pub block_number: u64,
    pub block_hash: &'a str,
    pub timestamp: u64,
}

/// One handler per named entry in the configuration's `Handler` field.
/// Most handlers implement only one of the two methods; the default
/// implementations make the other a decode-mismatch-shaped configuration
/// error rather than a panic, since it only fires if a config document
/// wires a trigger kind the handler was never meant to receive.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle_event(
        &self,
        _ctx: &HandlerContext<'_>,
        _log: &RawLog,
        _tx: Option<&RawTx>,
    ) -> Result<(), IndexerError> {
        Err(IndexerError::Config(
            "this handler does not support event triggers".to_string(),
        ))
    }

    async fn handle_function(
        &self,
        _ctx: &HandlerContext<'_>,
        _tx: &RawTx,
    ) -> Result<(), IndexerError> {
        Err(IndexerError::Config(
            "this handler does not support function triggers".to_string(),
        ))
    }
}
