//! Chain RPC collaborator (spec §6): the single read-only binding the
//! indexer needs, consumed only by the `FaultRecord` handler (C7) to obtain
//! chain randomness for a challenge epoch.

pub mod http;

use async_trait::async_trait;
use num_bigint::BigUint;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("rpc transport error: {0}")]
    Transport(String),
    #[error("rpc returned a malformed response: {0}")]
    MalformedResponse(String),
}

/// `getRandomness(uint256 challengeEpoch) -> uint256` (spec §6). A trait so
/// tests can substitute a deterministic fake without a live endpoint (used
/// directly by the `FaultRecord` scenario).
#[async_trait]
pub trait ChainRpc: Send + Sync {
    async fn get_randomness(&self, challenge_epoch: u64) -> Result<BigUint, RpcError>;
}

/// Deterministic fake used by tests: returns a fixed seed regardless of
/// epoch, or a per-epoch seed when configured.
pub struct FixedRandomness {
    pub seed: BigUint,
}

impl FixedRandomness {
    pub fn new(seed: BigUint) -> Self {
        Self { seed }
    }
}

#[async_trait]
impl ChainRpc for FixedRandomness {
    async fn get_randomness(&self, _challenge_epoch: u64) -> Result<BigUint, RpcError> {
        Ok(self.seed.clone())
    }
}

/// A fake that always fails, exercising the `RandomnessUnavailable` path.
pub struct UnavailableRandomness;

#[async_trait]
impl ChainRpc for UnavailableRandomness {
    async fn get_randomness(&self, _challenge_epoch: u64) -> Result<BigUint, RpcError> {
        Err(RpcError::Transport("randomness endpoint unreachable".to_string()))
    }
}
