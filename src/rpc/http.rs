//! HTTP JSON-RPC implementation of [`ChainRpc`], using the same `reqwest`
//! client already in the dependency graph. Provided for completeness even
//! though a live RPC endpoint is an external dependency (spec §1, §6).

use super::{ChainRpc, RpcError};
use async_trait::async_trait;
use num_bigint::BigUint;
use serde_json::{json, Value};

pub struct HttpChainRpc {
    client: reqwest::Client,
    endpoint: String,
    method: String,
}

impl HttpChainRpc {
    /// `endpoint` is the JSON-RPC URL; `method` is the RPC method name
    /// equivalent to `getRandomness` on the target chain.
    pub fn new(endpoint: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            method: method.into(),
        }
    }
}

#[async_trait]
impl ChainRpc for HttpChainRpc {
    async fn get_randomness(&self, challenge_epoch: u64) -> Result<BigUint, RpcError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": self.method,
            "params": [format!("0x{:x}", challenge_epoch)],
        });

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?;

        let parsed: Value = response
            .json()
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?;

        if let Some(error) = parsed.get("error") {
            return Err(RpcError::Transport(error.to_string()));
        }

        let result = parsed
            .get("result")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::MalformedResponse("missing result field".to_string()))?;

        let hex = result.strip_prefix("0x").unwrap_or(result);
        BigUint::parse_bytes(hex.as_bytes(), 16)
            .ok_or_else(|| RpcError::MalformedResponse(format!("not a hex integer: {}", result)))
    }
}
