//! Read-only chain access.
//!
//! `ChainReader` is the only capability the auth path needs from the chain:
//! code lookup and `eth_call`. `RpcChainReader` speaks plain JSON-RPC over
//! reqwest; tests substitute their own implementation.

mod eip1271;

pub use eip1271::{ContractWalletVerifier, EIP1271_MAGIC_VALUE};

use async_trait::async_trait;
use ethers::types::{Address, Bytes};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

/// HTTP timeout for a single RPC round-trip
const RPC_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Deployed bytecode at `address` (empty for EOAs).
    async fn get_code(&self, address: Address) -> Result<Bytes, String>;

    /// Read-only call against the latest block.
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, String>;
}

/// JSON-RPC request structure
#[derive(Debug, Serialize)]
struct JsonRpcRequest {
    jsonrpc: &'static str,
    method: String,
    params: Value,
    id: u64,
}

/// JSON-RPC response structure
#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

pub struct RpcChainReader {
    http_client: reqwest::Client,
    rpc_url: String,
}

impl RpcChainReader {
    pub fn new(rpc_url: &str) -> Result<Self, String> {
        let http_client = reqwest::Client::builder()
            .timeout(RPC_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| format!("Failed to build HTTP client: {}", e))?;
        Ok(Self {
            http_client,
            rpc_url: rpc_url.to_string(),
        })
    }

    async fn rpc_call(&self, method: &str, params: Value) -> Result<Value, String> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method: method.to_string(),
            params,
            id: 1,
        };

        log::debug!("[RPC] {} with params: {:?}", method, request.params);

        let response = self
            .http_client
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| format!("RPC request failed: {}", e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| format!("Failed to read response: {}", e))?;

        if !status.is_success() {
            return Err(format!("RPC error ({}): {}", status, body));
        }

        let rpc_response: JsonRpcResponse = serde_json::from_str(&body)
            .map_err(|e| format!("Failed to parse RPC response: {}", e))?;

        if let Some(error) = rpc_response.error {
            return Err(format!("RPC error {}: {}", error.code, error.message));
        }

        rpc_response
            .result
            .ok_or_else(|| "RPC response missing result".to_string())
    }

    fn parse_bytes(value: Value) -> Result<Bytes, String> {
        serde_json::from_value(value).map_err(|e| format!("Invalid hex result: {}", e))
    }
}

#[async_trait]
impl ChainReader for RpcChainReader {
    async fn get_code(&self, address: Address) -> Result<Bytes, String> {
        let result = self
            .rpc_call("eth_getCode", json!([format!("{:?}", address), "latest"]))
            .await?;
        Self::parse_bytes(result)
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, String> {
        let result = self
            .rpc_call(
                "eth_call",
                json!([{ "to": format!("{:?}", to), "data": data }, "latest"]),
            )
            .await?;
        Self::parse_bytes(result)
    }
}
