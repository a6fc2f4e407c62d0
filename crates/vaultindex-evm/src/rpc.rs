//! Minimal EVM JSON-RPC client backed by `reqwest`.
//!
//! Only the three calls the indexer needs: `eth_blockNumber`, `eth_chainId`
//! and `eth_getLogs`. Retrying is the poll loop's job, so a failed call
//! surfaces immediately.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use vaultindex_core::error::IndexerError;
use vaultindex_core::types::BlockRange;

use crate::abi::{parse_hex_u64, RawLog};

// ─── Wire types ──────────────────────────────────────────────────────────────

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub method: String,
    pub params: Vec<Value>,
    pub id: u64,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method: method.into(),
            params,
            id,
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

/// A JSON-RPC 2.0 response.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Unwrap the result value or return the node's error.
    pub fn into_result(self) -> Result<Value, IndexerError> {
        match self.error {
            Some(err) => Err(IndexerError::Rpc(format!("{}: {}", err.code, err.message))),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// `eth_getLogs` filter for one contract and one event signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    pub address: String,
    pub topic0: String,
    pub range: BlockRange,
}

impl LogFilter {
    pub fn to_json(&self) -> Value {
        json!({
            "address": self.address,
            "fromBlock": format!("0x{:x}", self.range.from),
            "toBlock": format!("0x{:x}", self.range.to),
            "topics": [self.topic0],
        })
    }
}

// ─── Client trait ────────────────────────────────────────────────────────────

/// Trait for the EVM JSON-RPC calls used by [`EvmLogSource`](crate::source::EvmLogSource).
#[async_trait]
pub trait EvmRpcClient: Send + Sync {
    async fn block_number(&self) -> Result<u64, IndexerError>;
    async fn chain_id(&self) -> Result<u64, IndexerError>;
    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, IndexerError>;
}

// ─── HTTP implementation ─────────────────────────────────────────────────────

/// HTTP JSON-RPC client.
pub struct HttpEvmClient {
    url: String,
    http: reqwest::Client,
    next_id: AtomicU64,
}

impl HttpEvmClient {
    /// Create a client for the given endpoint URL.
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Result<Self, IndexerError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| IndexerError::Config(format!("http client: {e}")))?;
        Ok(Self {
            url: url.into(),
            http,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Vec<Value>) -> Result<T, IndexerError> {
        let req = JsonRpcRequest::new(self.next_id.fetch_add(1, Ordering::Relaxed), method, params);
        let resp = self
            .http
            .post(&self.url)
            .json(&req)
            .send()
            .await
            .map_err(|e| IndexerError::Connectivity(format!("{method}: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(IndexerError::Connectivity(format!("{method}: HTTP {status}: {body}")));
        }

        let body: JsonRpcResponse = resp
            .json()
            .await
            .map_err(|e| IndexerError::Decode(format!("{method}: {e}")))?;
        let result = body.into_result()?;
        serde_json::from_value(result).map_err(|e| IndexerError::Decode(format!("{method}: {e}")))
    }
}

#[async_trait]
impl EvmRpcClient for HttpEvmClient {
    async fn block_number(&self) -> Result<u64, IndexerError> {
        let hex: String = self.call("eth_blockNumber", vec![]).await?;
        parse_hex_u64(&hex)
    }

    async fn chain_id(&self) -> Result<u64, IndexerError> {
        let hex: String = self.call("eth_chainId", vec![]).await?;
        parse_hex_u64(&hex)
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, IndexerError> {
        self.call("eth_getLogs", vec![filter.to_json()]).await
    }
}
