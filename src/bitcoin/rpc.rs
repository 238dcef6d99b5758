//! Bitcoin Core JSON-RPC Client
//!
//! Read-only view over a bitcoind node plus transaction broadcast. The
//! node must run with `txindex=1` so previous-transaction lookups succeed.
//! All errors here are transient from the caller's point of view and
//! always retriable.

use async_trait::async_trait;
use bitcoin::consensus::encode;
use bitcoin::{Block, Transaction, Txid};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

/// Bitcoin RPC errors
#[derive(Debug, Error)]
pub enum BitcoinRpcError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("empty RPC response")]
    EmptyResponse,

    #[error("failed to decode {0}: {1}")]
    Decode(&'static str, String),
}

/// Verbose block header as returned by `getblockheader`. This is the
/// relayer's local snapshot of a header, immutable after construction.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HeaderInfo {
    pub hash: String,
    pub height: u64,
    pub version: i32,
    #[serde(rename = "merkleroot")]
    pub merkle_root: String,
    pub time: u64,
    pub nonce: u64,
    pub bits: String,
    #[serde(rename = "previousblockhash")]
    pub previous_block_hash: Option<String>,
    #[serde(rename = "nTx")]
    pub n_tx: u64,
}

impl HeaderInfo {
    /// Previous block hash, empty for the genesis block.
    pub fn prev_hash(&self) -> &str {
        self.previous_block_hash.as_deref().unwrap_or("")
    }
}

/// Capabilities the follower, scanner and broadcaster consume.
#[async_trait]
pub trait BitcoinReader: Send + Sync {
    async fn best_block_hash(&self) -> Result<String, BitcoinRpcError>;

    async fn block_hash(&self, height: u64) -> Result<String, BitcoinRpcError>;

    async fn block_header_info(&self, hash: &str) -> Result<HeaderInfo, BitcoinRpcError>;

    async fn block(&self, hash: &str) -> Result<Block, BitcoinRpcError>;

    async fn raw_transaction(&self, txid: &Txid) -> Result<Transaction, BitcoinRpcError>;

    async fn send_raw_transaction(&self, tx: &Transaction) -> Result<Txid, BitcoinRpcError>;
}

/// JSON-RPC client for Bitcoin Core
#[derive(Debug, Clone)]
pub struct BitcoinRpcClient {
    client: Client,
    url: String,
    user: String,
    password: String,
}

impl BitcoinRpcClient {
    pub fn new(url: impl Into<String>, user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
            user: user.into(),
            password: password.into(),
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, BitcoinRpcError> {
        let body = json!({
            "jsonrpc": "1.0",
            "id": crate::config::APP_NAME,
            "method": method,
            "params": params,
        });

        let resp = self
            .client
            .post(&self.url)
            .basic_auth(&self.user, Some(&self.password))
            .json(&body)
            .send()
            .await?;

        let rpc: RpcResponse<T> = resp.json().await?;
        if let Some(err) = rpc.error {
            return Err(BitcoinRpcError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        rpc.result.ok_or(BitcoinRpcError::EmptyResponse)
    }
}

#[async_trait]
impl BitcoinReader for BitcoinRpcClient {
    async fn best_block_hash(&self) -> Result<String, BitcoinRpcError> {
        self.call("getbestblockhash", json!([])).await
    }

    async fn block_hash(&self, height: u64) -> Result<String, BitcoinRpcError> {
        self.call("getblockhash", json!([height])).await
    }

    async fn block_header_info(&self, hash: &str) -> Result<HeaderInfo, BitcoinRpcError> {
        self.call("getblockheader", json!([hash, true])).await
    }

    async fn block(&self, hash: &str) -> Result<Block, BitcoinRpcError> {
        // Verbosity 0 returns the raw serialized block.
        let raw: String = self.call("getblock", json!([hash, 0])).await?;
        let bytes =
            hex::decode(&raw).map_err(|e| BitcoinRpcError::Decode("block", e.to_string()))?;
        encode::deserialize(&bytes).map_err(|e| BitcoinRpcError::Decode("block", e.to_string()))
    }

    async fn raw_transaction(&self, txid: &Txid) -> Result<Transaction, BitcoinRpcError> {
        let raw: String = self
            .call("getrawtransaction", json!([txid.to_string(), false]))
            .await?;
        let bytes =
            hex::decode(&raw).map_err(|e| BitcoinRpcError::Decode("transaction", e.to_string()))?;
        encode::deserialize(&bytes)
            .map_err(|e| BitcoinRpcError::Decode("transaction", e.to_string()))
    }

    async fn send_raw_transaction(&self, tx: &Transaction) -> Result<Txid, BitcoinRpcError> {
        let raw = hex::encode(encode::serialize(tx));
        let txid: String = self.call("sendrawtransaction", json!([raw])).await?;
        txid.parse()
            .map_err(|e| BitcoinRpcError::Decode("txid", format!("{e}")))
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}
