//! JSON-RPC client for Ethereum execution nodes
//!
//! Provides a typed interface to the node endpoints the ingestion
//! pipeline needs: blocks by hash/number, receipts, and the latest
//! head. Fetches that resolve to null are surfaced as `None` so the
//! caller can distinguish a superseded block from a transport failure.

use crate::types::{Block, Head, Receipt};
use alloy_primitives::B256;
use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Node interface used by the ingestion controller.
///
/// `Ok(None)` from the block and receipt fetchers means the node no
/// longer knows the requested data (a reorg race), which callers treat
/// as benign.
pub trait NodeApi {
    /// Fetch a block by hash.
    fn get_block_by_hash(
        &self,
        hash: B256,
    ) -> impl Future<Output = Result<Option<Block>>> + Send;

    /// Fetch a block by number.
    fn get_block_by_number(
        &self,
        number: u64,
    ) -> impl Future<Output = Result<Option<Block>>> + Send;

    /// Fetch the current head of the chain.
    fn latest_head(&self) -> impl Future<Output = Result<Head>> + Send;

    /// Fetch the receipts for every transaction in a block.
    ///
    /// Returns `Ok(None)` when the block was superseded while fetching
    /// (some receipt resolved to null and the block hash is gone).
    fn get_receipts(
        &self,
        block: &Block,
    ) -> impl Future<Output = Result<Option<Vec<Receipt>>>> + Send;
}

/// JSON-RPC client for Ethereum nodes.
pub struct RpcClient {
    client: reqwest::Client,
    url: String,
}

impl RpcClient {
    /// Create a new RPC client.
    pub fn new(url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }

    /// Make a JSON-RPC call.
    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params
        });

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .context("Failed to send RPC request")?;

        let json: Value = response
            .json()
            .await
            .context("Failed to parse RPC response")?;

        if let Some(error) = json.get("error") {
            anyhow::bail!("RPC error: {}", error);
        }

        json.get("result")
            .cloned()
            .context("RPC response missing 'result' field")
    }

    async fn get_block(&self, method: &str, params: Value) -> Result<Option<Block>> {
        let result = self.call(method, params).await?;
        if result.is_null() {
            return Ok(None);
        }
        let block = serde_json::from_value(result).context("Failed to deserialize block")?;
        Ok(Some(block))
    }
}

impl NodeApi for RpcClient {
    async fn get_block_by_hash(&self, hash: B256) -> Result<Option<Block>> {
        let hash_str = format!("0x{:x}", hash);
        self.get_block("eth_getBlockByHash", json!([hash_str, false]))
            .await
    }

    async fn get_block_by_number(&self, number: u64) -> Result<Option<Block>> {
        let number_str = format!("0x{:x}", number);
        self.get_block("eth_getBlockByNumber", json!([number_str, false]))
            .await
    }

    async fn latest_head(&self) -> Result<Head> {
        let block = self
            .get_block("eth_getBlockByNumber", json!(["latest", false]))
            .await?
            .context("Node returned null for latest block")?;
        Ok(block.to_head())
    }

    async fn get_receipts(&self, block: &Block) -> Result<Option<Vec<Receipt>>> {
        let mut receipts = Vec::with_capacity(block.transactions.len());
        for &tx_hash in &block.transactions {
            let hash_str = format!("0x{:x}", tx_hash);
            let result = self
                .call("eth_getTransactionReceipt", json!([hash_str]))
                .await?;

            if result.is_null() {
                // A null receipt usually means the chain moved on under
                // us. Check whether the block itself is still known.
                if self.get_block_by_hash(block.hash).await?.is_none() {
                    debug!(
                        block = block.number,
                        "block superseded while fetching receipts"
                    );
                    return Ok(None);
                }
                anyhow::bail!(
                    "receipt for tx 0x{:x} in block {} is null but block still exists",
                    tx_hash,
                    block.number
                );
            }

            let receipt =
                serde_json::from_value(result).context("Failed to deserialize receipt")?;
            receipts.push(receipt);
        }
        Ok(Some(receipts))
    }
}

/// Poll the node for new heads and push them onto the ingestion queue.
///
/// The queue is strictly FIFO; out-of-order or duplicate heads are the
/// ingestion controller's problem, not the poller's. Runs until the
/// receiving side hangs up.
pub async fn run_head_poller<N: NodeApi>(
    node: &N,
    heads: mpsc::Sender<Head>,
    poll_interval: Duration,
) -> Result<()> {
    let mut last_seen: Option<B256> = None;

    loop {
        match node.latest_head().await {
            Ok(head) => {
                if last_seen != Some(head.hash) {
                    last_seen = Some(head.hash);
                    debug!(number = head.number, "new head observed");
                    if heads.send(head).await.is_err() {
                        // Ingestion side is gone, stop polling.
                        return Ok(());
                    }
                }
            }
            Err(e) => {
                // Transient poll failures are survivable, the next poll
                // will pick up whatever head is current by then.
                warn!("head poll failed: {:#}", e);
            }
        }

        tokio::time::sleep(poll_interval).await;
    }
}
