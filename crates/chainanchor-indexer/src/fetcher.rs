//! EVM block and transfer-log fetcher.
//!
//! Uses JSON-RPC `eth_blockNumber`, `eth_getBlockByNumber(n, true)` and
//! `eth_getLogs` through an [`EndpointPool`], and bisects log ranges the
//! provider refuses as too large.

use std::sync::Arc;

use alloy_primitives::U256;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use chainanchor_core::types::{BlockSummary, TransactionRecord, Transfer};
use chainanchor_rpc::{is_log_limit_error, EndpointPool, TransportError};

/// `keccak256("Transfer(address,address,uint256)")`.
pub const TRANSFER_TOPIC: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

/// A raw EVM log as returned by `eth_getLogs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    #[serde(rename = "data")]
    pub data: String,
    #[serde(rename = "blockNumber")]
    pub block_number: String,
    #[serde(rename = "transactionHash")]
    pub tx_hash: String,
    #[serde(rename = "logIndex")]
    pub log_index: String,
    #[serde(rename = "removed", default)]
    pub removed: Option<bool>,
}

impl RawLog {
    /// Returns `true` if this log was removed by a reorg.
    pub fn is_removed(&self) -> bool {
        self.removed.unwrap_or(false)
    }
}

/// A block header with its full transaction bodies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedBlock {
    pub summary: BlockSummary,
    pub transactions: Vec<TransactionRecord>,
}

/// Read access to one chain. The seam the ingester is tested through.
#[async_trait]
pub trait ChainSource: Send + Sync {
    async fn head_block_number(&self) -> Result<u64, TransportError>;

    /// `None` if the node does not know the block (yet).
    async fn block_with_transactions(&self, number: u64) -> Result<Option<FetchedBlock>, TransportError>;

    /// Every `Transfer` log in `[from, to]`, one request.
    async fn transfer_logs(&self, from: u64, to: u64) -> Result<Vec<RawLog>, TransportError>;
}

/// [`ChainSource`] backed by an [`EndpointPool`].
pub struct PooledChainSource {
    pool: Arc<EndpointPool>,
}

impl PooledChainSource {
    pub fn new(pool: Arc<EndpointPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChainSource for PooledChainSource {
    async fn head_block_number(&self) -> Result<u64, TransportError> {
        let raw: String = self.pool.request("eth_blockNumber", vec![]).await?;
        parse_hex_u64(&raw).ok_or_else(|| TransportError::Other(format!("bad block number {raw}")))
    }

    async fn block_with_transactions(&self, number: u64) -> Result<Option<FetchedBlock>, TransportError> {
        let raw: Option<Value> = self
            .pool
            .request("eth_getBlockByNumber", vec![json!(format!("0x{number:x}")), json!(true)])
            .await?;
        match raw {
            None => Ok(None),
            Some(v) => block_from_json(&v)
                .map(Some)
                .ok_or_else(|| TransportError::Other(format!("malformed block {number}"))),
        }
    }

    async fn transfer_logs(&self, from: u64, to: u64) -> Result<Vec<RawLog>, TransportError> {
        let filter = json!({
            "fromBlock": format!("0x{from:x}"),
            "toBlock": format!("0x{to:x}"),
            "topics": [TRANSFER_TOPIC],
        });
        self.pool.request("eth_getLogs", vec![filter]).await
    }
}

/// Fetch transfer logs for `[from, to]`, splitting ranges the provider
/// rejects for volume. Left halves are fetched first so the result stays in
/// block order. A single block that is still too large is dropped.
pub async fn fetch_logs_bisecting(
    source: &dyn ChainSource,
    from: u64,
    to: u64,
) -> Result<Vec<RawLog>, TransportError> {
    let mut pending = vec![(from, to)];
    let mut logs = Vec::new();

    while let Some((lo, hi)) = pending.pop() {
        match source.transfer_logs(lo, hi).await {
            Ok(chunk) => logs.extend(chunk),
            Err(err) if is_log_limit_error(&err) => {
                if lo == hi {
                    tracing::warn!(
                        block = lo,
                        error = %err,
                        "Single block exceeds provider log limit; skipping its transfers"
                    );
                    continue;
                }
                let mid = lo + (hi - lo) / 2;
                tracing::debug!(from = lo, to = hi, mid, "Log range too large; bisecting");
                pending.push((mid + 1, hi));
                pending.push((lo, mid));
            }
            Err(err) => return Err(err),
        }
    }
    Ok(logs)
}

/// Decode an ERC-20 `Transfer` log. Returns `None` for removed logs and
/// other shapes (e.g. ERC-721, which indexes the token id as a fourth topic).
pub fn parse_transfer(log: &RawLog) -> Option<Transfer> {
    if log.is_removed() || log.topics.len() != 3 || !log.topics[0].eq_ignore_ascii_case(TRANSFER_TOPIC) {
        return None;
    }
    let from = topic_address(&log.topics[1])?;
    let to = topic_address(&log.topics[2])?;
    let data = log.data.strip_prefix("0x").unwrap_or(&log.data);
    if data.is_empty() || data.len() > 64 {
        return None;
    }
    let value = U256::from_str_radix(data, 16).ok()?;

    Some(Transfer::new(
        log.tx_hash.to_lowercase(),
        parse_hex_u64(&log.log_index)?,
        parse_hex_u64(&log.block_number)?,
        log.address.to_lowercase(),
        from,
        to,
        value.to_string(),
    ))
}

/// Last 20 bytes of an indexed 32-byte topic, as a `0x` address.
fn topic_address(topic: &str) -> Option<String> {
    let hex = topic.strip_prefix("0x").unwrap_or(topic);
    if hex.len() != 64 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    Some(format!("0x{}", hex[24..].to_lowercase()))
}

/// Parse a hex-encoded string (with or without `0x`) to u64.
pub fn parse_hex_u64(s: &str) -> Option<u64> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(s, 16).ok()
}

fn hex_to_decimal(s: &str) -> Option<String> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.is_empty() {
        return Some("0".into());
    }
    U256::from_str_radix(s, 16).ok().map(|v| v.to_string())
}

/// Convert an `eth_getBlockByNumber(n, true)` response.
pub fn block_from_json(v: &Value) -> Option<FetchedBlock> {
    let number = parse_hex_u64(v["number"].as_str()?)?;
    let txs = v["transactions"].as_array()?;

    let mut transactions = Vec::with_capacity(txs.len());
    for tx in txs {
        transactions.push(TransactionRecord {
            hash: tx["hash"].as_str()?.to_lowercase(),
            block_number: number,
            transaction_index: parse_hex_u64(tx["transactionIndex"].as_str()?)? as u32,
            from: tx["from"].as_str()?.to_lowercase(),
            to: tx["to"].as_str().map(str::to_lowercase),
            value: hex_to_decimal(tx["value"].as_str().unwrap_or("0x0"))?,
        });
    }

    Some(FetchedBlock {
        summary: BlockSummary {
            number,
            hash: v["hash"].as_str()?.to_string(),
            parent_hash: v["parentHash"].as_str()?.to_string(),
            timestamp: parse_hex_u64(v["timestamp"].as_str()?)? as i64,
            tx_count: transactions.len() as u32,
        },
        transactions,
    })
}
