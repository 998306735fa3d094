//! Shared types for the indexing and submission pipeline.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── BlockSummary ─────────────────────────────────────────────────────────────

/// The block header fields the ledger keeps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSummary {
    /// Block number.
    pub number: u64,
    /// Block hash (`0x…`).
    pub hash: String,
    /// Parent block hash (`0x…`).
    pub parent_hash: String,
    /// Unix timestamp of the block (seconds since epoch).
    pub timestamp: i64,
    /// Number of transactions in the block.
    pub tx_count: u32,
}

impl BlockSummary {
    /// Returns `true` if `parent` is the direct parent of `self`.
    pub fn extends(&self, parent: &BlockSummary) -> bool {
        self.number == parent.number + 1 && self.parent_hash == parent.hash
    }
}

// ─── TransactionRecord ───────────────────────────────────────────────────────

/// A transaction included in an indexed block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub hash: String,
    pub block_number: u64,
    pub transaction_index: u32,
    pub from: String,
    /// `None` for contract creations.
    pub to: Option<String>,
    /// Wei, as a decimal string.
    pub value: String,
}

// ─── Transfer ────────────────────────────────────────────────────────────────

/// An ERC-20 `Transfer(address,address,uint256)` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    /// `{tx_hash}-{log_index}`.
    pub id: String,
    pub tx_hash: String,
    pub log_index: u64,
    pub block_number: u64,
    /// Emitting token contract.
    pub token: String,
    pub from: String,
    pub to: String,
    /// Raw token units, as a decimal string.
    pub value: String,
}

impl Transfer {
    pub fn new(
        tx_hash: impl Into<String>,
        log_index: u64,
        block_number: u64,
        token: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        let tx_hash = tx_hash.into();
        Self {
            id: Self::make_id(&tx_hash, log_index),
            tx_hash,
            log_index,
            block_number,
            token: token.into(),
            from: from.into(),
            to: to.into(),
            value: value.into(),
        }
    }

    /// Deterministic row id.
    pub fn make_id(tx_hash: &str, log_index: u64) -> String {
        format!("{tx_hash}-{log_index}")
    }
}

// ─── Batches ─────────────────────────────────────────────────────────────────

/// On-chain submission state of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    NotReady,
    Pending,
    Confirmed,
    Failed,
}

impl BatchStatus {
    /// States a submitter may claim a batch from.
    pub const CLAIMABLE: [BatchStatus; 2] = [BatchStatus::NotReady, BatchStatus::Failed];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotReady => "NOT_READY",
            Self::Pending => "PENDING",
            Self::Confirmed => "CONFIRMED",
            Self::Failed => "FAILED",
        }
    }

    pub fn is_claimable(&self) -> bool {
        Self::CLAIMABLE.contains(self)
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NOT_READY" => Ok(Self::NotReady),
            "PENDING" => Ok(Self::Pending),
            "CONFIRMED" => Ok(Self::Confirmed),
            "FAILED" => Ok(Self::Failed),
            other => Err(format!("unknown batch status '{other}'")),
        }
    }
}

/// Ingestion-side fields of a batch, written by the indexer on every cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRecord {
    /// `{chain_id}:{start_block}:{end_block}`.
    pub id: String,
    pub start_block: u64,
    pub end_block: u64,
    /// `0x`-prefixed Merkle root over the batch's transfers.
    pub merkle_root: String,
    pub leaf_count: u64,
    pub safe_block_number: u64,
    pub total_blocks: u64,
    pub total_transactions: u64,
    pub total_transfers: u64,
}

impl BatchRecord {
    pub fn make_id(chain_id: &str, start_block: u64, end_block: u64) -> String {
        format!("{chain_id}:{start_block}:{end_block}")
    }
}

/// A persisted batch, including the submitter-owned fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedBatch {
    pub chain_id: String,
    #[serde(flatten)]
    pub record: BatchRecord,
    /// Assigned by the external verifier; required before submission.
    pub prover_address: Option<String>,
    /// Statement whose hash is anchored as the secondary root.
    pub sql_statement: Option<String>,
    pub onchain_status: BatchStatus,
    pub onchain_tx_hash: Option<String>,
    pub reward_amount: Option<String>,
    pub onchain_error: Option<String>,
    pub last_submission_attempt: Option<DateTime<Utc>>,
    pub onchain_submitted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl IndexedBatch {
    /// A freshly ingested batch, not yet eligible for submission.
    pub fn new(chain_id: impl Into<String>, record: BatchRecord, created_at: DateTime<Utc>) -> Self {
        Self {
            chain_id: chain_id.into(),
            record,
            prover_address: None,
            sql_statement: None,
            onchain_status: BatchStatus::NotReady,
            onchain_tx_hash: None,
            reward_amount: None,
            onchain_error: None,
            last_submission_attempt: None,
            onchain_submitted_at: None,
            created_at,
        }
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }
}

// ─── Attestations ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttestationStatus {
    Valid,
    Invalid,
}

impl AttestationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Valid => "VALID",
            Self::Invalid => "INVALID",
        }
    }
}

impl FromStr for AttestationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "VALID" => Ok(Self::Valid),
            "INVALID" => Ok(Self::Invalid),
            other => Err(format!("unknown attestation status '{other}'")),
        }
    }
}

/// One verifier's verdict on a batch. At most one per (batch, attestor).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attestation {
    pub chain_id: String,
    pub batch_id: String,
    pub attestor: String,
    pub status: AttestationStatus,
    pub merkle_root: String,
    pub signature: String,
}

// ─── Checkpoint ──────────────────────────────────────────────────────────────

/// Durable ingestion progress for one chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub chain_id: String,
    /// First block this chain was indexed from.
    pub start_block: u64,
    /// `None` until the first batch is persisted.
    pub last_indexed_block: Option<u64>,
    pub last_indexed_hash: Option<String>,
    pub safe_block_number: u64,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(chain_id: impl Into<String>, start_block: u64, safe_block_number: u64) -> Self {
        Self {
            chain_id: chain_id.into(),
            start_block,
            last_indexed_block: None,
            last_indexed_hash: None,
            safe_block_number,
            updated_at: Utc::now(),
        }
    }

    /// The next block to ingest.
    pub fn next_block(&self) -> u64 {
        match self.last_indexed_block {
            Some(n) => n + 1,
            None => self.start_block,
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
