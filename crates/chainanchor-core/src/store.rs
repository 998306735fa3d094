//! The ledger store, the single source of truth for ingestion and submission.
//!
//! Every method that touches more than one entity is atomic: either all rows
//! change or none do.

use alloy_primitives::U256;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::cursor::PaginationCursor;
use crate::error::IndexerError;
use crate::query::Direction;
use crate::types::{
    Attestation, BatchRecord, BatchStatus, BlockSummary, Checkpoint, IndexedBatch,
    TransactionRecord, Transfer,
};

/// Everything one ingestion cycle persists, written in a single transaction.
#[derive(Debug, Clone)]
pub struct BatchCommit {
    pub chain_id: String,
    pub blocks: Vec<BlockSummary>,
    pub transactions: Vec<TransactionRecord>,
    /// In ingestion order.
    pub transfers: Vec<Transfer>,
    pub batch: BatchRecord,
    pub checkpoint: Checkpoint,
}

/// A validated transfer page request, ready to run against a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeekRequest {
    pub chain_id: String,
    pub from_block: Option<u64>,
    pub to_block: Option<u64>,
    /// Matches either side of the transfer, case-insensitively.
    pub address: Option<String>,
    pub token: Option<String>,
    pub min_value: Option<U256>,
    pub max_value: Option<U256>,
    pub from_timestamp: Option<i64>,
    pub to_timestamp: Option<i64>,
    /// Only rows strictly after this one in `direction` order.
    pub after: Option<PaginationCursor>,
    pub direction: Direction,
    pub limit: usize,
}

impl SeekRequest {
    /// Returns `true` if `transfer` (in a block stamped `timestamp`) passes
    /// every filter. Backends that cannot push filters down use this.
    pub fn matches(&self, transfer: &Transfer, timestamp: Option<i64>) -> bool {
        if self.from_block.is_some_and(|b| transfer.block_number < b)
            || self.to_block.is_some_and(|b| transfer.block_number > b)
        {
            return false;
        }
        if let Some(address) = &self.address {
            if !transfer.from.eq_ignore_ascii_case(address) && !transfer.to.eq_ignore_ascii_case(address) {
                return false;
            }
        }
        if let Some(token) = &self.token {
            if !transfer.token.eq_ignore_ascii_case(token) {
                return false;
            }
        }
        if self.min_value.is_some() || self.max_value.is_some() {
            let Ok(value) = U256::from_str_radix(&transfer.value, 10) else {
                return false;
            };
            if self.min_value.is_some_and(|m| value < m) || self.max_value.is_some_and(|m| value > m) {
                return false;
            }
        }
        if self.from_timestamp.is_some() || self.to_timestamp.is_some() {
            let Some(ts) = timestamp else { return false };
            if self.from_timestamp.is_some_and(|t| ts < t) || self.to_timestamp.is_some_and(|t| ts > t) {
                return false;
            }
        }
        match &self.after {
            Some(anchor) => {
                let key = (transfer.block_number, transfer.log_index, transfer.id.as_str());
                let anchor = (anchor.block_number, anchor.log_index, anchor.id.as_str());
                match self.direction {
                    Direction::Asc => key > anchor,
                    Direction::Desc => key < anchor,
                }
            }
            None => true,
        }
    }
}

/// Persistence for blocks, transfers, batches, attestations and checkpoints.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    // ─── Ingestion ───────────────────────────────────────────────────────────

    async fn load_checkpoint(&self, chain_id: &str) -> Result<Option<Checkpoint>, IndexerError>;

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), IndexerError>;

    /// Hash of a stored block, if present.
    async fn block_hash(&self, chain_id: &str, number: u64) -> Result<Option<String>, IndexerError>;

    /// Persist one cycle atomically.
    ///
    /// Per block, previously stored transactions and transfers are replaced.
    /// Transfers are keyed by `(chain_id, id)` and never duplicated. The batch
    /// is upserted: ingestion fields are overwritten, submitter-owned fields
    /// are kept. The checkpoint is written last.
    async fn commit_batch(&self, commit: BatchCommit) -> Result<(), IndexerError>;

    /// Reorg repair, atomically: drop batches ending after `block`, drop
    /// blocks, transactions and transfers above `block`, then save
    /// `checkpoint`.
    async fn rollback_after(
        &self,
        chain_id: &str,
        block: u64,
        checkpoint: &Checkpoint,
    ) -> Result<(), IndexerError>;

    async fn count_blocks(&self, chain_id: &str) -> Result<u64, IndexerError>;

    async fn count_transfers(&self, chain_id: &str) -> Result<u64, IndexerError>;

    // ─── Query ───────────────────────────────────────────────────────────────

    async fn seek_transfers(&self, request: &SeekRequest) -> Result<Vec<Transfer>, IndexerError>;

    // ─── Batches ─────────────────────────────────────────────────────────────

    async fn get_batch(&self, chain_id: &str, batch_id: &str) -> Result<Option<IndexedBatch>, IndexerError>;

    /// Most recent batches first.
    async fn recent_batches(&self, chain_id: &str, limit: usize) -> Result<Vec<IndexedBatch>, IndexerError>;

    /// Claimable batches with a prover assigned, oldest first.
    async fn submittable_batches(&self, chain_id: &str, limit: usize) -> Result<Vec<IndexedBatch>, IndexerError>;

    /// Attach the prover (and optional SQL statement) chosen by the verifier.
    /// Returns `false` if the batch does not exist.
    async fn assign_prover(
        &self,
        chain_id: &str,
        batch_id: &str,
        prover: &str,
        sql_statement: Option<&str>,
    ) -> Result<bool, IndexerError>;

    async fn set_batch_status(&self, chain_id: &str, batch_id: &str, status: BatchStatus) -> Result<(), IndexerError>;

    /// Conditional `NOT_READY | FAILED → PENDING`. Returns rows affected
    /// (0 or 1); 0 means someone else holds the claim.
    async fn claim_batch(&self, chain_id: &str, batch_id: &str, at: DateTime<Utc>) -> Result<u64, IndexerError>;

    async fn mark_confirmed(
        &self,
        chain_id: &str,
        batch_id: &str,
        tx_hash: &str,
        reward: &str,
        at: DateTime<Utc>,
    ) -> Result<(), IndexerError>;

    async fn mark_failed(
        &self,
        chain_id: &str,
        batch_id: &str,
        error: &str,
        reward: Option<&str>,
    ) -> Result<(), IndexerError>;

    // ─── Attestations ────────────────────────────────────────────────────────

    /// Insert or replace the verdict of `attestation.attestor`.
    async fn record_attestation(&self, attestation: &Attestation) -> Result<(), IndexerError>;

    async fn count_valid_attestations(&self, chain_id: &str, batch_id: &str) -> Result<u64, IndexerError>;
}
