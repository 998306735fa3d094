//! Errors shared by the ingester, the ledger store and the submitter.

use thiserror::Error;

use crate::commitment::CommitmentError;

/// Pipeline error. Store backends flatten their driver errors into `Storage`.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Reorg detected at block {block_number}: expected parent {expected}, got {actual}")]
    ReorgDetected {
        block_number: u64,
        expected: String,
        actual: String,
    },

    #[error("Commitment error: {0}")]
    Commitment(#[from] CommitmentError),
}

impl IndexerError {
    /// Recoverable by rolling back and re-ingesting.
    pub fn is_reorg(&self) -> bool {
        matches!(self, Self::ReorgDetected { .. })
    }
}
