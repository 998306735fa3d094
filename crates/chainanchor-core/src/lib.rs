//! chainanchor-core — foundation for the transfer indexer and proof anchoring.
//!
//! # Architecture
//!
//! ```text
//! Ingester ──► CommitmentBuilder (Merkle root over transfer leaves)
//!     │
//!     └──► LedgerStore::commit_batch (blocks + txs + transfers + batch + checkpoint)
//!                         │
//! BatchSubmitter ◄────────┘  quorum gate → claim → RewardPolicy → settlement ledger
//!
//! list_transfers ──► PaginationCursor ──► LedgerStore::seek_transfers
//! ```

pub mod commitment;
pub mod cursor;
pub mod error;
pub mod query;
pub mod reward;
pub mod store;
pub mod types;

pub use commitment::{keccak256, transfer_leaf, CommitmentBuilder, LeafLayout, ZERO_ROOT};
pub use cursor::{CursorError, PaginationCursor};
pub use error::IndexerError;
pub use query::{list_transfers, Direction, QueryError, TransferPage, TransferQuery};
pub use reward::{RewardError, RewardPolicy};
pub use store::{BatchCommit, LedgerStore, SeekRequest};
pub use types::{
    Attestation, AttestationStatus, BatchRecord, BatchStatus, BlockSummary, Checkpoint,
    IndexedBatch, TransactionRecord, Transfer,
};
