//! chainanchor-indexer — confirmation-depth ERC-20 transfer ingestion.
//!
//! # Architecture
//!
//! ```text
//! EndpointPool ──► PooledChainSource (ChainSource)
//!                        │  eth_blockNumber / eth_getBlockByNumber / eth_getLogs
//!                        ▼
//!                    Ingester::run_cycle
//!                        │  reorg check → bisected log fetch → Merkle root
//!                        ▼
//!                  LedgerStore::commit_batch
//! ```

pub mod builder;
pub mod fetcher;
pub mod ingester;

pub use builder::{IngesterBuilder, IngesterConfig};
pub use fetcher::{
    fetch_logs_bisecting, parse_transfer, ChainSource, FetchedBlock, PooledChainSource, RawLog,
    TRANSFER_TOPIC,
};
pub use ingester::{CycleOutcome, Ingester, IngesterHandle, IngesterState};
