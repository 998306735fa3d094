//! # chainanchor-observability
//!
//! Logging and metrics shared by the indexer, the submitter and the CLI.
//!
//! ## Built-in metrics
//! - `chainanchor.indexed_blocks`        — counter, tagged with chain
//! - `chainanchor.indexed_transactions`  — counter, tagged with chain
//! - `chainanchor.indexed_transfers`     — counter, tagged with chain
//! - `chainanchor.rpc_rate_limits`       — counter, tagged with url
//! - `chainanchor.onchain_submissions`   — counter, tagged with result
//! - `chainanchor.indexer_errors`        — counter, tagged with stage
//! - `chainanchor.last_indexed_block`    — gauge, tagged with chain
//! - `chainanchor.safe_block_number`     — gauge, tagged with chain
//!
//! ## Structured logging
//! JSON-structured logs compatible with ELK, Loki, CloudWatch.
//! Log levels configurable per component.

pub mod metrics;
pub mod tracing_setup;

pub use metrics::PipelineMetrics;
pub use tracing_setup::{init_tracing, LogConfig};
