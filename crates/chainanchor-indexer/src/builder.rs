//! Fluent builder API for creating ingesters.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chainanchor_indexer::{IngesterBuilder, ChainSource};
//! use chainanchor_core::LedgerStore;
//!
//! # fn example(source: Arc<dyn ChainSource>, store: Arc<dyn LedgerStore>) {
//! let ingester = IngesterBuilder::new()
//!     .chain("sepolia")
//!     .confirmations(6)
//!     .batch_size(25)
//!     .build(source, store);
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use chainanchor_core::commitment::LeafLayout;
use chainanchor_core::store::LedgerStore;
use chainanchor_observability::PipelineMetrics;
use chainanchor_rpc::RetryConfig;

use crate::fetcher::ChainSource;
use crate::ingester::Ingester;

pub const MIN_BATCH_SIZE: u64 = 1;
pub const MAX_BATCH_SIZE: u64 = 200;

/// Configuration for one chain's ingester.
#[derive(Debug, Clone)]
pub struct IngesterConfig {
    /// Chain key used in every stored row (e.g. `"sepolia"`).
    pub chain_id: String,
    /// First block when no checkpoint exists. `None` starts one batch
    /// behind the safe block.
    pub start_block: Option<u64>,
    /// Blocks behind head before a block is ingested.
    pub confirmations: u64,
    /// Blocks per cycle, clamped to `1..=200`.
    pub batch_size: u64,
    pub poll_interval: Duration,
    pub health_log_interval: Duration,
    /// Concurrent block fetches within one cycle.
    pub fetch_concurrency: usize,
    /// Per-block fetch retry.
    pub block_retry: RetryConfig,
    /// Fields committed per transfer leaf.
    pub leaf_layout: LeafLayout,
}

impl Default for IngesterConfig {
    fn default() -> Self {
        Self {
            chain_id: "sepolia".into(),
            start_block: None,
            confirmations: 6,
            batch_size: 25,
            poll_interval: Duration::from_millis(4_000),
            health_log_interval: Duration::from_secs(60),
            fetch_concurrency: 4,
            block_retry: RetryConfig::default(),
            leaf_layout: LeafLayout::default(),
        }
    }
}

impl IngesterConfig {
    /// Pull out-of-range values back into what a cycle can run with.
    pub fn clamped(mut self) -> Self {
        self.batch_size = self.batch_size.clamp(MIN_BATCH_SIZE, MAX_BATCH_SIZE);
        self.fetch_concurrency = self.fetch_concurrency.max(1);
        self
    }
}

/// Fluent builder for [`Ingester`].
#[derive(Default)]
pub struct IngesterBuilder {
    config: IngesterConfig,
    metrics: Option<PipelineMetrics>,
}

impl IngesterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing config.
    pub fn config(mut self, config: IngesterConfig) -> Self {
        self.config = config;
        self
    }

    pub fn chain(mut self, chain_id: impl Into<String>) -> Self {
        self.config.chain_id = chain_id.into();
        self
    }

    pub fn start_block(mut self, block: u64) -> Self {
        self.config.start_block = Some(block);
        self
    }

    pub fn confirmations(mut self, depth: u64) -> Self {
        self.config.confirmations = depth;
        self
    }

    pub fn batch_size(mut self, size: u64) -> Self {
        self.config.batch_size = size;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn health_log_interval(mut self, interval: Duration) -> Self {
        self.config.health_log_interval = interval;
        self
    }

    pub fn fetch_concurrency(mut self, n: usize) -> Self {
        self.config.fetch_concurrency = n;
        self
    }

    pub fn block_retry(mut self, retry: RetryConfig) -> Self {
        self.config.block_retry = retry;
        self
    }

    pub fn leaf_layout(mut self, layout: LeafLayout) -> Self {
        self.config.leaf_layout = layout;
        self
    }

    pub fn metrics(mut self, metrics: PipelineMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Resolve the config, clamping out-of-range values.
    pub fn build_config(self) -> IngesterConfig {
        self.config.clamped()
    }

    pub fn build(self, source: Arc<dyn ChainSource>, store: Arc<dyn LedgerStore>) -> Ingester {
        let metrics = self.metrics.clone().unwrap_or_default();
        Ingester::new(self.build_config(), source, store, metrics)
    }
}
