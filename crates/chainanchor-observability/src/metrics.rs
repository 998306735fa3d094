//! Pipeline metrics definitions.
//!
//! Instruments are created from an explicit [`Meter`] and handed to the
//! components that record into them. Without an installed meter provider
//! every instrument is a no-op.

use opentelemetry::{
    global,
    metrics::{Counter, Gauge, Meter},
    KeyValue,
};

/// Central metrics handle for the indexing and submission pipeline.
#[derive(Clone)]
pub struct PipelineMetrics {
    pub indexed_blocks: Counter<u64>,
    pub indexed_transactions: Counter<u64>,
    pub indexed_transfers: Counter<u64>,
    pub rpc_rate_limits: Counter<u64>,
    pub onchain_submissions: Counter<u64>,
    pub indexer_errors: Counter<u64>,
    pub last_indexed_block: Gauge<u64>,
    pub safe_block_number: Gauge<u64>,
}

impl PipelineMetrics {
    pub fn new(meter: &Meter) -> Self {
        Self {
            indexed_blocks: meter
                .u64_counter("chainanchor.indexed_blocks")
                .with_description("Blocks persisted by the indexer")
                .build(),
            indexed_transactions: meter
                .u64_counter("chainanchor.indexed_transactions")
                .with_description("Transactions persisted by the indexer")
                .build(),
            indexed_transfers: meter
                .u64_counter("chainanchor.indexed_transfers")
                .with_description("ERC-20 transfer events persisted by the indexer")
                .build(),
            rpc_rate_limits: meter
                .u64_counter("chainanchor.rpc_rate_limits")
                .with_description("Rate-limit responses that put an RPC endpoint into cooldown")
                .build(),
            onchain_submissions: meter
                .u64_counter("chainanchor.onchain_submissions")
                .with_description("Batch proof submissions to the settlement ledger")
                .build(),
            indexer_errors: meter
                .u64_counter("chainanchor.indexer_errors")
                .with_description("Errors raised by an indexer stage")
                .build(),
            last_indexed_block: meter
                .u64_gauge("chainanchor.last_indexed_block")
                .with_description("Highest block covered by a persisted batch")
                .build(),
            safe_block_number: meter
                .u64_gauge("chainanchor.safe_block_number")
                .with_description("Chain head minus the confirmation depth")
                .build(),
        }
    }

    /// Metrics backed by the global meter provider.
    pub fn global() -> Self {
        Self::new(&global::meter("chainanchor"))
    }

    pub fn record_batch(&self, chain: &str, blocks: u64, transactions: u64, transfers: u64) {
        let attrs = [KeyValue::new("chain", chain.to_string())];
        self.indexed_blocks.add(blocks, &attrs);
        self.indexed_transactions.add(transactions, &attrs);
        self.indexed_transfers.add(transfers, &attrs);
    }

    pub fn record_progress(&self, chain: &str, last_indexed_block: u64, safe_block: u64) {
        let attrs = [KeyValue::new("chain", chain.to_string())];
        self.last_indexed_block.record(last_indexed_block, &attrs);
        self.safe_block_number.record(safe_block, &attrs);
    }

    pub fn record_rate_limit(&self, url: &str) {
        self.rpc_rate_limits
            .add(1, &[KeyValue::new("url", url.to_string())]);
    }

    pub fn record_submission(&self, result: &'static str) {
        self.onchain_submissions
            .add(1, &[KeyValue::new("result", result)]);
    }

    pub fn record_indexer_error(&self, stage: &'static str) {
        self.indexer_errors.add(1, &[KeyValue::new("stage", stage)]);
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::global()
    }
}

impl std::fmt::Debug for PipelineMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineMetrics").finish_non_exhaustive()
    }
}
