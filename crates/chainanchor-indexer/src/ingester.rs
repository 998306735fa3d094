//! The ingestion loop: one cycle per confirmed block range.
//!
//! ```text
//! Uninitialized ── load / create checkpoint
//!      │
//!      ▼
//! WaitingForConfirmations ── next > head − confirmations ──► sleep, retry
//!      │
//!      ▼
//! Fetching     blocks [next..=end] with bodies (retried, bounded concurrency)
//!      │
//!      ▼
//! ReorgCheck   stored hash(next − 1) == parent_hash(next)?
//!      │            └─ no ──► rollback, walk one block deeper on repeats
//!      ▼
//! Persisting   transfer logs (bisected) → Merkle root → one atomic commit
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt, TryStreamExt};
use tokio::time::Instant;

use chainanchor_core::commitment::CommitmentBuilder;
use chainanchor_core::error::IndexerError;
use chainanchor_core::store::{BatchCommit, LedgerStore};
use chainanchor_core::types::{BatchRecord, Checkpoint, Transfer};
use chainanchor_observability::PipelineMetrics;
use chainanchor_rpc::{RetryPolicy, TransportError};

use crate::builder::IngesterConfig;
use crate::fetcher::{fetch_logs_bisecting, parse_transfer, ChainSource, FetchedBlock};

fn rpc_err(e: TransportError) -> IndexerError {
    IndexerError::Rpc(e.to_string())
}

/// Runtime state of the ingester.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngesterState {
    Uninitialized,
    WaitingForConfirmations,
    Fetching,
    ReorgCheck,
    Persisting,
    Stopped,
}

impl fmt::Display for IngesterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::WaitingForConfirmations => write!(f, "waiting-for-confirmations"),
            Self::Fetching => write!(f, "fetching"),
            Self::ReorgCheck => write!(f, "reorg-check"),
            Self::Persisting => write!(f, "persisting"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// What one call to [`Ingester::run_cycle`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The next block is not yet behind the confirmation depth.
    Waiting { next_block: u64, safe_block: u64 },
    /// Stored history diverged; everything above `rollback_to` was removed.
    Reorg { rollback_to: u64 },
    /// A batch was committed.
    Persisted(BatchRecord),
}

/// Stops a running ingester at the next loop boundary.
#[derive(Debug, Clone)]
pub struct IngesterHandle {
    stop: Arc<AtomicBool>,
}

impl IngesterHandle {
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

/// Per-chain transfer ingester.
pub struct Ingester {
    config: IngesterConfig,
    source: Arc<dyn ChainSource>,
    store: Arc<dyn LedgerStore>,
    metrics: PipelineMetrics,
    retry: RetryPolicy,
    state: IngesterState,
    /// Target of the previous rollback, cleared once a batch persists.
    last_rollback: Option<u64>,
    stop: Arc<AtomicBool>,
    last_health_log: Option<Instant>,
}

impl Ingester {
    /// `config` is clamped the same way [`IngesterBuilder`](crate::IngesterBuilder) clamps it.
    pub fn new(
        config: IngesterConfig,
        source: Arc<dyn ChainSource>,
        store: Arc<dyn LedgerStore>,
        metrics: PipelineMetrics,
    ) -> Self {
        let config = config.clamped();
        Self {
            retry: RetryPolicy::new(config.block_retry.clone()),
            config,
            source,
            store,
            metrics,
            state: IngesterState::Uninitialized,
            last_rollback: None,
            stop: Arc::new(AtomicBool::new(false)),
            last_health_log: None,
        }
    }

    pub fn config(&self) -> &IngesterConfig {
        &self.config
    }

    pub fn state(&self) -> IngesterState {
        self.state
    }

    pub fn handle(&self) -> IngesterHandle {
        IngesterHandle { stop: Arc::clone(&self.stop) }
    }

    /// Run cycles until stopped. Cycle errors are logged, counted and retried
    /// after `poll_interval` without advancing.
    pub async fn run(&mut self) -> Result<(), IndexerError> {
        tracing::info!(
            chain = %self.config.chain_id,
            confirmations = self.config.confirmations,
            batch_size = self.config.batch_size,
            "Starting ingester"
        );

        while !self.stop.load(Ordering::SeqCst) {
            match self.run_cycle().await {
                Ok(CycleOutcome::Persisted(_)) | Ok(CycleOutcome::Reorg { .. }) => {}
                Ok(CycleOutcome::Waiting { .. }) => tokio::time::sleep(self.config.poll_interval).await,
                // The chain moved under a fetch; the next cycle re-reads the range.
                Err(err) if err.is_reorg() => {
                    tracing::warn!(chain = %self.config.chain_id, error = %err, "Fetched range no longer links up");
                    tokio::time::sleep(self.config.poll_interval).await;
                }
                Err(err) => {
                    tracing::error!(
                        chain = %self.config.chain_id,
                        state = %self.state,
                        error = %err,
                        "Ingestion cycle failed"
                    );
                    self.metrics.record_indexer_error("cycle");
                    tokio::time::sleep(self.config.poll_interval).await;
                }
            }
            self.maybe_log_health().await;
        }

        self.state = IngesterState::Stopped;
        tracing::info!(chain = %self.config.chain_id, "Ingester stopped");
        Ok(())
    }

    /// One pass of the state machine.
    pub async fn run_cycle(&mut self) -> Result<CycleOutcome, IndexerError> {
        let checkpoint = self.load_or_init_checkpoint().await?;

        self.state = IngesterState::WaitingForConfirmations;
        let safe = self.head_block_number().await?.saturating_sub(self.config.confirmations);
        let next = checkpoint.next_block();
        if next > safe {
            tracing::debug!(chain = %self.config.chain_id, next, safe, "Waiting for confirmations");
            return Ok(CycleOutcome::Waiting { next_block: next, safe_block: safe });
        }
        let end = (next + self.config.batch_size - 1).min(safe);

        self.state = IngesterState::Fetching;
        let blocks = self.fetch_blocks(next, end).await?;
        for pair in blocks.windows(2) {
            let (parent, child) = (&pair[0].summary, &pair[1].summary);
            if !child.extends(parent) {
                return Err(IndexerError::ReorgDetected {
                    block_number: child.number,
                    expected: parent.hash.clone(),
                    actual: child.parent_hash.clone(),
                });
            }
        }

        self.state = IngesterState::ReorgCheck;
        if next > 0 {
            if let Some(stored) = self.store.block_hash(&self.config.chain_id, next - 1).await? {
                let first = &blocks[0].summary;
                if stored != first.parent_hash {
                    return self.rollback(&checkpoint, next, &stored, &first.parent_hash).await;
                }
            }
        }

        self.state = IngesterState::Persisting;
        let transfers = self.fetch_transfers(next, end).await?;
        let commitment = CommitmentBuilder::from_transfers_with(self.config.leaf_layout, &transfers)?;

        let chain_id = self.config.chain_id.clone();
        let total_transactions: u64 = blocks.iter().map(|b| b.transactions.len() as u64).sum();
        let record = BatchRecord {
            id: BatchRecord::make_id(&chain_id, next, end),
            start_block: next,
            end_block: end,
            merkle_root: commitment.root_hex(),
            leaf_count: commitment.leaf_count() as u64,
            safe_block_number: safe,
            total_blocks: blocks.len() as u64,
            total_transactions,
            total_transfers: transfers.len() as u64,
        };

        let mut advanced = checkpoint;
        advanced.last_indexed_block = Some(end);
        advanced.last_indexed_hash = blocks.last().map(|b| b.summary.hash.clone());
        advanced.safe_block_number = safe;
        advanced.updated_at = Utc::now();

        let (summaries, transactions): (Vec<_>, Vec<_>) = blocks
            .into_iter()
            .map(|b| (b.summary, b.transactions))
            .unzip();

        self.store
            .commit_batch(BatchCommit {
                chain_id: chain_id.clone(),
                blocks: summaries,
                transactions: transactions.into_iter().flatten().collect(),
                transfers,
                batch: record.clone(),
                checkpoint: advanced,
            })
            .await?;
        self.last_rollback = None;

        self.metrics.record_batch(
            &chain_id,
            record.total_blocks,
            record.total_transactions,
            record.total_transfers,
        );
        self.metrics.record_progress(&chain_id, end, safe);
        tracing::info!(
            chain = %chain_id,
            start = next,
            end,
            safe,
            transactions = record.total_transactions,
            transfers = record.total_transfers,
            root = %record.merkle_root,
            "Indexed new batch"
        );

        Ok(CycleOutcome::Persisted(record))
    }

    // ─── Checkpoint ──────────────────────────────────────────────────────────

    async fn load_or_init_checkpoint(&mut self) -> Result<Checkpoint, IndexerError> {
        let chain_id = &self.config.chain_id;
        if let Some(cp) = self.store.load_checkpoint(chain_id).await? {
            if self.state == IngesterState::Uninitialized {
                tracing::info!(
                    chain = %chain_id,
                    start = cp.start_block,
                    last_indexed = ?cp.last_indexed_block,
                    "Resuming from checkpoint"
                );
            }
            return Ok(cp);
        }

        let safe = self.head_block_number().await?.saturating_sub(self.config.confirmations);
        let start = self
            .config
            .start_block
            .unwrap_or_else(|| safe.saturating_sub(self.config.batch_size));
        let cp = Checkpoint::new(chain_id.clone(), start, safe);
        self.store.save_checkpoint(&cp).await?;
        tracing::info!(chain = %chain_id, start, safe, "Initialized checkpoint");
        Ok(cp)
    }

    // ─── Fetching ────────────────────────────────────────────────────────────

    async fn head_block_number(&self) -> Result<u64, IndexerError> {
        let source = &self.source;
        self.retry
            .retry_if(
                "eth_blockNumber",
                || async move { source.head_block_number().await },
                TransportError::is_retryable,
            )
            .await
            .map_err(rpc_err)
    }

    /// Blocks `[from, to]` in order, each fetched with retry.
    async fn fetch_blocks(&self, from: u64, to: u64) -> Result<Vec<FetchedBlock>, IndexerError> {
        let source = &self.source;
        let retry = &self.retry;
        stream::iter(from..=to)
            .map(|number| async move {
                retry
                    .retry_if(
                        "eth_getBlockByNumber",
                        || async move {
                            source
                                .block_with_transactions(number)
                                .await?
                                .ok_or_else(|| TransportError::Other(format!("block {number} not available")))
                        },
                        TransportError::is_retryable,
                    )
                    .await
            })
            .buffered(self.config.fetch_concurrency)
            .try_collect::<Vec<_>>()
            .await
            .map_err(rpc_err)
    }

    /// Decoded transfers in `[from, to]`, ordered by block then log index.
    async fn fetch_transfers(&self, from: u64, to: u64) -> Result<Vec<Transfer>, IndexerError> {
        let logs = fetch_logs_bisecting(self.source.as_ref(), from, to)
            .await
            .map_err(rpc_err)?;

        let mut transfers = Vec::with_capacity(logs.len());
        for log in &logs {
            match parse_transfer(log) {
                Some(t) if (from..=to).contains(&t.block_number) => transfers.push(t),
                Some(t) => tracing::warn!(
                    block = t.block_number,
                    from,
                    to,
                    "Provider returned a log outside the requested range; skipping"
                ),
                None => tracing::warn!(
                    tx = %log.tx_hash,
                    topics = log.topics.len(),
                    removed = log.is_removed(),
                    "Skipping log that is not an ERC-20 transfer"
                ),
            }
        }
        transfers.sort_by(|a, b| (a.block_number, a.log_index).cmp(&(b.block_number, b.log_index)));
        transfers.dedup_by(|a, b| a.id == b.id);
        Ok(transfers)
    }

    // ─── Reorg repair ────────────────────────────────────────────────────────

    async fn rollback(
        &mut self,
        checkpoint: &Checkpoint,
        next: u64,
        stored_hash: &str,
        fetched_parent: &str,
    ) -> Result<CycleOutcome, IndexerError> {
        let chain_id = self.config.chain_id.clone();
        let mut target = next - 1;
        if self.last_rollback == Some(target) {
            target = target.saturating_sub(1);
        }

        let mut reset = Checkpoint::new(
            chain_id.clone(),
            checkpoint.start_block,
            target.saturating_sub(self.config.confirmations),
        );
        if target >= checkpoint.start_block {
            reset.last_indexed_block = Some(target);
            reset.last_indexed_hash = self.store.block_hash(&chain_id, target).await?;
        }

        self.store.rollback_after(&chain_id, target, &reset).await?;
        self.last_rollback = Some(target);

        tracing::warn!(
            chain = %chain_id,
            block = next,
            expected = %stored_hash,
            actual = %fetched_parent,
            rollback_to = target,
            "Reorg detected; rolled back stored history"
        );
        Ok(CycleOutcome::Reorg { rollback_to: target })
    }

    // ─── Health ──────────────────────────────────────────────────────────────

    async fn maybe_log_health(&mut self) {
        let now = Instant::now();
        if self
            .last_health_log
            .is_some_and(|at| now.duration_since(at) < self.config.health_log_interval)
        {
            return;
        }
        self.last_health_log = Some(now);

        let chain_id = &self.config.chain_id;
        let checkpoint = self.store.load_checkpoint(chain_id).await;
        let blocks = self.store.count_blocks(chain_id).await;
        let transfers = self.store.count_transfers(chain_id).await;
        match (checkpoint, blocks, transfers) {
            (Ok(cp), Ok(blocks), Ok(transfers)) => tracing::info!(
                chain = %chain_id,
                last_indexed = ?cp.as_ref().and_then(|c| c.last_indexed_block),
                safe = ?cp.as_ref().map(|c| c.safe_block_number),
                stored_blocks = blocks,
                stored_transfers = transfers,
                "Indexer health"
            ),
            (Err(err), _, _) | (_, Err(err), _) | (_, _, Err(err)) => {
                tracing::warn!(chain = %chain_id, error = %err, "Indexer health check failed")
            }
        }
    }
}
