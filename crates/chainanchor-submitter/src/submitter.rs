//! Quorum-gated batch submission.
//!
//! ```text
//!            claim (conditional update)           confirmations reached
//! NOT_READY ─────────────────────────► PENDING ─────────────────────► CONFIRMED
//!     ▲  ▲                                │
//!     │  └──── below quorum ────── FAILED ◄┘ submit error / revert / timeout
//!     └──────────── below quorum ──────┘
//! ```
//!
//! The conditional claim is the only mutual exclusion: any number of
//! submitters may share a store and each batch is sent at most once per
//! claim.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::U256;
use chrono::Utc;
use tokio::sync::Notify;

use chainanchor_core::reward::RewardPolicy;
use chainanchor_core::store::LedgerStore;
use chainanchor_core::types::{BatchStatus, IndexedBatch};
use chainanchor_observability::PipelineMetrics;

use crate::error::SubmitError;
use crate::ledger::{ProofReceipt, ProofSubmission, SettlementLedger};

/// Configuration for the batch submitter.
#[derive(Debug, Clone)]
pub struct SubmitterConfig {
    pub chain_id: String,
    pub enabled: bool,
    /// Log what would be submitted; touch neither the store nor the ledger.
    pub dry_run: bool,
    pub interval: Duration,
    /// Batches examined per tick.
    pub batch_limit: usize,
    pub min_valid_attestations: u64,
    pub tx_confirmations: u64,
    /// Bounds sending plus waiting for confirmations.
    pub submission_timeout: Duration,
}

impl Default for SubmitterConfig {
    fn default() -> Self {
        Self {
            chain_id: "sepolia".into(),
            enabled: false,
            dry_run: false,
            interval: Duration::from_secs(15),
            batch_limit: 10,
            min_valid_attestations: 1,
            tx_confirmations: 1,
            submission_timeout: Duration::from_secs(180),
        }
    }
}

/// Counts of what one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub examined: usize,
    pub below_quorum: usize,
    pub dry_run: usize,
    /// Claimed by someone else first.
    pub skipped: usize,
    pub confirmed: usize,
    pub failed: usize,
    /// Left as they were after a store error.
    pub errored: usize,
}

/// Stops a running submitter once its current tick is done.
#[derive(Debug, Clone)]
pub struct SubmitterHandle {
    stop: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl SubmitterHandle {
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

pub struct BatchSubmitter {
    config: SubmitterConfig,
    store: Arc<dyn LedgerStore>,
    ledger: Option<Arc<dyn SettlementLedger>>,
    policy: RewardPolicy,
    metrics: PipelineMetrics,
    stop: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl BatchSubmitter {
    /// A live (enabled, non-dry-run) submitter needs a ledger.
    pub fn new(
        config: SubmitterConfig,
        store: Arc<dyn LedgerStore>,
        ledger: Option<Arc<dyn SettlementLedger>>,
        policy: RewardPolicy,
        metrics: PipelineMetrics,
    ) -> Result<Self, SubmitError> {
        if config.enabled && !config.dry_run && ledger.is_none() {
            return Err(SubmitError::NotConfigured);
        }
        Ok(Self {
            config,
            store,
            ledger,
            policy,
            metrics,
            stop: Arc::new(AtomicBool::new(false)),
            wake: Arc::new(Notify::new()),
        })
    }

    pub fn config(&self) -> &SubmitterConfig {
        &self.config
    }

    pub fn handle(&self) -> SubmitterHandle {
        SubmitterHandle {
            stop: Arc::clone(&self.stop),
            wake: Arc::clone(&self.wake),
        }
    }

    /// Tick every `interval` until stopped. A failed tick is logged and the
    /// loop carries on. Stopping never interrupts a tick, only the wait
    /// between ticks.
    pub async fn run(&self) -> Result<(), SubmitError> {
        if !self.config.enabled {
            tracing::info!(chain = %self.config.chain_id, "Batch submitter disabled");
            return Ok(());
        }
        tracing::info!(
            chain = %self.config.chain_id,
            interval_ms = self.config.interval.as_millis() as u64,
            batch_limit = self.config.batch_limit,
            dry_run = self.config.dry_run,
            "Batch submitter started"
        );

        while !self.stop.load(Ordering::SeqCst) {
            if let Err(err) = self.tick().await {
                tracing::error!(chain = %self.config.chain_id, error = %err, "Submitter tick failed");
            }
            tokio::select! {
                _ = tokio::time::sleep(self.config.interval) => {}
                _ = self.wake.notified() => {}
            }
        }
        tracing::info!(chain = %self.config.chain_id, "Batch submitter stopped");
        Ok(())
    }

    /// Process up to `batch_limit` claimable batches, oldest first. A store
    /// error on one batch is logged and the rest of the tick goes on.
    pub async fn tick(&self) -> Result<TickReport, SubmitError> {
        let candidates = self
            .store
            .submittable_batches(&self.config.chain_id, self.config.batch_limit)
            .await?;

        let mut report = TickReport::default();
        if candidates.is_empty() {
            tracing::debug!(chain = %self.config.chain_id, "No batches ready for submission");
            return Ok(report);
        }

        for batch in &candidates {
            report.examined += 1;
            if let Err(err) = self.process(batch, &mut report).await {
                tracing::error!(batch = %batch.id(), error = %err, "Failed to process batch");
                report.errored += 1;
            }
        }
        Ok(report)
    }

    async fn process(&self, batch: &IndexedBatch, report: &mut TickReport) -> Result<(), SubmitError> {
        let chain_id = &self.config.chain_id;
        let batch_id = batch.id();

        let valid = self.store.count_valid_attestations(chain_id, batch_id).await?;
        if valid < self.config.min_valid_attestations {
            if batch.onchain_status != BatchStatus::NotReady {
                self.store
                    .set_batch_status(chain_id, batch_id, BatchStatus::NotReady)
                    .await?;
            }
            tracing::info!(
                batch = %batch_id,
                valid_attestations = valid,
                min_required = self.config.min_valid_attestations,
                "Skipping batch with insufficient valid attestations"
            );
            report.below_quorum += 1;
            return Ok(());
        }

        let reward = self.policy.reward(batch.record.total_transfers);

        if self.config.dry_run {
            tracing::info!(
                batch = %batch_id,
                prover = ?batch.prover_address,
                merkle_root = %batch.record.merkle_root,
                sql_statement = ?batch.sql_statement,
                safe_block = batch.record.safe_block_number,
                attestations = valid,
                reward = %reward,
                "Dry run: would submit proof"
            );
            report.dry_run += 1;
            return Ok(());
        }

        if self.store.claim_batch(chain_id, batch_id, Utc::now()).await? == 0 {
            tracing::debug!(batch = %batch_id, "Batch already claimed by another submitter");
            report.skipped += 1;
            return Ok(());
        }

        let Some(prover) = batch.prover_address.as_deref() else {
            self.store
                .mark_failed(chain_id, batch_id, "missing prover address", None)
                .await?;
            tracing::warn!(batch = %batch_id, "Skipping batch without prover address");
            report.failed += 1;
            return Ok(());
        };

        let reward_str = reward.to_string();
        match self.submit(batch, prover, reward).await {
            Ok(receipt) => {
                self.store
                    .mark_confirmed(chain_id, batch_id, &receipt.tx_hash, &reward_str, Utc::now())
                    .await?;
                self.metrics.record_submission("ok");
                tracing::info!(
                    batch = %batch_id,
                    tx_hash = %receipt.tx_hash,
                    block = receipt.block_number,
                    reward = %reward_str,
                    safe_block = batch.record.safe_block_number,
                    "Submitted proof on-chain"
                );
                report.confirmed += 1;
            }
            Err(err) => {
                self.store
                    .mark_failed(chain_id, batch_id, &err.to_string(), Some(&reward_str))
                    .await?;
                self.metrics.record_submission("error");
                tracing::error!(
                    batch = %batch_id,
                    reward = %reward_str,
                    error = %err,
                    "Failed to submit proof on-chain"
                );
                report.failed += 1;
            }
        }
        Ok(())
    }

    async fn submit(&self, batch: &IndexedBatch, prover: &str, reward: U256) -> Result<ProofReceipt, SubmitError> {
        let ledger = self.ledger.as_ref().ok_or(SubmitError::NotConfigured)?;
        let submission = ProofSubmission::for_batch(batch, prover, reward)?;
        let timeout = self.config.submission_timeout;

        tokio::time::timeout(timeout, async {
            let submitted = ledger.submit_proof(&submission).await?;
            tracing::debug!(batch = %batch.id(), tx_hash = %submitted.tx_hash, "Waiting for confirmations");
            ledger
                .wait_for_confirmations(&submitted, self.config.tx_confirmations)
                .await
        })
        .await
        .map_err(|_| SubmitError::Timeout { after_ms: timeout.as_millis() as u64 })?
    }
}
