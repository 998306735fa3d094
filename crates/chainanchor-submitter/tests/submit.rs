//! Submitter behaviour against the in-memory store and a scripted ledger.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy_primitives::U256;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use chainanchor_core::error::IndexerError;
use chainanchor_core::reward::RewardPolicy;
use chainanchor_core::store::{BatchCommit, LedgerStore, SeekRequest};
use chainanchor_core::types::{
    Attestation, AttestationStatus, BatchRecord, BatchStatus, Checkpoint, IndexedBatch, Transfer,
};
use chainanchor_observability::PipelineMetrics;
use chainanchor_storage::InMemoryLedger;
use chainanchor_submitter::{
    BatchSubmitter, ProofReceipt, ProofSubmission, SettlementLedger, SubmitError, SubmitterConfig,
    SubmittedProof, TickReport,
};

const CHAIN: &str = "sepolia";
const PROVER: &str = "0x1111111111111111111111111111111111111111";

// ─── Scripted ledger ─────────────────────────────────────────────────────────

#[derive(Clone, Copy)]
enum Script {
    Confirm,
    Revert,
    Hang,
}

struct MockLedger {
    script: Script,
    sent: Mutex<Vec<ProofSubmission>>,
    delay: Duration,
}

impl MockLedger {
    fn new(script: Script) -> Arc<Self> {
        Arc::new(Self { script, sent: Mutex::new(vec![]), delay: Duration::ZERO })
    }

    fn slow(script: Script, delay: Duration) -> Arc<Self> {
        Arc::new(Self { script, sent: Mutex::new(vec![]), delay })
    }

    fn sent(&self) -> Vec<ProofSubmission> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl SettlementLedger for MockLedger {
    async fn submit_proof(&self, submission: &ProofSubmission) -> Result<SubmittedProof, SubmitError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let n = {
            let mut sent = self.sent.lock().unwrap();
            sent.push(submission.clone());
            sent.len()
        };
        Ok(SubmittedProof { tx_hash: format!("0xtx{n}") })
    }

    async fn wait_for_confirmations(
        &self,
        submitted: &SubmittedProof,
        confirmations: u64,
    ) -> Result<ProofReceipt, SubmitError> {
        match self.script {
            Script::Confirm => Ok(ProofReceipt {
                tx_hash: submitted.tx_hash.clone(),
                block_number: 500,
                confirmations,
            }),
            Script::Revert => Err(SubmitError::Reverted { tx_hash: submitted.tx_hash.clone() }),
            Script::Hang => std::future::pending().await,
        }
    }
}

// ─── Store that fails for one batch ─────────────────────────────────────────

struct PoisonedStore {
    inner: InMemoryLedger,
    poisoned: String,
}

impl PoisonedStore {
    fn check(&self, batch_id: &str) -> Result<(), IndexerError> {
        if batch_id == self.poisoned {
            return Err(IndexerError::Storage(format!("row {batch_id} is unreadable")));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for PoisonedStore {
    async fn load_checkpoint(&self, chain_id: &str) -> Result<Option<Checkpoint>, IndexerError> {
        self.inner.load_checkpoint(chain_id).await
    }

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), IndexerError> {
        self.inner.save_checkpoint(checkpoint).await
    }

    async fn block_hash(&self, chain_id: &str, number: u64) -> Result<Option<String>, IndexerError> {
        self.inner.block_hash(chain_id, number).await
    }

    async fn commit_batch(&self, commit: BatchCommit) -> Result<(), IndexerError> {
        self.inner.commit_batch(commit).await
    }

    async fn rollback_after(&self, chain_id: &str, block: u64, checkpoint: &Checkpoint) -> Result<(), IndexerError> {
        self.inner.rollback_after(chain_id, block, checkpoint).await
    }

    async fn count_blocks(&self, chain_id: &str) -> Result<u64, IndexerError> {
        self.inner.count_blocks(chain_id).await
    }

    async fn count_transfers(&self, chain_id: &str) -> Result<u64, IndexerError> {
        self.inner.count_transfers(chain_id).await
    }

    async fn seek_transfers(&self, request: &SeekRequest) -> Result<Vec<Transfer>, IndexerError> {
        self.inner.seek_transfers(request).await
    }

    async fn get_batch(&self, chain_id: &str, batch_id: &str) -> Result<Option<IndexedBatch>, IndexerError> {
        self.inner.get_batch(chain_id, batch_id).await
    }

    async fn recent_batches(&self, chain_id: &str, limit: usize) -> Result<Vec<IndexedBatch>, IndexerError> {
        self.inner.recent_batches(chain_id, limit).await
    }

    async fn submittable_batches(&self, chain_id: &str, limit: usize) -> Result<Vec<IndexedBatch>, IndexerError> {
        self.inner.submittable_batches(chain_id, limit).await
    }

    async fn assign_prover(
        &self,
        chain_id: &str,
        batch_id: &str,
        prover: &str,
        sql_statement: Option<&str>,
    ) -> Result<bool, IndexerError> {
        self.inner.assign_prover(chain_id, batch_id, prover, sql_statement).await
    }

    async fn set_batch_status(&self, chain_id: &str, batch_id: &str, status: BatchStatus) -> Result<(), IndexerError> {
        self.inner.set_batch_status(chain_id, batch_id, status).await
    }

    async fn claim_batch(&self, chain_id: &str, batch_id: &str, at: DateTime<Utc>) -> Result<u64, IndexerError> {
        self.inner.claim_batch(chain_id, batch_id, at).await
    }

    async fn mark_confirmed(
        &self,
        chain_id: &str,
        batch_id: &str,
        tx_hash: &str,
        reward: &str,
        at: DateTime<Utc>,
    ) -> Result<(), IndexerError> {
        self.inner.mark_confirmed(chain_id, batch_id, tx_hash, reward, at).await
    }

    async fn mark_failed(
        &self,
        chain_id: &str,
        batch_id: &str,
        error: &str,
        reward: Option<&str>,
    ) -> Result<(), IndexerError> {
        self.inner.mark_failed(chain_id, batch_id, error, reward).await
    }

    async fn record_attestation(&self, attestation: &Attestation) -> Result<(), IndexerError> {
        self.inner.record_attestation(attestation).await
    }

    async fn count_valid_attestations(&self, chain_id: &str, batch_id: &str) -> Result<u64, IndexerError> {
        self.check(batch_id)?;
        self.inner.count_valid_attestations(chain_id, batch_id).await
    }
}

// ─── Fixtures ────────────────────────────────────────────────────────────────

fn record(start: u64, end: u64, transfers: u64) -> BatchRecord {
    BatchRecord {
        id: BatchRecord::make_id(CHAIN, start, end),
        start_block: start,
        end_block: end,
        merkle_root: format!("0x{}", "cd".repeat(32)),
        leaf_count: transfers,
        safe_block_number: end + 6,
        total_blocks: end - start + 1,
        total_transactions: transfers,
        total_transfers: transfers,
    }
}

/// Persist batch `start..=end` with a prover and `valid` valid attestations.
async fn seed(store: &InMemoryLedger, start: u64, end: u64, transfers: u64, valid: usize) -> String {
    let batch = record(start, end, transfers);
    let id = batch.id.clone();
    let mut checkpoint = Checkpoint::new(CHAIN, 0, end + 6);
    checkpoint.last_indexed_block = Some(end);
    store
        .commit_batch(BatchCommit {
            chain_id: CHAIN.into(),
            blocks: vec![],
            transactions: vec![],
            transfers: vec![],
            batch,
            checkpoint,
        })
        .await
        .unwrap();
    assert!(store.assign_prover(CHAIN, &id, PROVER, Some("SELECT 1")).await.unwrap());
    for i in 0..valid {
        attest(store, &id, &format!("0x{:040x}", i + 1), AttestationStatus::Valid).await;
    }
    id
}

async fn attest(store: &InMemoryLedger, batch_id: &str, attestor: &str, status: AttestationStatus) {
    store
        .record_attestation(&Attestation {
            chain_id: CHAIN.into(),
            batch_id: batch_id.into(),
            attestor: attestor.into(),
            status,
            merkle_root: format!("0x{}", "cd".repeat(32)),
            signature: "0xsig".into(),
        })
        .await
        .unwrap();
}

fn config() -> SubmitterConfig {
    SubmitterConfig {
        chain_id: CHAIN.into(),
        enabled: true,
        min_valid_attestations: 2,
        submission_timeout: Duration::from_secs(30),
        ..Default::default()
    }
}

fn policy() -> RewardPolicy {
    RewardPolicy::new(U256::from(100), U256::from(10), Some(U256::from(150)))
}

fn submitter(
    config: SubmitterConfig,
    store: Arc<InMemoryLedger>,
    ledger: Option<Arc<MockLedger>>,
) -> BatchSubmitter {
    BatchSubmitter::new(
        config,
        store,
        ledger.map(|l| l as Arc<dyn SettlementLedger>),
        policy(),
        PipelineMetrics::global(),
    )
    .unwrap()
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn live_submitter_requires_a_ledger() {
    let store = Arc::new(InMemoryLedger::new());
    let result = BatchSubmitter::new(config(), store, None, policy(), PipelineMetrics::global());
    assert!(matches!(result, Err(SubmitError::NotConfigured)));
}

#[tokio::test]
async fn below_quorum_is_parked_as_not_ready() {
    let store = Arc::new(InMemoryLedger::new());
    let id = seed(&store, 1, 10, 3, 1).await;
    attest(&store, &id, "0x00000000000000000000000000000000000000ff", AttestationStatus::Invalid).await;
    store.set_batch_status(CHAIN, &id, BatchStatus::Failed).await.unwrap();

    let ledger = MockLedger::new(Script::Confirm);
    let report = submitter(config(), store.clone(), Some(ledger.clone())).tick().await.unwrap();

    assert_eq!(report.below_quorum, 1);
    assert!(ledger.sent().is_empty());
    let batch = store.get_batch(CHAIN, &id).await.unwrap().unwrap();
    assert_eq!(batch.onchain_status, BatchStatus::NotReady);
}

#[tokio::test]
async fn attestor_casing_does_not_double_count() {
    let store = Arc::new(InMemoryLedger::new());
    let id = seed(&store, 1, 10, 3, 0).await;
    attest(&store, &id, "0x00000000000000000000000000000000000000AB", AttestationStatus::Valid).await;
    attest(&store, &id, "0x00000000000000000000000000000000000000ab", AttestationStatus::Valid).await;

    let ledger = MockLedger::new(Script::Confirm);
    let report = submitter(config(), store, Some(ledger.clone())).tick().await.unwrap();
    assert_eq!(report.below_quorum, 1);
    assert!(ledger.sent().is_empty());
}

#[tokio::test]
async fn dry_run_changes_nothing() {
    let store = Arc::new(InMemoryLedger::new());
    let id = seed(&store, 1, 10, 3, 2).await;

    let cfg = SubmitterConfig { dry_run: true, ..config() };
    let report = submitter(cfg, store.clone(), None).tick().await.unwrap();

    assert_eq!(report, TickReport { examined: 1, dry_run: 1, ..Default::default() });
    let batch = store.get_batch(CHAIN, &id).await.unwrap().unwrap();
    assert_eq!(batch.onchain_status, BatchStatus::NotReady);
    assert!(batch.last_submission_attempt.is_none());
}

#[tokio::test]
async fn confirmed_submission_records_tx_and_reward() {
    let store = Arc::new(InMemoryLedger::new());
    let small = seed(&store, 1, 10, 3, 2).await;
    let large = seed(&store, 11, 20, 40, 2).await;

    let ledger = MockLedger::new(Script::Confirm);
    let report = submitter(config(), store.clone(), Some(ledger.clone())).tick().await.unwrap();
    assert_eq!(report.confirmed, 2);

    // Oldest first.
    let sent = ledger.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].safe_block_number, 16);
    assert_eq!(sent[0].reward, U256::from(130));

    let small = store.get_batch(CHAIN, &small).await.unwrap().unwrap();
    assert_eq!(small.onchain_status, BatchStatus::Confirmed);
    assert_eq!(small.onchain_tx_hash.as_deref(), Some("0xtx1"));
    assert_eq!(small.reward_amount.as_deref(), Some("130"));
    assert!(small.onchain_submitted_at.is_some());
    assert!(small.onchain_error.is_none());

    // Capped.
    let large = store.get_batch(CHAIN, &large).await.unwrap().unwrap();
    assert_eq!(large.reward_amount.as_deref(), Some("150"));

    // Nothing left to do.
    let again = submitter(config(), store, Some(ledger.clone())).tick().await.unwrap();
    assert_eq!(again.examined, 0);
    assert_eq!(ledger.sent().len(), 2);
}

#[tokio::test]
async fn reverted_submission_is_marked_failed_and_retried() {
    let store = Arc::new(InMemoryLedger::new());
    let id = seed(&store, 1, 10, 3, 2).await;

    let failing = MockLedger::new(Script::Revert);
    let report = submitter(config(), store.clone(), Some(failing)).tick().await.unwrap();
    assert_eq!(report.failed, 1);

    let batch = store.get_batch(CHAIN, &id).await.unwrap().unwrap();
    assert_eq!(batch.onchain_status, BatchStatus::Failed);
    assert!(batch.onchain_error.as_deref().unwrap_or_default().contains("reverted"));
    assert_eq!(batch.reward_amount.as_deref(), Some("130"));
    assert!(batch.last_submission_attempt.is_some());

    // FAILED is claimable again.
    let working = MockLedger::new(Script::Confirm);
    let report = submitter(config(), store.clone(), Some(working)).tick().await.unwrap();
    assert_eq!(report.confirmed, 1);
    let batch = store.get_batch(CHAIN, &id).await.unwrap().unwrap();
    assert_eq!(batch.onchain_status, BatchStatus::Confirmed);
}

#[tokio::test(start_paused = true)]
async fn stalled_confirmation_times_out() {
    let store = Arc::new(InMemoryLedger::new());
    let id = seed(&store, 1, 10, 3, 2).await;

    let report = submitter(config(), store.clone(), Some(MockLedger::new(Script::Hang)))
        .tick()
        .await
        .unwrap();
    assert_eq!(report.failed, 1);

    let batch = store.get_batch(CHAIN, &id).await.unwrap().unwrap();
    assert_eq!(batch.onchain_status, BatchStatus::Failed);
    assert!(batch.onchain_error.as_deref().unwrap_or_default().contains("timed out"));
}

#[tokio::test]
async fn store_error_on_one_batch_does_not_block_the_rest() {
    let inner = InMemoryLedger::new();
    let bad = seed(&inner, 1, 10, 3, 2).await;
    let good = seed(&inner, 11, 20, 3, 2).await;
    let store = Arc::new(PoisonedStore { inner, poisoned: bad.clone() });

    let ledger = MockLedger::new(Script::Confirm);
    let submitter = BatchSubmitter::new(
        config(),
        store.clone(),
        Some(ledger.clone() as Arc<dyn SettlementLedger>),
        policy(),
        PipelineMetrics::global(),
    )
    .unwrap();

    let report = submitter.tick().await.unwrap();
    assert_eq!(report, TickReport { examined: 2, confirmed: 1, errored: 1, ..Default::default() });
    assert_eq!(ledger.sent().len(), 1);

    let good = store.get_batch(CHAIN, &good).await.unwrap().unwrap();
    assert_eq!(good.onchain_status, BatchStatus::Confirmed);
    let bad = store.get_batch(CHAIN, &bad).await.unwrap().unwrap();
    assert_eq!(bad.onchain_status, BatchStatus::NotReady);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_submitters_send_each_batch_once() {
    let store = Arc::new(InMemoryLedger::new());
    for i in 0..5u64 {
        seed(&store, i * 10 + 1, i * 10 + 10, 3, 2).await;
    }

    let ledger = MockLedger::slow(Script::Confirm, Duration::from_millis(20));
    let confirmed = Arc::new(AtomicUsize::new(0));
    let mut tasks = Vec::new();
    for _ in 0..4 {
        let submitter = submitter(config(), store.clone(), Some(ledger.clone()));
        let confirmed = confirmed.clone();
        tasks.push(tokio::spawn(async move {
            let report = submitter.tick().await.unwrap();
            confirmed.fetch_add(report.confirmed, Ordering::SeqCst);
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(confirmed.load(Ordering::SeqCst), 5);
    assert_eq!(ledger.sent().len(), 5);
    let batches = store.batches(CHAIN);
    assert!(batches.iter().all(|b| b.onchain_status == BatchStatus::Confirmed));
}

#[tokio::test]
async fn disabled_submitter_returns_immediately() {
    let store = Arc::new(InMemoryLedger::new());
    seed(&store, 1, 10, 3, 2).await;

    let cfg = SubmitterConfig { enabled: false, ..config() };
    submitter(cfg, store.clone(), None).run().await.unwrap();
    assert_eq!(store.batches(CHAIN)[0].onchain_status, BatchStatus::NotReady);
}

#[tokio::test(start_paused = true)]
async fn stop_interrupts_the_wait_between_ticks() {
    let store = Arc::new(InMemoryLedger::new());
    let submitter = Arc::new(submitter(config(), store, Some(MockLedger::new(Script::Confirm))));
    let handle = submitter.handle();

    let task = tokio::spawn({
        let submitter = submitter.clone();
        async move { submitter.run().await }
    });
    tokio::time::sleep(Duration::from_secs(1)).await;
    handle.stop();

    // Well inside the 15s interval.
    let joined = tokio::time::timeout(Duration::from_secs(2), task).await;
    assert!(joined.unwrap().unwrap().is_ok());
    assert!(handle.is_stopped());
}
