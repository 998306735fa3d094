//! In-memory ledger store.
//!
//! All state sits behind one mutex, so every trait method is atomic.
//! Useful for tests and short-lived runs that don't need persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use chainanchor_core::error::IndexerError;
use chainanchor_core::query::Direction;
use chainanchor_core::store::{BatchCommit, LedgerStore, SeekRequest};
use chainanchor_core::types::{
    Attestation, AttestationStatus, BatchStatus, BlockSummary, Checkpoint, IndexedBatch,
    TransactionRecord, Transfer,
};

#[derive(Default)]
struct ChainLedger {
    checkpoint: Option<Checkpoint>,
    blocks: BTreeMap<u64, BlockSummary>,
    transactions: HashMap<String, TransactionRecord>,
    transfers: HashMap<String, Transfer>,
    batches: HashMap<String, IndexedBatch>,
    /// Keyed by (batch id, attestor).
    attestations: HashMap<(String, String), Attestation>,
}

impl ChainLedger {
    fn batch_mut(&mut self, batch_id: &str) -> Result<&mut IndexedBatch, IndexerError> {
        self.batches
            .get_mut(batch_id)
            .ok_or_else(|| IndexerError::Storage(format!("batch {batch_id} not found")))
    }
}

/// In-memory ledger store. All data is lost when the process exits.
#[derive(Default)]
pub struct InMemoryLedger {
    chains: Mutex<HashMap<String, ChainLedger>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_chain<R>(&self, chain_id: &str, f: impl FnOnce(&mut ChainLedger) -> R) -> R {
        let mut chains = self.chains.lock().unwrap();
        f(chains.entry(chain_id.to_string()).or_default())
    }

    /// Stored blocks in ascending order.
    pub fn blocks(&self, chain_id: &str) -> Vec<BlockSummary> {
        self.with_chain(chain_id, |c| c.blocks.values().cloned().collect())
    }

    /// Stored transfers in `(block, log index)` order.
    pub fn transfers(&self, chain_id: &str) -> Vec<Transfer> {
        self.with_chain(chain_id, |c| {
            let mut all: Vec<_> = c.transfers.values().cloned().collect();
            all.sort_by(|a, b| (a.block_number, a.log_index).cmp(&(b.block_number, b.log_index)));
            all
        })
    }

    pub fn transaction_count(&self, chain_id: &str) -> usize {
        self.with_chain(chain_id, |c| c.transactions.len())
    }

    /// Stored batches ordered by start block.
    pub fn batches(&self, chain_id: &str) -> Vec<IndexedBatch> {
        self.with_chain(chain_id, |c| {
            let mut all: Vec<_> = c.batches.values().cloned().collect();
            all.sort_by_key(|b| b.record.start_block);
            all
        })
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn load_checkpoint(&self, chain_id: &str) -> Result<Option<Checkpoint>, IndexerError> {
        Ok(self.with_chain(chain_id, |c| c.checkpoint.clone()))
    }

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), IndexerError> {
        self.with_chain(&checkpoint.chain_id, |c| c.checkpoint = Some(checkpoint.clone()));
        Ok(())
    }

    async fn block_hash(&self, chain_id: &str, number: u64) -> Result<Option<String>, IndexerError> {
        Ok(self.with_chain(chain_id, |c| c.blocks.get(&number).map(|b| b.hash.clone())))
    }

    async fn commit_batch(&self, commit: BatchCommit) -> Result<(), IndexerError> {
        let BatchCommit {
            chain_id,
            blocks,
            transactions,
            transfers,
            batch,
            checkpoint,
        } = commit;

        self.with_chain(&chain_id, |c| {
            for block in blocks {
                let n = block.number;
                c.transactions.retain(|_, tx| tx.block_number != n);
                c.transfers.retain(|_, t| t.block_number != n);
                c.blocks.insert(n, block);
            }
            for tx in transactions {
                c.transactions.entry(tx.hash.clone()).or_insert(tx);
            }
            for transfer in transfers {
                c.transfers.entry(transfer.id.clone()).or_insert(transfer);
            }
            match c.batches.get_mut(&batch.id) {
                Some(existing) => existing.record = batch,
                None => {
                    let id = batch.id.clone();
                    c.batches.insert(id, IndexedBatch::new(chain_id.clone(), batch, Utc::now()));
                }
            }
            c.checkpoint = Some(checkpoint);
        });
        Ok(())
    }

    async fn rollback_after(
        &self,
        chain_id: &str,
        block: u64,
        checkpoint: &Checkpoint,
    ) -> Result<(), IndexerError> {
        self.with_chain(chain_id, |c| {
            c.batches.retain(|_, b| b.record.end_block <= block);
            c.blocks.retain(|n, _| *n <= block);
            c.transactions.retain(|_, tx| tx.block_number <= block);
            c.transfers.retain(|_, t| t.block_number <= block);
            c.checkpoint = Some(checkpoint.clone());
        });
        Ok(())
    }

    async fn count_blocks(&self, chain_id: &str) -> Result<u64, IndexerError> {
        Ok(self.with_chain(chain_id, |c| c.blocks.len() as u64))
    }

    async fn count_transfers(&self, chain_id: &str) -> Result<u64, IndexerError> {
        Ok(self.with_chain(chain_id, |c| c.transfers.len() as u64))
    }

    async fn seek_transfers(&self, request: &SeekRequest) -> Result<Vec<Transfer>, IndexerError> {
        Ok(self.with_chain(&request.chain_id, |c| {
            let mut hits: Vec<Transfer> = c
                .transfers
                .values()
                .filter(|t| {
                    let ts = c.blocks.get(&t.block_number).map(|b| b.timestamp);
                    request.matches(t, ts)
                })
                .cloned()
                .collect();
            hits.sort_by(|a, b| {
                let ka = (a.block_number, a.log_index, a.id.as_str());
                let kb = (b.block_number, b.log_index, b.id.as_str());
                match request.direction {
                    Direction::Asc => ka.cmp(&kb),
                    Direction::Desc => kb.cmp(&ka),
                }
            });
            hits.truncate(request.limit);
            hits
        }))
    }

    async fn get_batch(&self, chain_id: &str, batch_id: &str) -> Result<Option<IndexedBatch>, IndexerError> {
        Ok(self.with_chain(chain_id, |c| c.batches.get(batch_id).cloned()))
    }

    async fn recent_batches(&self, chain_id: &str, limit: usize) -> Result<Vec<IndexedBatch>, IndexerError> {
        let mut all = self.batches(chain_id);
        all.reverse();
        all.truncate(limit);
        Ok(all)
    }

    async fn submittable_batches(&self, chain_id: &str, limit: usize) -> Result<Vec<IndexedBatch>, IndexerError> {
        Ok(self.with_chain(chain_id, |c| {
            let mut ready: Vec<IndexedBatch> = c
                .batches
                .values()
                .filter(|b| b.prover_address.is_some() && b.onchain_status.is_claimable())
                .cloned()
                .collect();
            ready.sort_by_key(|b| (b.created_at, b.record.start_block));
            ready.truncate(limit);
            ready
        }))
    }

    async fn assign_prover(
        &self,
        chain_id: &str,
        batch_id: &str,
        prover: &str,
        sql_statement: Option<&str>,
    ) -> Result<bool, IndexerError> {
        Ok(self.with_chain(chain_id, |c| match c.batches.get_mut(batch_id) {
            Some(batch) => {
                batch.prover_address = Some(prover.to_string());
                batch.sql_statement = sql_statement.map(str::to_string);
                true
            }
            None => false,
        }))
    }

    async fn set_batch_status(&self, chain_id: &str, batch_id: &str, status: BatchStatus) -> Result<(), IndexerError> {
        self.with_chain(chain_id, |c| {
            c.batch_mut(batch_id)?.onchain_status = status;
            Ok(())
        })
    }

    async fn claim_batch(&self, chain_id: &str, batch_id: &str, at: DateTime<Utc>) -> Result<u64, IndexerError> {
        Ok(self.with_chain(chain_id, |c| match c.batches.get_mut(batch_id) {
            Some(batch) if batch.onchain_status.is_claimable() => {
                batch.onchain_status = BatchStatus::Pending;
                batch.last_submission_attempt = Some(at);
                1
            }
            _ => 0,
        }))
    }

    async fn mark_confirmed(
        &self,
        chain_id: &str,
        batch_id: &str,
        tx_hash: &str,
        reward: &str,
        at: DateTime<Utc>,
    ) -> Result<(), IndexerError> {
        self.with_chain(chain_id, |c| {
            let batch = c.batch_mut(batch_id)?;
            batch.onchain_status = BatchStatus::Confirmed;
            batch.onchain_tx_hash = Some(tx_hash.to_string());
            batch.reward_amount = Some(reward.to_string());
            batch.onchain_submitted_at = Some(at);
            batch.onchain_error = None;
            Ok(())
        })
    }

    async fn mark_failed(
        &self,
        chain_id: &str,
        batch_id: &str,
        error: &str,
        reward: Option<&str>,
    ) -> Result<(), IndexerError> {
        self.with_chain(chain_id, |c| {
            let batch = c.batch_mut(batch_id)?;
            batch.onchain_status = BatchStatus::Failed;
            batch.onchain_error = Some(error.to_string());
            if let Some(reward) = reward {
                batch.reward_amount = Some(reward.to_string());
            }
            Ok(())
        })
    }

    async fn record_attestation(&self, attestation: &Attestation) -> Result<(), IndexerError> {
        self.with_chain(&attestation.chain_id, |c| {
            let key = (attestation.batch_id.clone(), attestation.attestor.to_lowercase());
            c.attestations.insert(key, attestation.clone());
        });
        Ok(())
    }

    async fn count_valid_attestations(&self, chain_id: &str, batch_id: &str) -> Result<u64, IndexerError> {
        Ok(self.with_chain(chain_id, |c| {
            c.attestations
                .values()
                .filter(|a| a.batch_id == batch_id && a.status == AttestationStatus::Valid)
                .count() as u64
        }))
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chainanchor_core::query::{list_transfers, TransferQuery};
    use chainanchor_core::types::BatchRecord;

    const CHAIN: &str = "sepolia";

    fn block(n: u64) -> BlockSummary {
        BlockSummary {
            number: n,
            hash: format!("0xh{n}"),
            parent_hash: format!("0xh{}", n.saturating_sub(1)),
            timestamp: 1_000 + n as i64,
            tx_count: 1,
        }
    }

    fn transfer(block: u64, log_index: u64, value: u64) -> Transfer {
        Transfer::new(format!("0xt{block}"), log_index, block, "0xtoken", "0xalice", "0xbob", value.to_string())
    }

    fn commit(start: u64, end: u64, per_block: u64) -> BatchCommit {
        let blocks: Vec<_> = (start..=end).map(block).collect();
        let transfers: Vec<_> = (start..=end)
            .flat_map(|b| (0..per_block).map(move |i| transfer(b, i, b * 10 + i)))
            .collect();
        let transactions = (start..=end)
            .map(|b| TransactionRecord {
                hash: format!("0xt{b}"),
                block_number: b,
                transaction_index: 0,
                from: "0xalice".into(),
                to: Some("0xtoken".into()),
                value: "0".into(),
            })
            .collect();
        let mut checkpoint = Checkpoint::new(CHAIN, start, end);
        checkpoint.last_indexed_block = Some(end);
        checkpoint.last_indexed_hash = Some(format!("0xh{end}"));
        BatchCommit {
            chain_id: CHAIN.into(),
            blocks,
            transactions,
            batch: BatchRecord {
                id: BatchRecord::make_id(CHAIN, start, end),
                start_block: start,
                end_block: end,
                merkle_root: "0xroot".into(),
                leaf_count: transfers.len() as u64,
                safe_block_number: end,
                total_blocks: end - start + 1,
                total_transactions: end - start + 1,
                total_transfers: transfers.len() as u64,
            },
            transfers,
            checkpoint,
        }
    }

    #[tokio::test]
    async fn recommitting_a_range_is_idempotent() {
        let store = InMemoryLedger::new();
        store.commit_batch(commit(1, 5, 2)).await.unwrap();
        store.commit_batch(commit(1, 5, 2)).await.unwrap();

        assert_eq!(store.count_blocks(CHAIN).await.unwrap(), 5);
        assert_eq!(store.count_transfers(CHAIN).await.unwrap(), 10);
        assert_eq!(store.transaction_count(CHAIN), 5);
        assert_eq!(store.batches(CHAIN).len(), 1);
    }

    #[tokio::test]
    async fn upsert_keeps_submitter_fields() {
        let store = InMemoryLedger::new();
        store.commit_batch(commit(1, 5, 1)).await.unwrap();
        let id = BatchRecord::make_id(CHAIN, 1, 5);
        store.assign_prover(CHAIN, &id, "0xprover", None).await.unwrap();
        store.set_batch_status(CHAIN, &id, BatchStatus::Failed).await.unwrap();

        store.commit_batch(commit(1, 5, 1)).await.unwrap();
        let batch = store.get_batch(CHAIN, &id).await.unwrap().unwrap();
        assert_eq!(batch.prover_address.as_deref(), Some("0xprover"));
        assert_eq!(batch.onchain_status, BatchStatus::Failed);
    }

    #[tokio::test]
    async fn rollback_clears_future_rows() {
        let store = InMemoryLedger::new();
        store.commit_batch(commit(1, 5, 1)).await.unwrap();
        store.commit_batch(commit(6, 10, 1)).await.unwrap();

        let mut cp = Checkpoint::new(CHAIN, 1, 1);
        cp.last_indexed_block = Some(7);
        cp.last_indexed_hash = Some("0xh7".into());
        store.rollback_after(CHAIN, 7, &cp).await.unwrap();

        assert_eq!(store.count_blocks(CHAIN).await.unwrap(), 7);
        assert!(store.block_hash(CHAIN, 8).await.unwrap().is_none());
        assert_eq!(store.count_transfers(CHAIN).await.unwrap(), 7);
        assert_eq!(store.batches(CHAIN).len(), 1);
        assert_eq!(store.load_checkpoint(CHAIN).await.unwrap().unwrap().last_indexed_block, Some(7));
    }

    #[tokio::test]
    async fn claim_is_exclusive() {
        let store = InMemoryLedger::new();
        store.commit_batch(commit(1, 5, 1)).await.unwrap();
        let id = BatchRecord::make_id(CHAIN, 1, 5);

        assert_eq!(store.claim_batch(CHAIN, &id, Utc::now()).await.unwrap(), 1);
        assert_eq!(store.claim_batch(CHAIN, &id, Utc::now()).await.unwrap(), 0);
        assert_eq!(store.claim_batch(CHAIN, "missing", Utc::now()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn attestations_are_one_per_attestor() {
        let store = InMemoryLedger::new();
        let mut att = Attestation {
            chain_id: CHAIN.into(),
            batch_id: "b".into(),
            attestor: "0xA".into(),
            status: AttestationStatus::Valid,
            merkle_root: "0xroot".into(),
            signature: "0xsig".into(),
        };
        store.record_attestation(&att).await.unwrap();
        store.record_attestation(&att).await.unwrap();
        assert_eq!(store.count_valid_attestations(CHAIN, "b").await.unwrap(), 1);

        att.status = AttestationStatus::Invalid;
        store.record_attestation(&att).await.unwrap();
        assert_eq!(store.count_valid_attestations(CHAIN, "b").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn pages_walk_all_rows_without_overlap() {
        let store = InMemoryLedger::new();
        store.commit_batch(commit(1, 5, 3)).await.unwrap();

        let mut query = TransferQuery { limit: Some(4), ..Default::default() };
        let mut seen = Vec::new();
        loop {
            let page = list_transfers(&store, CHAIN, &query).await.unwrap();
            seen.extend(page.items.iter().map(|t| (t.block_number, t.log_index)));
            match page.next_cursor {
                Some(cursor) => query.cursor = Some(cursor),
                None => break,
            }
        }
        let mut expected: Vec<_> = (1..=5).flat_map(|b| (0..3).map(move |i| (b, i))).collect();
        expected.reverse();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn filters_apply() {
        let store = InMemoryLedger::new();
        store.commit_batch(commit(1, 5, 3)).await.unwrap();

        let query = TransferQuery {
            from_block: Some(2),
            to_block: Some(3),
            min_value: Some("21".into()),
            address: Some("0xBOB".into()),
            ..Default::default()
        };
        let page = list_transfers(&store, CHAIN, &query).await.unwrap();
        let values: Vec<_> = page.items.iter().map(|t| t.value.as_str()).collect();
        assert_eq!(values, ["32", "31", "30", "22", "21"]);
        assert!(page.next_cursor.is_none());

        let by_time = TransferQuery { from_timestamp: Some(1_005), ..Default::default() };
        let page = list_transfers(&store, CHAIN, &by_time).await.unwrap();
        assert!(page.items.iter().all(|t| t.block_number == 5));
    }
}
