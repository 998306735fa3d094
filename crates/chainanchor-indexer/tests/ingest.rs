//! Ingester behaviour against a scripted chain and the in-memory store.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use chainanchor_core::commitment::{CommitmentBuilder, LeafLayout};
use chainanchor_core::store::LedgerStore;
use chainanchor_core::types::{BlockSummary, Checkpoint, TransactionRecord};
use chainanchor_indexer::{
    ChainSource, CycleOutcome, FetchedBlock, Ingester, IngesterBuilder, IngesterConfig,
    IngesterState, RawLog, TRANSFER_TOPIC,
};
use chainanchor_observability::PipelineMetrics;
use chainanchor_rpc::{JsonRpcError, TransportError};
use chainanchor_storage::InMemoryLedger;

const CHAIN: &str = "sepolia";
const TOKEN: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
const SENDER: &str = "0x1111111111111111111111111111111111111111";
const RECEIVER: &str = "0x2222222222222222222222222222222222222222";

// ─── Scripted chain ──────────────────────────────────────────────────────────

#[derive(Default)]
struct ChainState {
    blocks: BTreeMap<u64, FetchedBlock>,
    logs: BTreeMap<u64, Vec<RawLog>>,
    head: u64,
    /// Reject `eth_getLogs` answers with more logs than this.
    log_limit: Option<usize>,
    /// Fail this many `eth_getLogs` calls with a transport error.
    log_failures: u32,
    log_calls: Vec<(u64, u64)>,
}

struct MockChain {
    state: Mutex<ChainState>,
}

fn topic(address: &str) -> String {
    format!("0x{}{}", "0".repeat(24), &address[2..])
}

fn hash(tag: &str, n: u64) -> String {
    format!("0x{tag}{n}")
}

/// `tag` is a single hex digit so the hash stays 32 bytes.
fn tx_hash(tag: &str, n: u64) -> String {
    format!("0x{tag}{n:063x}")
}

impl MockChain {
    /// Blocks `0..=head`, `per_block` transfers each.
    fn new(head: u64, per_block: u64) -> Arc<Self> {
        let chain = Self { state: Mutex::new(ChainState { head, ..Default::default() }) };
        for n in 0..=head {
            chain.put_block(n, "a", per_block);
        }
        Arc::new(chain)
    }

    fn put_block(&self, n: u64, tag: &str, transfers: u64) {
        let mut state = self.state.lock().unwrap();
        let parent_hash = match n.checked_sub(1) {
            Some(p) => state.blocks[&p].summary.hash.clone(),
            None => "0x0".to_string(),
        };
        let tx_hash = tx_hash(tag, n);
        state.blocks.insert(
            n,
            FetchedBlock {
                summary: BlockSummary {
                    number: n,
                    hash: hash(tag, n),
                    parent_hash,
                    timestamp: 1_700_000_000 + n as i64 * 12,
                    tx_count: 1,
                },
                transactions: vec![TransactionRecord {
                    hash: tx_hash.clone(),
                    block_number: n,
                    transaction_index: 0,
                    from: SENDER.into(),
                    to: Some(TOKEN.into()),
                    value: "0".into(),
                }],
            },
        );
        let logs = (0..transfers)
            .map(|i| RawLog {
                address: TOKEN.into(),
                topics: vec![TRANSFER_TOPIC.into(), topic(SENDER), topic(RECEIVER)],
                data: format!("0x{:064x}", 1_000 * n + i),
                block_number: format!("0x{n:x}"),
                tx_hash: tx_hash.clone(),
                log_index: format!("0x{i:x}"),
                removed: None,
            })
            .collect();
        state.logs.insert(n, logs);
    }

    /// Replace blocks `from..=head` with a competing branch.
    fn fork_from(&self, from: u64, tag: &str) {
        let head = self.state.lock().unwrap().head;
        for n in from..=head {
            self.put_block(n, tag, 1);
        }
    }

    fn extend_to(&self, head: u64, tag: &str) {
        let current = self.state.lock().unwrap().head;
        for n in current + 1..=head {
            self.put_block(n, tag, 1);
        }
        self.state.lock().unwrap().head = head;
    }
}

#[async_trait]
impl ChainSource for MockChain {
    async fn head_block_number(&self) -> Result<u64, TransportError> {
        Ok(self.state.lock().unwrap().head)
    }

    async fn block_with_transactions(&self, number: u64) -> Result<Option<FetchedBlock>, TransportError> {
        Ok(self.state.lock().unwrap().blocks.get(&number).cloned())
    }

    async fn transfer_logs(&self, from: u64, to: u64) -> Result<Vec<RawLog>, TransportError> {
        let mut state = self.state.lock().unwrap();
        state.log_calls.push((from, to));
        if state.log_failures > 0 {
            state.log_failures -= 1;
            return Err(TransportError::Other("connection reset".into()));
        }
        let logs: Vec<RawLog> = state.logs.range(from..=to).flat_map(|(_, l)| l.clone()).collect();
        if state.log_limit.is_some_and(|limit| logs.len() > limit) {
            return Err(TransportError::Rpc(JsonRpcError {
                code: -32005,
                message: "query returned more than 10000 results".into(),
                data: None,
            }));
        }
        Ok(logs)
    }
}

fn ingester(chain: &Arc<MockChain>, store: &Arc<InMemoryLedger>, batch_size: u64) -> Ingester {
    IngesterBuilder::new()
        .chain(CHAIN)
        .start_block(1)
        .confirmations(6)
        .batch_size(batch_size)
        .poll_interval(Duration::from_millis(100))
        .build(chain.clone(), store.clone())
}

fn persisted(outcome: CycleOutcome) -> (u64, u64) {
    match outcome {
        CycleOutcome::Persisted(batch) => (batch.start_block, batch.end_block),
        other => panic!("expected a persisted batch, got {other:?}"),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn persists_confirmed_ranges_in_order() {
    let chain = MockChain::new(30, 1);
    let store = Arc::new(InMemoryLedger::new());
    let mut ingester = ingester(&chain, &store, 10);

    assert_eq!(persisted(ingester.run_cycle().await.unwrap()), (1, 10));
    let root = CommitmentBuilder::from_transfers(&store.transfers(CHAIN)).unwrap().root_hex();
    let first = store.batches(CHAIN)[0].clone();
    assert_eq!(first.record.merkle_root, root);
    assert_eq!(first.record.leaf_count, 10);
    assert_eq!(first.record.safe_block_number, 24);

    assert_eq!(persisted(ingester.run_cycle().await.unwrap()), (11, 20));
    assert_eq!(persisted(ingester.run_cycle().await.unwrap()), (21, 24));
    assert_eq!(
        ingester.run_cycle().await.unwrap(),
        CycleOutcome::Waiting { next_block: 25, safe_block: 24 }
    );

    assert_eq!(store.count_blocks(CHAIN).await.unwrap(), 24);
    assert_eq!(store.count_transfers(CHAIN).await.unwrap(), 24);
    assert_eq!(store.transaction_count(CHAIN), 24);
    let cp = store.load_checkpoint(CHAIN).await.unwrap().unwrap();
    assert_eq!(cp.last_indexed_block, Some(24));
    assert_eq!(cp.last_indexed_hash.as_deref(), Some("0xa24"));
}

#[tokio::test]
async fn configured_leaf_layout_drives_the_root() {
    let chain = MockChain::new(30, 2);
    let store = Arc::new(InMemoryLedger::new());
    let mut ingester = IngesterBuilder::new()
        .chain(CHAIN)
        .start_block(1)
        .confirmations(6)
        .batch_size(10)
        .leaf_layout(LeafLayout::WithoutRecipient)
        .build(chain.clone(), store.clone());

    ingester.run_cycle().await.unwrap();
    let transfers = store.transfers(CHAIN);
    let expected = CommitmentBuilder::from_transfers_with(LeafLayout::WithoutRecipient, &transfers)
        .unwrap()
        .root_hex();
    let default_root = CommitmentBuilder::from_transfers(&transfers).unwrap().root_hex();

    let batch = store.batches(CHAIN)[0].clone();
    assert_eq!(batch.record.merkle_root, expected);
    assert_ne!(batch.record.merkle_root, default_root);
}

#[tokio::test]
async fn direct_construction_clamps_the_config() {
    let chain = MockChain::new(30, 1);
    let store = Arc::new(InMemoryLedger::new());
    let config = IngesterConfig {
        chain_id: CHAIN.into(),
        start_block: Some(1),
        batch_size: 0,
        fetch_concurrency: 0,
        ..IngesterConfig::default()
    };
    let mut ingester = Ingester::new(config, chain.clone(), store.clone(), PipelineMetrics::default());
    assert_eq!(ingester.config().batch_size, 1);
    assert_eq!(ingester.config().fetch_concurrency, 1);

    assert_eq!(persisted(ingester.run_cycle().await.unwrap()), (1, 1));
    assert_eq!(persisted(ingester.run_cycle().await.unwrap()), (2, 2));
}

#[tokio::test]
async fn fresh_checkpoint_starts_one_batch_behind_safe() {
    let chain = MockChain::new(30, 1);
    let store = Arc::new(InMemoryLedger::new());
    let mut ingester = IngesterBuilder::new()
        .chain(CHAIN)
        .confirmations(6)
        .batch_size(10)
        .build(chain.clone(), store.clone());

    assert_eq!(persisted(ingester.run_cycle().await.unwrap()), (14, 23));
    assert_eq!(store.load_checkpoint(CHAIN).await.unwrap().unwrap().start_block, 14);
}

#[tokio::test]
async fn reingesting_a_range_creates_no_duplicates() {
    let chain = MockChain::new(30, 2);
    let store = Arc::new(InMemoryLedger::new());
    let mut ingester = ingester(&chain, &store, 10);

    ingester.run_cycle().await.unwrap();
    let before = store.batches(CHAIN)[0].record.merkle_root.clone();

    store.save_checkpoint(&Checkpoint::new(CHAIN, 1, 24)).await.unwrap();
    assert_eq!(persisted(ingester.run_cycle().await.unwrap()), (1, 10));

    assert_eq!(store.count_blocks(CHAIN).await.unwrap(), 10);
    assert_eq!(store.count_transfers(CHAIN).await.unwrap(), 20);
    assert_eq!(store.batches(CHAIN).len(), 1);
    assert_eq!(store.batches(CHAIN)[0].record.merkle_root, before);
}

#[tokio::test]
async fn reorg_walks_back_to_the_fork_point() {
    let chain = MockChain::new(16, 1);
    let store = Arc::new(InMemoryLedger::new());
    let mut ingester = ingester(&chain, &store, 10);
    assert_eq!(persisted(ingester.run_cycle().await.unwrap()), (1, 10));

    // Blocks 8.. are replaced; 8' still builds on the stored block 7.
    chain.fork_from(8, "b");
    chain.extend_to(17, "b");

    for expected in [10, 9, 8, 7] {
        assert_eq!(
            ingester.run_cycle().await.unwrap(),
            CycleOutcome::Reorg { rollback_to: expected }
        );
    }
    let cp = store.load_checkpoint(CHAIN).await.unwrap().unwrap();
    assert_eq!(cp.last_indexed_block, Some(7));
    assert_eq!(cp.last_indexed_hash.as_deref(), Some("0xa7"));
    assert_eq!(cp.safe_block_number, 1);
    assert_eq!(store.count_blocks(CHAIN).await.unwrap(), 7);
    assert!(store.batches(CHAIN).is_empty());

    assert_eq!(persisted(ingester.run_cycle().await.unwrap()), (8, 11));
    assert_eq!(store.block_hash(CHAIN, 8).await.unwrap().as_deref(), Some("0xb8"));
    let replaced: Vec<_> = store
        .transfers(CHAIN)
        .into_iter()
        .filter(|t| t.block_number >= 8)
        .map(|t| t.tx_hash)
        .collect();
    let expected: Vec<_> = (8..=11).map(|n| tx_hash("b", n)).collect();
    assert_eq!(replaced, expected);
}

#[tokio::test]
async fn oversized_log_ranges_are_bisected() {
    let chain = MockChain::new(16, 1);
    chain.put_block(5, "a", 3);
    chain.state.lock().unwrap().log_limit = Some(2);
    let store = Arc::new(InMemoryLedger::new());
    let mut ingester = ingester(&chain, &store, 10);

    assert_eq!(persisted(ingester.run_cycle().await.unwrap()), (1, 10));

    // Block 5 alone still exceeds the limit and is dropped.
    let blocks: Vec<_> = store.transfers(CHAIN).iter().map(|t| t.block_number).collect();
    assert_eq!(blocks, [1, 2, 3, 4, 6, 7, 8, 9, 10]);
    assert_eq!(store.batches(CHAIN)[0].record.total_transfers, 9);

    let calls = chain.state.lock().unwrap().log_calls.clone();
    assert_eq!(calls[0], (1, 10));
    assert!(calls.contains(&(5, 5)));
}

#[tokio::test]
async fn failed_cycle_does_not_advance() {
    let chain = MockChain::new(16, 1);
    chain.state.lock().unwrap().log_failures = 1;
    let store = Arc::new(InMemoryLedger::new());
    let mut ingester = ingester(&chain, &store, 10);

    assert!(ingester.run_cycle().await.is_err());
    let cp = store.load_checkpoint(CHAIN).await.unwrap().unwrap();
    assert_eq!(cp.last_indexed_block, None);
    assert_eq!(store.count_blocks(CHAIN).await.unwrap(), 0);

    assert_eq!(persisted(ingester.run_cycle().await.unwrap()), (1, 10));
}

#[tokio::test(start_paused = true)]
async fn run_stops_at_a_loop_boundary() {
    let chain = MockChain::new(16, 1);
    let store = Arc::new(InMemoryLedger::new());
    let mut ingester = ingester(&chain, &store, 5);
    let handle = ingester.handle();

    let task = tokio::spawn(async move {
        ingester.run().await.unwrap();
        ingester
    });
    tokio::time::sleep(Duration::from_secs(1)).await;
    handle.stop();

    let ingester = task.await.unwrap();
    assert_eq!(ingester.state(), IngesterState::Stopped);
    assert!(handle.is_stopped());
    assert_eq!(store.count_blocks(CHAIN).await.unwrap(), 10);
}
