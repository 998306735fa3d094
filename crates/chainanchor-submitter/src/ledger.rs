//! The remote settlement ledger: where batch proofs are anchored.
//!
//! The rewards contract exposes
//!
//! ```text
//! submitProof((bytes32 batchId, address indexer, bytes32 poiMerkleRoot,
//!              bytes32 sqlProofRoot, uint256 safeBlockNumber, uint256 rewardAmount))
//! ```
//!
//! Every tuple member is static, so calldata is the 4-byte selector followed
//! by six 32-byte words.
//!
//! [`RpcSettlementLedger`] sends the call one of two ways:
//!
//! ```text
//! local key     eth_chainId, eth_getTransactionCount, eth_estimateGas,
//!               eth_maxPriorityFeePerGas, latest baseFeePerGas
//!                   └─► sign EIP-1559 ─► eth_sendRawTransaction
//! node account  eth_sendTransaction (the node holds the key)
//! ```

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use alloy_consensus::{SignableTransaction, TxEip1559, TxEnvelope};
use alloy_eips::eip2718::Encodable2718;
use alloy_primitives::{Address, Bytes, TxKind, B256, U256};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use async_trait::async_trait;
use serde_json::{json, Value};

use chainanchor_core::commitment::keccak256;
use chainanchor_core::types::IndexedBatch;
use chainanchor_rpc::RpcTransport;

use crate::error::SubmitError;

pub const SUBMIT_PROOF_SIGNATURE: &str =
    "submitProof((bytes32,address,bytes32,bytes32,uint256,uint256))";

/// `keccak256(SUBMIT_PROOF_SIGNATURE)[..4]`.
pub fn submit_proof_selector() -> [u8; 4] {
    let hash = keccak256(SUBMIT_PROOF_SIGNATURE.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Arguments of one `submitProof` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofSubmission {
    /// `keccak256(utf8(batch id))`.
    pub batch_id: B256,
    pub prover: Address,
    pub commitment_root: B256,
    /// `keccak256(sql_statement)`, or zero without one.
    pub secondary_root: B256,
    pub safe_block_number: u64,
    pub reward: U256,
}

impl ProofSubmission {
    pub fn for_batch(batch: &IndexedBatch, prover: &str, reward: U256) -> Result<Self, SubmitError> {
        let prover = Address::from_str(prover).map_err(|_| SubmitError::InvalidField {
            field: "prover address",
            value: prover.to_string(),
        })?;
        let commitment_root = B256::from_str(&batch.record.merkle_root).map_err(|_| SubmitError::InvalidField {
            field: "merkle root",
            value: batch.record.merkle_root.clone(),
        })?;
        let secondary_root = batch
            .sql_statement
            .as_deref()
            .map(|sql| keccak256(sql.as_bytes()))
            .unwrap_or(B256::ZERO);

        Ok(Self {
            batch_id: keccak256(batch.id().as_bytes()),
            prover,
            commitment_root,
            secondary_root,
            safe_block_number: batch.record.safe_block_number,
            reward,
        })
    }

    /// ABI-encoded calldata, selector included.
    pub fn encode_call(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + 6 * 32);
        out.extend_from_slice(&submit_proof_selector());
        out.extend_from_slice(self.batch_id.as_slice());
        out.extend_from_slice(&[0u8; 12]);
        out.extend_from_slice(self.prover.as_slice());
        out.extend_from_slice(self.commitment_root.as_slice());
        out.extend_from_slice(self.secondary_root.as_slice());
        out.extend_from_slice(&U256::from(self.safe_block_number).to_be_bytes::<32>());
        out.extend_from_slice(&self.reward.to_be_bytes::<32>());
        out
    }
}

/// A transaction accepted by the node, not yet confirmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedProof {
    pub tx_hash: String,
}

/// A mined, successful submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofReceipt {
    pub tx_hash: String,
    pub block_number: u64,
    pub confirmations: u64,
}

#[async_trait]
pub trait SettlementLedger: Send + Sync {
    async fn submit_proof(&self, submission: &ProofSubmission) -> Result<SubmittedProof, SubmitError>;

    /// Resolve once the transaction is `confirmations` blocks deep.
    /// A reverted transaction is an error.
    async fn wait_for_confirmations(
        &self,
        submitted: &SubmittedProof,
        confirmations: u64,
    ) -> Result<ProofReceipt, SubmitError>;
}

/// Who signs `submitProof` transactions.
enum Sender {
    /// Account unlocked on the node; sent with `eth_sendTransaction`.
    Node(Address),
    /// Key held by this process; sent with `eth_sendRawTransaction`.
    Local(PrivateKeySigner),
}

/// Network parameters for one locally signed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxParams {
    pub chain_id: u64,
    pub nonce: u64,
    pub gas_limit: u64,
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
}

/// [`SettlementLedger`] that calls `submitProof` over JSON-RPC, signing
/// locally when built with a private key.
pub struct RpcSettlementLedger {
    transport: Arc<dyn RpcTransport>,
    contract: Address,
    sender: Sender,
    poll_interval: Duration,
}

fn parse_address(field: &'static str, value: &str) -> Result<Address, SubmitError> {
    Address::from_str(value).map_err(|_| SubmitError::InvalidField { field, value: value.to_string() })
}

impl RpcSettlementLedger {
    /// Send through `from`, an account the node signs for.
    pub fn new(transport: Arc<dyn RpcTransport>, contract: &str, from: &str) -> Result<Self, SubmitError> {
        Ok(Self {
            transport,
            contract: parse_address("rewards contract", contract)?,
            sender: Sender::Node(parse_address("coordinator address", from)?),
            poll_interval: Duration::from_secs(2),
        })
    }

    /// Sign with `private_key` (hex, `0x` optional) and send raw transactions.
    pub fn with_private_key(
        transport: Arc<dyn RpcTransport>,
        contract: &str,
        private_key: &str,
    ) -> Result<Self, SubmitError> {
        let signer = PrivateKeySigner::from_str(private_key.trim()).map_err(|_| SubmitError::InvalidKey)?;
        Ok(Self {
            transport,
            contract: parse_address("rewards contract", contract)?,
            sender: Sender::Local(signer),
            poll_interval: Duration::from_secs(2),
        })
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Account the proofs are sent from.
    pub fn sender_address(&self) -> Address {
        match &self.sender {
            Sender::Node(from) => *from,
            Sender::Local(signer) => signer.address(),
        }
    }

    pub fn signs_locally(&self) -> bool {
        matches!(self.sender, Sender::Local(_))
    }

    async fn block_number(&self) -> Result<u64, SubmitError> {
        let raw: String = self.transport.call("eth_blockNumber", vec![]).await?;
        parse_quantity(&raw)
    }

    /// Chain id, pending nonce, gas and fees for a call from `from`.
    /// Gas gets a 20% margin over the estimate; the fee cap is twice the
    /// latest base fee plus the tip.
    async fn tx_params(&self, call: &Value, from: Address) -> Result<TxParams, SubmitError> {
        let (chain_id, nonce, gas, tip, latest) = tokio::try_join!(
            self.transport.call::<String>("eth_chainId", vec![]),
            self.transport
                .call::<String>("eth_getTransactionCount", vec![json!(from.to_string()), json!("pending")]),
            self.transport.call::<String>("eth_estimateGas", vec![call.clone()]),
            self.transport.call::<String>("eth_maxPriorityFeePerGas", vec![]),
            self.transport
                .call::<Value>("eth_getBlockByNumber", vec![json!("latest"), json!(false)]),
        )?;

        let base_fee = latest["baseFeePerGas"]
            .as_str()
            .ok_or_else(|| SubmitError::Malformed("latest block without baseFeePerGas".into()))
            .and_then(parse_u128)?;
        let gas = parse_quantity(&gas)?;
        let tip = parse_u128(&tip)?;

        Ok(TxParams {
            chain_id: parse_quantity(&chain_id)?,
            nonce: parse_quantity(&nonce)?,
            gas_limit: gas.saturating_add(gas / 5),
            max_fee_per_gas: base_fee.saturating_mul(2).saturating_add(tip),
            max_priority_fee_per_gas: tip,
        })
    }
}

/// Sign a `value = 0` EIP-1559 call to `to`. Returns the EIP-2718 encoded
/// transaction and its hash.
pub fn sign_eip1559(
    signer: &PrivateKeySigner,
    to: Address,
    input: Vec<u8>,
    params: TxParams,
) -> Result<(Vec<u8>, B256), SubmitError> {
    let tx = TxEip1559 {
        chain_id: params.chain_id,
        nonce: params.nonce,
        gas_limit: params.gas_limit,
        max_fee_per_gas: params.max_fee_per_gas,
        max_priority_fee_per_gas: params.max_priority_fee_per_gas,
        to: TxKind::Call(to),
        value: U256::ZERO,
        access_list: Default::default(),
        input: Bytes::from(input),
    };
    let signature = signer
        .sign_hash_sync(&tx.signature_hash())
        .map_err(|e| SubmitError::Signing(e.to_string()))?;
    let envelope = TxEnvelope::from(tx.into_signed(signature));
    Ok((envelope.encoded_2718(), *envelope.tx_hash()))
}

fn parse_u128(raw: &str) -> Result<u128, SubmitError> {
    let digits = raw.strip_prefix("0x").unwrap_or(raw);
    u128::from_str_radix(digits, 16).map_err(|_| SubmitError::Malformed(format!("bad quantity {raw}")))
}

fn parse_quantity(raw: &str) -> Result<u64, SubmitError> {
    u64::try_from(parse_u128(raw)?).map_err(|_| SubmitError::Malformed(format!("quantity {raw} overflows u64")))
}

#[async_trait]
impl SettlementLedger for RpcSettlementLedger {
    async fn submit_proof(&self, submission: &ProofSubmission) -> Result<SubmittedProof, SubmitError> {
        let data = submission.encode_call();
        let call = json!({
            "from": self.sender_address().to_string(),
            "to": self.contract.to_string(),
            "data": format!("0x{}", hex::encode(&data)),
        });

        let tx_hash: String = match &self.sender {
            Sender::Node(_) => self.transport.call("eth_sendTransaction", vec![call]).await?,
            Sender::Local(signer) => {
                let params = self.tx_params(&call, signer.address()).await?;
                let (raw, local_hash) = sign_eip1559(signer, self.contract, data, params)?;
                let tx_hash: String = self
                    .transport
                    .call("eth_sendRawTransaction", vec![json!(format!("0x{}", hex::encode(&raw)))])
                    .await?;
                if !tx_hash.eq_ignore_ascii_case(&local_hash.to_string()) {
                    tracing::warn!(tx_hash = %tx_hash, local_hash = %local_hash, "Node reported a different transaction hash");
                }
                tracing::debug!(
                    nonce = params.nonce,
                    gas_limit = params.gas_limit,
                    max_fee_per_gas = params.max_fee_per_gas,
                    "Signed proof transaction"
                );
                tx_hash
            }
        };
        tracing::debug!(tx_hash = %tx_hash, url = %self.transport.url(), "Proof transaction sent");
        Ok(SubmittedProof { tx_hash })
    }

    async fn wait_for_confirmations(
        &self,
        submitted: &SubmittedProof,
        confirmations: u64,
    ) -> Result<ProofReceipt, SubmitError> {
        let required = confirmations.max(1);
        loop {
            let receipt: Option<Value> = self
                .transport
                .call("eth_getTransactionReceipt", vec![json!(submitted.tx_hash)])
                .await?;

            if let Some(receipt) = receipt {
                if receipt["status"].as_str() == Some("0x0") {
                    return Err(SubmitError::Reverted { tx_hash: submitted.tx_hash.clone() });
                }
                let mined_in = receipt["blockNumber"]
                    .as_str()
                    .ok_or_else(|| SubmitError::Malformed("receipt without blockNumber".into()))
                    .and_then(parse_quantity)?;
                let depth = self.block_number().await?.saturating_sub(mined_in) + 1;
                if depth >= required {
                    return Ok(ProofReceipt {
                        tx_hash: submitted.tx_hash.clone(),
                        block_number: mined_in,
                        confirmations: depth,
                    });
                }
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainanchor_core::types::BatchRecord;
    use chainanchor_rpc::{JsonRpcRequest, JsonRpcResponse, TransportError};
    use chrono::Utc;
    use std::sync::Mutex;

    fn batch(sql: Option<&str>) -> IndexedBatch {
        let mut batch = IndexedBatch::new(
            "sepolia",
            BatchRecord {
                id: BatchRecord::make_id("sepolia", 100, 124),
                start_block: 100,
                end_block: 124,
                merkle_root: format!("0x{}", "ab".repeat(32)),
                leaf_count: 3,
                safe_block_number: 130,
                total_blocks: 25,
                total_transactions: 40,
                total_transfers: 3,
            },
            Utc::now(),
        );
        batch.sql_statement = sql.map(str::to_string);
        batch
    }

    const PROVER: &str = "0x1111111111111111111111111111111111111111";

    #[test]
    fn selector_matches_signature() {
        assert_eq!(hex::encode(submit_proof_selector()), "f8839ffc");
    }

    #[test]
    fn batch_id_is_hash_of_id_string() {
        let submission = ProofSubmission::for_batch(&batch(None), PROVER, U256::from(7)).unwrap();
        assert_eq!(
            hex::encode(submission.batch_id),
            "289f175bd60c493d6b2fef1401475ff5fe6dd1678d7440c22c2c67007d890c95"
        );
        assert_eq!(submission.secondary_root, B256::ZERO);

        let with_sql = ProofSubmission::for_batch(&batch(Some("SELECT 1")), PROVER, U256::ZERO).unwrap();
        assert_eq!(with_sql.secondary_root, keccak256(b"SELECT 1"));
    }

    #[test]
    fn calldata_layout() {
        let submission = ProofSubmission::for_batch(&batch(None), PROVER, U256::from(1500)).unwrap();
        let data = submission.encode_call();
        assert_eq!(data.len(), 4 + 6 * 32);
        assert_eq!(&data[..4], &[0xf8, 0x83, 0x9f, 0xfc]);
        assert_eq!(&data[4..36], submission.batch_id.as_slice());
        assert_eq!(&data[36..48], &[0u8; 12]);
        assert_eq!(&data[48..68], &[0x11u8; 20]);
        assert_eq!(&data[68..100], &[0xabu8; 32]);
        assert_eq!(&data[100..132], &[0u8; 32]);
        assert_eq!(data[163], 130);
        assert_eq!(&data[194..196], &[0x05, 0xdc]);
    }

    #[test]
    fn bad_prover_is_rejected() {
        let err = ProofSubmission::for_batch(&batch(None), "0xnope", U256::ZERO).unwrap_err();
        assert!(matches!(err, SubmitError::InvalidField { field: "prover address", .. }));
    }

    /// Answers from a fixed script keyed by method.
    struct NodeScript {
        receipts: Mutex<Vec<Option<Value>>>,
        head: u64,
        sent: Mutex<Vec<Value>>,
        raw: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RpcTransport for NodeScript {
        async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
            let result = match req.method.as_str() {
                "eth_sendTransaction" => {
                    self.sent.lock().unwrap().push(req.params[0].clone());
                    json!("0xfeed")
                }
                "eth_getTransactionReceipt" => {
                    let mut receipts = self.receipts.lock().unwrap();
                    let next = if receipts.len() > 1 { receipts.remove(0) } else { receipts[0].clone() };
                    next.unwrap_or(Value::Null)
                }
                "eth_blockNumber" => json!(format!("0x{:x}", self.head)),
                "eth_chainId" => json!("0xaa36a7"),
                "eth_getTransactionCount" => {
                    assert_eq!(req.params[1], json!("pending"));
                    json!("0x7")
                }
                "eth_estimateGas" => json!("0x186a0"),
                "eth_maxPriorityFeePerGas" => json!("0x3b9aca00"),
                "eth_getBlockByNumber" => json!({"number": "0x64", "baseFeePerGas": "0x4a817c800"}),
                "eth_sendRawTransaction" => {
                    let raw = req.params[0].as_str().unwrap().to_string();
                    let hash = keccak256(&hex::decode(raw.trim_start_matches("0x")).unwrap());
                    self.raw.lock().unwrap().push(raw);
                    json!(hash.to_string())
                }
                other => panic!("unexpected method {other}"),
            };
            Ok(JsonRpcResponse::success(1, result))
        }

        fn url(&self) -> &str {
            "mock://node"
        }
    }

    fn node(receipts: Vec<Option<Value>>, head: u64) -> Arc<NodeScript> {
        Arc::new(NodeScript {
            receipts: Mutex::new(receipts),
            head,
            sent: Mutex::new(vec![]),
            raw: Mutex::new(vec![]),
        })
    }

    fn ledger(receipts: Vec<Option<Value>>, head: u64) -> (Arc<NodeScript>, RpcSettlementLedger) {
        let node = node(receipts, head);
        let ledger = RpcSettlementLedger::new(
            node.clone(),
            "0x2222222222222222222222222222222222222222",
            "0x3333333333333333333333333333333333333333",
        )
        .unwrap()
        .with_poll_interval(Duration::from_millis(10));
        (node, ledger)
    }

    #[tokio::test(start_paused = true)]
    async fn sends_and_waits_for_depth() {
        let mined = json!({"status": "0x1", "blockNumber": "0x64"});
        let (node, ledger) = ledger(vec![None, Some(mined)], 0x65);

        let submission = ProofSubmission::for_batch(&batch(None), PROVER, U256::from(1)).unwrap();
        let submitted = ledger.submit_proof(&submission).await.unwrap();
        assert_eq!(submitted.tx_hash, "0xfeed");

        let sent = node.sent.lock().unwrap()[0].clone();
        assert_eq!(sent["to"].as_str().unwrap().to_lowercase(), format!("0x{}", "22".repeat(20)));
        assert!(sent["data"].as_str().unwrap().starts_with("0xf8839ffc"));

        let receipt = ledger.wait_for_confirmations(&submitted, 2).await.unwrap();
        assert_eq!(receipt.block_number, 100);
        assert_eq!(receipt.confirmations, 2);
    }

    #[tokio::test]
    async fn reverted_receipt_is_an_error() {
        let (_, ledger) = ledger(vec![Some(json!({"status": "0x0", "blockNumber": "0x64"}))], 0x64);
        let submitted = SubmittedProof { tx_hash: "0xfeed".into() };
        let err = ledger.wait_for_confirmations(&submitted, 1).await.unwrap_err();
        assert!(matches!(err, SubmitError::Reverted { .. }));
    }

    // Well-known development key.
    const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const DEV_ADDRESS: &str = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";

    #[tokio::test]
    async fn local_key_sends_a_signed_eip1559_transaction() {
        use alloy_eips::eip2718::Decodable2718;

        let node = node(vec![None], 0);
        let ledger = RpcSettlementLedger::with_private_key(
            node.clone(),
            "0x2222222222222222222222222222222222222222",
            DEV_KEY,
        )
        .unwrap();
        assert!(ledger.signs_locally());
        assert_eq!(ledger.sender_address(), Address::from_str(DEV_ADDRESS).unwrap());

        let submission = ProofSubmission::for_batch(&batch(None), PROVER, U256::from(1500)).unwrap();
        let submitted = ledger.submit_proof(&submission).await.unwrap();
        assert!(node.sent.lock().unwrap().is_empty());

        let raw = node.raw.lock().unwrap()[0].clone();
        let bytes = hex::decode(raw.trim_start_matches("0x")).unwrap();
        assert_eq!(bytes[0], 0x02);
        assert_eq!(submitted.tx_hash, keccak256(&bytes).to_string());

        let envelope = TxEnvelope::decode_2718(&mut bytes.as_slice()).unwrap();
        let TxEnvelope::Eip1559(signed) = envelope else {
            panic!("expected an EIP-1559 transaction");
        };
        let tx = signed.tx();
        assert_eq!(tx.chain_id, 11_155_111);
        assert_eq!(tx.nonce, 7);
        assert_eq!(tx.gas_limit, 120_000);
        assert_eq!(tx.max_priority_fee_per_gas, 1_000_000_000);
        assert_eq!(tx.max_fee_per_gas, 41_000_000_000);
        assert_eq!(tx.to, TxKind::Call(Address::repeat_byte(0x22)));
        assert_eq!(tx.value, U256::ZERO);
        assert_eq!(tx.input.as_ref(), submission.encode_call().as_slice());
        assert_eq!(signed.recover_signer().unwrap(), ledger.sender_address());
    }

    #[test]
    fn signing_is_deterministic() {
        let signer = PrivateKeySigner::from_str(DEV_KEY).unwrap();
        let params = TxParams {
            chain_id: 1,
            nonce: 0,
            gas_limit: 21_000,
            max_fee_per_gas: 2,
            max_priority_fee_per_gas: 1,
        };
        let to = Address::repeat_byte(0x22);
        let (first, hash) = sign_eip1559(&signer, to, vec![0xf8, 0x83], params).unwrap();
        let (second, _) = sign_eip1559(&signer, to, vec![0xf8, 0x83], params).unwrap();
        assert_eq!(first, second);
        assert_eq!(hash, keccak256(&first));

        let (other_nonce, _) = sign_eip1559(&signer, to, vec![0xf8, 0x83], TxParams { nonce: 1, ..params }).unwrap();
        assert_ne!(first, other_nonce);
    }

    #[test]
    fn bad_private_key_is_rejected() {
        let node = node(vec![None], 0);
        let err = RpcSettlementLedger::with_private_key(node, "0x2222222222222222222222222222222222222222", "0x1234")
            .err()
            .unwrap();
        assert!(matches!(err, SubmitError::InvalidKey));
        assert!(!err.to_string().contains("1234"));
    }

    #[test]
    fn node_account_mode_is_the_fallback() {
        let (_, ledger) = ledger(vec![None], 0);
        assert!(!ledger.signs_locally());
        assert_eq!(ledger.sender_address(), Address::repeat_byte(0x33));
    }
}
