//! chainanchor-submitter — anchor attested batches on a settlement contract.
//!
//! # Architecture
//!
//! ```text
//! LedgerStore::submittable_batches
//!        │
//!        ▼
//! BatchSubmitter::tick ── quorum gate ── claim ── RewardPolicy
//!        │
//!        ▼
//! SettlementLedger::submit_proof ──► wait_for_confirmations
//!        │
//!        ▼
//! mark_confirmed / mark_failed
//! ```

pub mod error;
pub mod ledger;
pub mod submitter;

pub use error::SubmitError;
pub use ledger::{
    submit_proof_selector, ProofReceipt, ProofSubmission, RpcSettlementLedger, SettlementLedger,
    sign_eip1559, SubmittedProof, TxParams, SUBMIT_PROOF_SIGNATURE,
};
pub use submitter::{BatchSubmitter, SubmitterConfig, SubmitterHandle, TickReport};
