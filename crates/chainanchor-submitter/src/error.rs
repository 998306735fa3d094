//! Error types for proof submission.

use thiserror::Error;

use chainanchor_core::error::IndexerError;
use chainanchor_rpc::TransportError;

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("transaction {tx_hash} reverted")]
    Reverted { tx_hash: String },

    #[error("submission timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    #[error("invalid {field} '{value}'")]
    InvalidField { field: &'static str, value: String },

    /// The key itself is never echoed.
    #[error("invalid coordinator private key")]
    InvalidKey,

    #[error("failed to sign transaction: {0}")]
    Signing(String),

    #[error("malformed node response: {0}")]
    Malformed(String),

    #[error("no settlement ledger configured for live submission")]
    NotConfigured,

    #[error(transparent)]
    Store(#[from] IndexerError),
}
