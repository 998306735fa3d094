//! Transport-level error types.

use thiserror::Error;

use crate::request::JsonRpcError;

/// Failure of one JSON-RPC exchange, or of the pool as a whole.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection, TLS or body-read failure.
    #[error("HTTP error: {0}")]
    Http(String),

    /// The endpoint answered with a non-success HTTP status.
    #[error("HTTP status {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// JSON-RPC protocol-level error returned by the node.
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(JsonRpcError),

    /// Upstream answered 429 or a rate-limit message.
    #[error("rate limited by {provider}")]
    RateLimited { provider: String },

    /// Every endpoint in the pool is disabled.
    #[error("every RPC endpoint is disabled")]
    AllProvidersDown,

    /// A pool was built without any endpoint.
    #[error("endpoint pool has no endpoints")]
    EmptyPool,

    /// Request timed out after the configured duration.
    #[error("request timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// Response could not be deserialized.
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    /// An unexpected error.
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Failures that may clear up on another attempt. A malformed answer,
    /// a revert, or a pool with nothing left to try fails the same way again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) | Self::Timeout { .. } | Self::RateLimited { .. } | Self::Other(_) => true,
            Self::HttpStatus { status, .. } => matches!(*status, 408 | 429) || *status >= 500,
            Self::Rpc(err) => !is_revert(err),
            Self::Deserialization(_) | Self::AllProvidersDown | Self::EmptyPool => false,
        }
    }

    /// The node understood the call and rejected it.
    pub fn is_execution_error(&self) -> bool {
        matches!(self, Self::Rpc(_))
    }
}

fn is_revert(err: &JsonRpcError) -> bool {
    err.code == 3 || err.message.to_ascii_lowercase().contains("execution reverted")
}
