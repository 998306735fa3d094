//! Opaque pagination cursor for the transfer listing.
//!
//! A cursor is standard base64 over the JSON encoding of the last row of the
//! previous page:
//!
//! ```json
//! {"id":"0xabc…-3","blockNumber":100,"logIndex":3,"txHash":"0xabc…"}
//! ```
//!
//! Decoding rejects anything that is not exactly that shape.

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Transfer;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CursorError {
    #[error("cursor is not valid base64")]
    Base64,

    #[error("cursor is not valid UTF-8")]
    Utf8,

    #[error("malformed cursor payload: {0}")]
    Payload(String),
}

/// Position of the last row returned, in `(block_number, log_index, id)` order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PaginationCursor {
    pub id: String,
    pub block_number: u64,
    pub log_index: u64,
    pub tx_hash: String,
}

impl PaginationCursor {
    /// Cursor pointing at `transfer`.
    pub fn after(transfer: &Transfer) -> Self {
        Self {
            id: transfer.id.clone(),
            block_number: transfer.block_number,
            log_index: transfer.log_index,
            tx_hash: transfer.tx_hash.clone(),
        }
    }

    pub fn encode(&self) -> String {
        // Serializing a struct of strings and integers cannot fail.
        let json = serde_json::to_vec(self).unwrap_or_default();
        STANDARD.encode(json)
    }

    pub fn decode(raw: &str) -> Result<Self, CursorError> {
        let bytes = STANDARD.decode(raw.trim()).map_err(|_| CursorError::Base64)?;
        let text = std::str::from_utf8(&bytes).map_err(|_| CursorError::Utf8)?;
        let cursor: Self =
            serde_json::from_str(text).map_err(|e| CursorError::Payload(e.to_string()))?;
        if cursor.id.is_empty() || cursor.tx_hash.is_empty() {
            return Err(CursorError::Payload("empty id or txHash".into()));
        }
        Ok(cursor)
    }
}
