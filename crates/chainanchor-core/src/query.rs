//! The list-transfers operation: validation, keyset pagination, next cursor.

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cursor::{CursorError, PaginationCursor};
use crate::error::IndexerError;
use crate::store::{LedgerStore, SeekRequest};
use crate::types::Transfer;

pub const DEFAULT_LIMIT: usize = 20;
pub const MAX_LIMIT: usize = 500;

/// Sort direction over `(block_number, log_index, id)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Asc,
    #[default]
    Desc,
}

/// Client errors are rejected before the store is touched.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("cannot combine cursor with block-range filters")]
    CursorWithRange,

    #[error("fromBlock {from} cannot be greater than toBlock {to}")]
    InvalidRange { from: u64, to: u64 },

    #[error("invalid or corrupted cursor: {0}")]
    InvalidCursor(#[from] CursorError),

    #[error("invalid value bound '{0}'")]
    InvalidValue(String),

    #[error(transparent)]
    Store(#[from] IndexerError),
}

impl QueryError {
    /// Stable code for API layers.
    pub fn code(&self) -> &'static str {
        match self {
            Self::CursorWithRange => "BAD_REQUEST",
            Self::InvalidRange { .. } => "INVALID_RANGE",
            Self::InvalidCursor(_) => "INVALID_CURSOR",
            Self::InvalidValue(_) => "BAD_REQUEST",
            Self::Store(_) => "INTERNAL",
        }
    }
}

/// Filters for one page of transfers. Every field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransferQuery {
    pub chain_id: Option<String>,
    pub from_block: Option<u64>,
    pub to_block: Option<u64>,
    pub address: Option<String>,
    pub token: Option<String>,
    /// Decimal raw-unit bound, inclusive.
    pub min_value: Option<String>,
    pub max_value: Option<String>,
    pub from_timestamp: Option<i64>,
    pub to_timestamp: Option<i64>,
    pub cursor: Option<String>,
    pub limit: Option<usize>,
    pub direction: Option<Direction>,
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferPage {
    pub items: Vec<Transfer>,
    /// Present only when the page came back full.
    pub next_cursor: Option<String>,
}

impl TransferQuery {
    /// Check the request and resolve defaults.
    pub fn validate(&self, default_chain: &str) -> Result<SeekRequest, QueryError> {
        let has_range = self.from_block.is_some() || self.to_block.is_some();
        if self.cursor.is_some() && has_range {
            return Err(QueryError::CursorWithRange);
        }
        if let (Some(from), Some(to)) = (self.from_block, self.to_block) {
            if from > to {
                return Err(QueryError::InvalidRange { from, to });
            }
        }
        let after = self
            .cursor
            .as_deref()
            .map(PaginationCursor::decode)
            .transpose()?;

        Ok(SeekRequest {
            chain_id: self.chain_id.clone().unwrap_or_else(|| default_chain.to_string()),
            from_block: self.from_block,
            to_block: self.to_block,
            address: self.address.clone(),
            token: self.token.clone(),
            min_value: parse_bound(self.min_value.as_deref())?,
            max_value: parse_bound(self.max_value.as_deref())?,
            from_timestamp: self.from_timestamp,
            to_timestamp: self.to_timestamp,
            after,
            direction: self.direction.unwrap_or_default(),
            limit: self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT),
        })
    }
}

fn parse_bound(raw: Option<&str>) -> Result<Option<U256>, QueryError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => U256::from_str_radix(s, 10)
            .map(Some)
            .map_err(|_| QueryError::InvalidValue(s.to_string())),
    }
}

/// Fetch one page of transfers after validating `query`.
pub async fn list_transfers(
    store: &dyn LedgerStore,
    default_chain: &str,
    query: &TransferQuery,
) -> Result<TransferPage, QueryError> {
    let request = query.validate(default_chain)?;
    let items = store.seek_transfers(&request).await?;

    let next_cursor = if items.len() == request.limit {
        items.last().map(|t| PaginationCursor::after(t).encode())
    } else {
        None
    };

    Ok(TransferPage { items, next_cursor })
}
