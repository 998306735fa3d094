//! Merkle commitment over an ordered list of ERC-20 transfers.
//!
//! # Leaf encoding
//!
//! Each leaf is `keccak256` over 32-byte big-endian ABI words. The
//! [`LeafLayout`] picks which fields are committed:
//!
//! ```text
//!                          WithRecipient   WithoutRecipient
//! bytes32  tx_hash               x                x
//! uint256  log_index             x                x
//! uint256  block_number          x                x
//! address  token                 x                x      (left-padded with 12 zero bytes)
//! address  from                  x                x
//! address  to                    x
//! uint256  value                 x                x
//! ```
//!
//! `WithoutRecipient` reproduces roots already anchored by deployments that
//! never committed the recipient. Both layouts share the tree below.
//!
//! # Tree
//!
//! Adjacent nodes are hashed as `keccak256(left ‖ right)`. An unpaired node at
//! the end of a level moves up unchanged; it is never hashed with itself.
//! The root of an empty list is 32 zero bytes.
//!
//! Leaves are taken in the order given (ascending block, then log index, as
//! ingested). Reordering changes the root.

use std::str::FromStr;

use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tiny_keccak::{Hasher, Keccak};

use crate::types::Transfer;

/// Root of an empty transfer list.
pub const ZERO_ROOT: B256 = B256::ZERO;

/// A transfer field that cannot be ABI-encoded.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommitmentError {
    #[error("invalid {field} '{value}' in transfer {id}")]
    InvalidField {
        id: String,
        field: &'static str,
        value: String,
    },
}

/// Keccak-256 of `data`.
pub fn keccak256(data: &[u8]) -> B256 {
    let mut hasher = Keccak::v256();
    let mut out = [0u8; 32];
    hasher.update(data);
    hasher.finalize(&mut out);
    B256::from(out)
}

/// Which transfer fields a leaf commits to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeafLayout {
    /// Seven words, recipient included.
    #[default]
    WithRecipient,
    /// Six words, no recipient.
    WithoutRecipient,
}

impl LeafLayout {
    /// Number of ABI words hashed per leaf.
    pub fn words(self) -> usize {
        match self {
            Self::WithRecipient => 7,
            Self::WithoutRecipient => 6,
        }
    }

    /// Leaf hash for one transfer under this layout.
    pub fn leaf(self, transfer: &Transfer) -> Result<B256, CommitmentError> {
        let invalid = |field: &'static str, value: &str| CommitmentError::InvalidField {
            id: transfer.id.clone(),
            field,
            value: value.to_string(),
        };

        let tx_hash = B256::from_str(&transfer.tx_hash).map_err(|_| invalid("tx_hash", &transfer.tx_hash))?;
        let token = Address::from_str(&transfer.token).map_err(|_| invalid("token", &transfer.token))?;
        let from = Address::from_str(&transfer.from).map_err(|_| invalid("from", &transfer.from))?;
        let value = U256::from_str_radix(&transfer.value, 10).map_err(|_| invalid("value", &transfer.value))?;

        let mut encoded = Vec::with_capacity(32 * self.words());
        encoded.extend_from_slice(tx_hash.as_slice());
        encoded.extend_from_slice(&U256::from(transfer.log_index).to_be_bytes::<32>());
        encoded.extend_from_slice(&U256::from(transfer.block_number).to_be_bytes::<32>());
        push_address(&mut encoded, &token);
        push_address(&mut encoded, &from);
        if self == Self::WithRecipient {
            let to = Address::from_str(&transfer.to).map_err(|_| invalid("to", &transfer.to))?;
            push_address(&mut encoded, &to);
        }
        encoded.extend_from_slice(&value.to_be_bytes::<32>());

        Ok(keccak256(&encoded))
    }
}

fn push_address(out: &mut Vec<u8>, address: &Address) {
    out.extend_from_slice(&[0u8; 12]);
    out.extend_from_slice(address.as_slice());
}

/// Leaf hash for one transfer under the default layout.
pub fn transfer_leaf(transfer: &Transfer) -> Result<B256, CommitmentError> {
    LeafLayout::default().leaf(transfer)
}

/// Root over already-hashed leaves.
pub fn merkle_root(leaves: &[B256]) -> B256 {
    if leaves.is_empty() {
        return ZERO_ROOT;
    }

    let mut level = leaves.to_vec();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| match pair {
                [left, right] => hash_pair(left, right),
                [single] => *single,
                _ => unreachable!("chunks(2) yields one or two items"),
            })
            .collect();
    }
    level[0]
}

fn hash_pair(left: &B256, right: &B256) -> B256 {
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(left.as_slice());
    buf[32..].copy_from_slice(right.as_slice());
    keccak256(&buf)
}

/// Accumulates transfer leaves in ingestion order.
#[derive(Debug, Default, Clone)]
pub struct CommitmentBuilder {
    layout: LeafLayout,
    leaves: Vec<B256>,
}

impl CommitmentBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_layout(layout: LeafLayout) -> Self {
        Self { layout, leaves: Vec::new() }
    }

    pub fn layout(&self) -> LeafLayout {
        self.layout
    }

    /// Hash and append one transfer.
    pub fn push(&mut self, transfer: &Transfer) -> Result<(), CommitmentError> {
        self.leaves.push(self.layout.leaf(transfer)?);
        Ok(())
    }

    /// Build from an ordered transfer list under the default layout.
    pub fn from_transfers<'a>(
        transfers: impl IntoIterator<Item = &'a Transfer>,
    ) -> Result<Self, CommitmentError> {
        Self::from_transfers_with(LeafLayout::default(), transfers)
    }

    pub fn from_transfers_with<'a>(
        layout: LeafLayout,
        transfers: impl IntoIterator<Item = &'a Transfer>,
    ) -> Result<Self, CommitmentError> {
        let mut builder = Self::with_layout(layout);
        for transfer in transfers {
            builder.push(transfer)?;
        }
        Ok(builder)
    }

    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    pub fn leaves(&self) -> &[B256] {
        &self.leaves
    }

    pub fn root(&self) -> B256 {
        merkle_root(&self.leaves)
    }

    /// Root as a `0x`-prefixed lowercase hex string.
    pub fn root_hex(&self) -> String {
        format!("0x{}", hex::encode(self.root()))
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
