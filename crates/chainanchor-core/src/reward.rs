//! Reward owed to the prover of a batch.
//!
//! `reward(n) = min(base + per_unit * n, cap)`, with `cap` optional. The same
//! function prices dry-run estimates and live submissions.

use alloy_primitives::U256;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RewardError {
    #[error("invalid token amount '{0}'")]
    InvalidAmount(String),

    #[error("amount '{amount}' has more than {decimals} decimal places")]
    TooPrecise { amount: String, decimals: u8 },
}

/// Linear reward with an optional ceiling, in raw token units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RewardPolicy {
    pub base: U256,
    pub per_unit: U256,
    pub cap: Option<U256>,
}

impl RewardPolicy {
    pub fn new(base: U256, per_unit: U256, cap: Option<U256>) -> Self {
        Self { base, per_unit, cap }
    }

    /// Build from human-readable token amounts (e.g. `"1.5"`) scaled by
    /// `decimals`.
    pub fn from_decimal_strings(
        base: &str,
        per_unit: &str,
        cap: Option<&str>,
        decimals: u8,
    ) -> Result<Self, RewardError> {
        Ok(Self {
            base: parse_units(base, decimals)?,
            per_unit: parse_units(per_unit, decimals)?,
            cap: cap.map(|c| parse_units(c, decimals)).transpose()?,
        })
    }

    /// Reward for a batch with `units` transfers. Saturates instead of
    /// overflowing.
    pub fn reward(&self, units: u64) -> U256 {
        let uncapped = self
            .base
            .saturating_add(self.per_unit.saturating_mul(U256::from(units)));
        match self.cap {
            Some(cap) => uncapped.min(cap),
            None => uncapped,
        }
    }
}

/// Parse a non-negative decimal token amount into raw units.
pub fn parse_units(amount: &str, decimals: u8) -> Result<U256, RewardError> {
    let trimmed = amount.trim();
    let invalid = || RewardError::InvalidAmount(amount.to_string());

    let (whole, frac) = match trimmed.split_once('.') {
        Some((w, f)) => (w, f),
        None => (trimmed, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return Err(invalid());
    }
    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(whole) || !all_digits(frac) {
        return Err(invalid());
    }
    if frac.len() > decimals as usize {
        return Err(RewardError::TooPrecise {
            amount: amount.to_string(),
            decimals,
        });
    }

    let digits = format!("{whole}{frac:0<width$}", width = decimals as usize);
    let digits = digits.trim_start_matches('0');
    if digits.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str_radix(digits, 10).map_err(|_| invalid())
}

/// Render raw units as a decimal token amount (`1500000000000000000`, 18 → `"1.5"`).
pub fn format_units(value: U256, decimals: u8) -> String {
    let raw = value.to_string();
    let decimals = decimals as usize;
    if decimals == 0 {
        return raw;
    }
    let padded = format!("{raw:0>width$}", width = decimals + 1);
    let (whole, frac) = padded.split_at(padded.len() - decimals);
    let frac = frac.trim_end_matches('0');
    if frac.is_empty() {
        whole.to_string()
    } else {
        format!("{whole}.{frac}")
    }
}
