//! Exact conversion between smallest-unit integers and display decimals.

use std::fmt;

use num_bigint::BigUint;
use num_traits::{Num, Zero};
use serde::{Serialize, Serializer};
use thiserror::Error;

/// Unit parse error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnitsError {
    #[error("Empty quantity")]
    Empty,
    #[error("Invalid quantity: {0}")]
    Invalid(String),
}

/// Parse an integer quantity in the smallest unit.
///
/// Accepts `0x`-prefixed hex (JSON-RPC quantities) and plain decimal strings.
pub fn parse_quantity(raw: &str) -> Result<BigUint, UnitsError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(UnitsError::Empty);
    }
    let (digits, radix) = match trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        Some(hex) => (hex, 16),
        None => (trimmed, 10),
    };
    if digits.is_empty() {
        return Err(UnitsError::Empty);
    }
    BigUint::from_str_radix(digits, radix).map_err(|_| UnitsError::Invalid(trimmed.to_string()))
}

/// Format a smallest-unit integer as a decimal string with `decimals` places,
/// trimming trailing zeros.
#[must_use]
pub fn format_units(value: &BigUint, decimals: u8) -> String {
    if decimals == 0 {
        return value.to_str_radix(10);
    }
    let scale = BigUint::from(10u8).pow(u32::from(decimals));
    let whole = value / &scale;
    let frac = value % &scale;
    if frac.is_zero() {
        return whole.to_str_radix(10);
    }
    let frac = format!("{:0>width$}", frac.to_str_radix(10), width = usize::from(decimals));
    format!("{}.{}", whole.to_str_radix(10), frac.trim_end_matches('0'))
}

/// A native-token balance: smallest-unit amount plus the chain's exponent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Balance {
    raw: BigUint,
    decimals: u8,
}

impl Balance {
    /// Create a balance from a smallest-unit amount.
    #[must_use]
    pub const fn new(raw: BigUint, decimals: u8) -> Self {
        Self { raw, decimals }
    }

    /// Parse a smallest-unit quantity string.
    ///
    /// # Errors
    /// Returns error if the quantity is not a valid integer.
    pub fn from_quantity(raw: &str, decimals: u8) -> Result<Self, UnitsError> {
        Ok(Self::new(parse_quantity(raw)?, decimals))
    }
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_units(&self.raw, self.decimals))
    }
}

impl Serialize for Balance {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
