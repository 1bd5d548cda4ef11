//! Decimal helpers for the string boundary
//!
//! Numeric fields are held as `Decimal` in memory and as strings in the
//! external store. Formatting always normalizes so the same value is written
//! the same way regardless of the scale it was computed with.

use std::str::FromStr;

use rust_decimal::Decimal;
use thiserror::Error;

/// Errors raised while reading a decimal from its string form
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NumericError {
    #[error("empty decimal string")]
    Empty,

    #[error("invalid decimal: {0}")]
    Invalid(String),
}

/// Parse a decimal written by this service or by an upstream producer.
///
/// Accepts plain and scientific notation; surrounding whitespace is ignored.
pub fn parse_decimal(raw: &str) -> Result<Decimal, NumericError> {
    let s = raw.trim();
    if s.is_empty() {
        return Err(NumericError::Empty);
    }

    Decimal::from_str(s)
        .or_else(|_| Decimal::from_scientific(s))
        .map_err(|_| NumericError::Invalid(s.to_string()))
}

/// Canonical string form used when writing to the store.
pub fn format_decimal(value: Decimal) -> String {
    value.normalize().to_string()
}

/// Whether a value is strictly positive
pub fn is_positive(value: Decimal) -> bool {
    value > Decimal::ZERO
}
