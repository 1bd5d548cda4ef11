//! Order side types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Order side (buyer or seller)
///
/// Top-of-book quotes use the same vocabulary: a buy quote is the bid, a sell
/// quote is the ask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    #[serde(alias = "BUY", alias = "Buy")]
    Buy,
    #[serde(alias = "SELL", alias = "Sell")]
    Sell,
}

impl Side {
    /// Side implied by a signed order volume (positive volume buys)
    pub fn from_signed_volume(volume: rust_decimal::Decimal) -> Self {
        if volume > rust_decimal::Decimal::ZERO {
            Side::Buy
        } else {
            Side::Sell
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}
