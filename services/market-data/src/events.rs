//! Event definitions for the Market Data Service
//!
//! Inbound: trade-match batches from the limit-orders stream and top-of-book
//! quotes. Outbound: one [`MarketDataChangedEvent`] per aggregated order.
//! All wire formats are JSON with camelCase field names; decimals are accepted
//! either as JSON numbers or strings.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use types::ids::{AssetId, InstrumentId, OrderId};
use types::order::Side;

/// A batch of limit-order execution reports.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitOrdersMessage {
    #[serde(default)]
    pub orders: Vec<LimitOrderWithTrades>,
}

impl LimitOrdersMessage {
    /// Every trade in the batch, across all orders.
    pub fn all_trades(&self) -> impl Iterator<Item = &LimitTrade> {
        self.orders.iter().flat_map(|o| o.trades.iter())
    }
}

/// One order's execution report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitOrderWithTrades {
    pub order: LimitOrder,
    #[serde(default)]
    pub trades: Vec<LimitTrade>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitOrder {
    pub id: OrderId,
    pub asset_pair_id: InstrumentId,
    /// Signed volume: positive buys, negative sells.
    pub volume: Decimal,
}

impl LimitOrder {
    pub fn side(&self) -> Side {
        Side::from_signed_volume(self.volume)
    }

    pub fn is_buy(&self) -> bool {
        self.side() == Side::Buy
    }
}

/// A single fill as reported by one of the two matched orders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitTrade {
    pub price: Decimal,
    /// Volume of `asset`.
    pub volume: Decimal,
    /// Volume of the opposite leg.
    pub opposite_volume: Decimal,
    pub asset: AssetId,
    #[serde(default, alias = "oppositeAsset")]
    pub opposite_asset_id: Option<AssetId>,
    pub opposite_order_id: OrderId,
    pub timestamp: DateTime<Utc>,
    /// Fill position within the match; also disambiguates same-timestamp fills.
    #[serde(default)]
    pub index: i64,
}

impl LimitTrade {
    /// Event time used for series entries: the trade timestamp shifted by
    /// `index` milliseconds, so fills sharing a timestamp stay distinct.
    pub fn event_time(&self) -> DateTime<Utc> {
        Duration::try_milliseconds(self.index)
            .and_then(|offset| self.timestamp.checked_add_signed(offset))
            .unwrap_or(self.timestamp)
    }

    /// `(base volume, quote volume)` given the instrument's base asset.
    ///
    /// A trade may report either leg first; when `asset` is not the base the
    /// volumes are swapped.
    pub fn volumes_for(&self, base_asset: &AssetId) -> (Decimal, Decimal) {
        if &self.asset == base_asset {
            (self.volume, self.opposite_volume)
        } else {
            (self.opposite_volume, self.volume)
        }
    }
}

/// Top-of-book quote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteMessage {
    #[serde(alias = "assetPair", alias = "assetPairId")]
    pub instrument: InstrumentId,
    pub side: Side,
    pub price: Decimal,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Outbound tick, one per aggregated order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketDataChangedEvent {
    pub asset_pair_id: InstrumentId,
    pub volume_base: Decimal,
    pub volume_quote: Decimal,
    /// Unset when the window has no positive open price.
    pub price_change: Option<Decimal>,
    pub last_price: Decimal,
    pub high: Decimal,
    pub low: Decimal,
}
