//! Long-term ticker read model mirror
//!
//! After each notification the aggregator upserts a [`Ticker`]; each quote
//! upserts one side of a [`PriceRecord`]. A quote for an instrument with no
//! row yet creates the row with only that side set, so the mirror fills in
//! from quotes alone. The mirror is best effort: callers log failures as
//! `DownstreamWriteFailure` and carry on.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use types::ids::InstrumentId;
use types::order::Side;

use crate::error::MarketDataError;
use crate::events::MarketDataChangedEvent;

/// Mirrored ticker row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticker {
    pub asset_pair_id: InstrumentId,
    pub volume_base: Decimal,
    pub volume_quote: Decimal,
    pub price_change: Decimal,
    pub last_price: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl Ticker {
    pub fn from_event(event: &MarketDataChangedEvent, updated_at: DateTime<Utc>) -> Self {
        Self {
            asset_pair_id: event.asset_pair_id.clone(),
            volume_base: event.volume_base,
            volume_quote: event.volume_quote,
            price_change: event.price_change.unwrap_or(Decimal::ZERO),
            last_price: event.last_price,
            high: event.high,
            low: event.low,
            updated_at,
        }
    }
}

/// Mirrored top-of-book row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceRecord {
    pub asset_pair_id: InstrumentId,
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
    pub updated_at: DateTime<Utc>,
}

/// Writer for the downstream read model.
#[async_trait]
pub trait TickerWriter: Send + Sync {
    async fn upsert_ticker(&self, ticker: Ticker) -> Result<(), MarketDataError>;

    /// Set one side of the price row, creating the row when absent.
    async fn upsert_price(
        &self,
        instrument: &InstrumentId,
        side: Side,
        price: Decimal,
        at: DateTime<Utc>,
    ) -> Result<(), MarketDataError>;
}

/// Process-local read model.
#[derive(Debug, Default)]
pub struct InMemoryTickerWriter {
    tickers: DashMap<InstrumentId, Ticker>,
    prices: DashMap<InstrumentId, PriceRecord>,
    failing: AtomicBool,
}

impl InMemoryTickerWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// While failing, every write returns `DownstreamWriteFailure`.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn ticker(&self, instrument: &InstrumentId) -> Option<Ticker> {
        self.tickers.get(instrument).map(|t| t.clone())
    }

    pub fn price(&self, instrument: &InstrumentId) -> Option<PriceRecord> {
        self.prices.get(instrument).map(|p| p.clone())
    }

    fn check(&self) -> Result<(), MarketDataError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(MarketDataError::DownstreamWriteFailure(
                "ticker read model unavailable".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl TickerWriter for InMemoryTickerWriter {
    async fn upsert_ticker(&self, ticker: Ticker) -> Result<(), MarketDataError> {
        self.check()?;
        self.tickers.insert(ticker.asset_pair_id.clone(), ticker);
        Ok(())
    }

    async fn upsert_price(
        &self,
        instrument: &InstrumentId,
        side: Side,
        price: Decimal,
        at: DateTime<Utc>,
    ) -> Result<(), MarketDataError> {
        self.check()?;
        let mut record = self
            .prices
            .entry(instrument.clone())
            .or_insert_with(|| PriceRecord {
                asset_pair_id: instrument.clone(),
                bid: None,
                ask: None,
                updated_at: at,
            });
        match side {
            Side::Buy => record.bid = Some(price),
            Side::Sell => record.ask = Some(price),
        }
        record.updated_at = at;
        Ok(())
    }
}
