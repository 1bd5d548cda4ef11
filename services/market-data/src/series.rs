//! Windowed series store
//!
//! One append-only, time-scored series per (instrument, metric). Entries are
//! stored as codec payloads in a sorted set whose score is the event time in
//! Unix seconds, so "everything inside the window" is a single score range.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;
use types::ids::InstrumentId;
use uuid::Uuid;

use crate::codec::{self, Timestamped};
use crate::error::MarketDataError;
use crate::store::{keys, MarketStore, ScoreBound};

/// Metrics kept as windowed series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Metric {
    BaseVolume,
    QuoteVolume,
    /// One sample per bucket: the first trade price seen in that bucket.
    OpenPrice,
    High,
    Low,
}

impl Metric {
    pub fn all() -> &'static [Metric] {
        &[
            Metric::BaseVolume,
            Metric::QuoteVolume,
            Metric::OpenPrice,
            Metric::High,
            Metric::Low,
        ]
    }

    /// Segment used in the store key.
    pub fn key_segment(&self) -> &'static str {
        match self {
            Metric::BaseVolume => "BaseVolume",
            Metric::QuoteVolume => "QuoteVolume",
            Metric::OpenPrice => "OpenPrice",
            Metric::High => "High",
            Metric::Low => "Low",
        }
    }
}

/// Rolling aggregates over one window scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowAggregate {
    pub base_volume: Decimal,
    pub quote_volume: Decimal,
    pub high: Option<Decimal>,
    pub low: Option<Decimal>,
    /// Earliest open-price sample in the window.
    pub open_price: Option<Decimal>,
}

impl WindowAggregate {
    /// Relative change from the window's open price to `last`.
    ///
    /// `None` when there is no open sample or it is not positive.
    pub fn price_change(&self, last: Decimal) -> Option<Decimal> {
        let open = self.open_price.filter(|p| *p > Decimal::ZERO)?;
        last.checked_sub(open)?.checked_div(open)
    }
}

/// Series operations over a shared store.
#[derive(Clone)]
pub struct SeriesStore {
    store: Arc<dyn MarketStore>,
}

impl SeriesStore {
    pub fn new(store: Arc<dyn MarketStore>) -> Self {
        Self { store }
    }

    /// Append `value` at event time `at` as a new entry.
    ///
    /// Each call adds a distinct member, so equal values at the same instant
    /// all count.
    pub async fn append(
        &self,
        instrument: &InstrumentId,
        metric: Metric,
        value: Decimal,
        at: DateTime<Utc>,
    ) -> Result<(), MarketDataError> {
        let tag = Uuid::now_v7().simple().to_string();
        self.append_keyed(instrument, metric, value, at, &tag).await
    }

    /// Append `value` at event time `at` under a caller-chosen entry key.
    ///
    /// Appending the same `(value, at, key)` again leaves a single entry,
    /// which keeps a redelivered batch from counting twice.
    pub async fn append_keyed(
        &self,
        instrument: &InstrumentId,
        metric: Metric,
        value: Decimal,
        at: DateTime<Utc>,
        key: &str,
    ) -> Result<(), MarketDataError> {
        let payload = codec::encode_tagged(&value.normalize(), at, key)
            .map_err(|e| MarketDataError::MalformedEvent(e.to_string()))?;

        self.store
            .zadd(&keys::series(instrument, metric), codec::score(at), &payload)
            .await?;
        Ok(())
    }

    /// Entries with event time in `[from, to]`, ascending by score.
    ///
    /// Payloads that fail to decode are logged and skipped.
    pub async fn range_scan(
        &self,
        instrument: &InstrumentId,
        metric: Metric,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Timestamped<Decimal>>, MarketDataError> {
        let key = keys::series(instrument, metric);
        let members = self
            .store
            .zrange_by_score(
                &key,
                ScoreBound::Inclusive(codec::score(from)),
                ScoreBound::Inclusive(codec::score(to)),
            )
            .await?;

        Ok(members
            .iter()
            .filter_map(|member| match codec::decode::<Decimal>(member) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(key = %key, error = %e, "Skipping undecodable series entry");
                    None
                }
            })
            .collect())
    }

    /// Delete entries with score in range, returning the number removed.
    pub async fn range_delete(
        &self,
        instrument: &InstrumentId,
        metric: Metric,
        from: ScoreBound,
        to: ScoreBound,
    ) -> Result<u64, MarketDataError> {
        let removed = self
            .store
            .zrem_range_by_score(&keys::series(instrument, metric), from, to)
            .await?;
        Ok(removed)
    }

    /// Scan all five series over `[now - window, now]` concurrently.
    pub async fn aggregate_window(
        &self,
        instrument: &InstrumentId,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<WindowAggregate, MarketDataError> {
        let from = now
            .checked_sub_signed(window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let (base, quote, open, high, low) = futures::try_join!(
            self.range_scan(instrument, Metric::BaseVolume, from, now),
            self.range_scan(instrument, Metric::QuoteVolume, from, now),
            self.range_scan(instrument, Metric::OpenPrice, from, now),
            self.range_scan(instrument, Metric::High, from, now),
            self.range_scan(instrument, Metric::Low, from, now),
        )?;

        Ok(WindowAggregate {
            base_volume: base.iter().map(|e| e.value).sum(),
            quote_volume: quote.iter().map(|e| e.value).sum(),
            high: high.iter().map(|e| e.value).max(),
            low: low.iter().map(|e| e.value).min(),
            open_price: open.first().map(|e| e.value),
        })
    }
}
