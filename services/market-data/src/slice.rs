//! Market slice and the snapshot map
//!
//! A [`MarketSlice`] is the externally visible state of one instrument. The
//! snapshot map caches it as a store hash with one field per slice field;
//! numeric values cross the store boundary as normalized decimal strings.
//!
//! Field mapping goes through the [`SliceField`] table rather than any
//! generic serializer, so hash field names are fixed independently of the
//! JSON shape.

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;
use types::ids::InstrumentId;
use types::numeric::{format_decimal, parse_decimal};

use crate::error::MarketDataError;
use crate::store::{keys, MarketStore};

/// Hash field holding the instrument key.
pub const INSTRUMENT_FIELD: &str = "AssetPairId";

/// Aggregate statistics for one instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketSlice {
    pub asset_pair_id: InstrumentId,
    pub volume_base: Option<Decimal>,
    pub volume_quote: Option<Decimal>,
    pub price_change: Option<Decimal>,
    pub last_price: Option<Decimal>,
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
    pub high: Option<Decimal>,
    pub low: Option<Decimal>,
}

impl MarketSlice {
    /// Slice with every numeric field unset.
    pub fn empty(instrument: InstrumentId) -> Self {
        Self {
            asset_pair_id: instrument,
            volume_base: None,
            volume_quote: None,
            price_change: None,
            last_price: None,
            bid: None,
            ask: None,
            high: None,
            low: None,
        }
    }

    pub fn set(&mut self, field: SliceField, value: Option<Decimal>) {
        let slot = match field {
            SliceField::VolumeBase => &mut self.volume_base,
            SliceField::VolumeQuote => &mut self.volume_quote,
            SliceField::PriceChange => &mut self.price_change,
            SliceField::LastPrice => &mut self.last_price,
            SliceField::Bid => &mut self.bid,
            SliceField::Ask => &mut self.ask,
            SliceField::High => &mut self.high,
            SliceField::Low => &mut self.low,
        };
        *slot = value;
    }

    /// Rebuild a slice from a stored hash.
    ///
    /// Unknown fields are ignored; unparseable values read as unset.
    pub fn from_hash(instrument: InstrumentId, hash: &HashMap<String, String>) -> Self {
        let mut slice = MarketSlice::empty(instrument);
        for (name, raw) in hash {
            let Some(field) = SliceField::from_name(name) else {
                continue;
            };
            match parse_decimal(raw) {
                Ok(value) => slice.set(field, Some(value)),
                Err(e) => {
                    debug!(instrument = %slice.asset_pair_id, field = field.name(), error = %e, "Ignoring unparseable slice field");
                }
            }
        }
        slice
    }
}

/// Numeric slice fields and their hash field names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SliceField {
    VolumeBase,
    VolumeQuote,
    PriceChange,
    LastPrice,
    Bid,
    Ask,
    High,
    Low,
}

impl SliceField {
    pub const ALL: [SliceField; 8] = [
        SliceField::VolumeBase,
        SliceField::VolumeQuote,
        SliceField::PriceChange,
        SliceField::LastPrice,
        SliceField::Bid,
        SliceField::Ask,
        SliceField::High,
        SliceField::Low,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SliceField::VolumeBase => "VolumeBase",
            SliceField::VolumeQuote => "VolumeQuote",
            SliceField::PriceChange => "PriceChange",
            SliceField::LastPrice => "LastPrice",
            SliceField::Bid => "Bid",
            SliceField::Ask => "Ask",
            SliceField::High => "High",
            SliceField::Low => "Low",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        SliceField::ALL.into_iter().find(|f| f.name() == name)
    }
}

/// Per-instrument cached slice fields.
#[derive(Clone)]
pub struct SnapshotMap {
    store: Arc<dyn MarketStore>,
}

impl SnapshotMap {
    pub fn new(store: Arc<dyn MarketStore>) -> Self {
        Self { store }
    }

    /// Cached slice; an instrument never written reads as an empty slice.
    pub async fn read(&self, instrument: &InstrumentId) -> Result<MarketSlice, MarketDataError> {
        let hash = self.store.hgetall(&keys::slice(instrument)).await?;
        Ok(MarketSlice::from_hash(instrument.clone(), &hash))
    }

    /// Overwrite the given fields, leaving the others untouched.
    pub async fn write(
        &self,
        instrument: &InstrumentId,
        fields: &[(SliceField, Decimal)],
    ) -> Result<(), MarketDataError> {
        let mut entries = Vec::with_capacity(fields.len() + 1);
        entries.push((INSTRUMENT_FIELD, instrument.to_string()));
        entries.extend(
            fields
                .iter()
                .map(|(field, value)| (field.name(), format_decimal(*value))),
        );

        self.store.hset(&keys::slice(instrument), &entries).await?;
        Ok(())
    }
}
