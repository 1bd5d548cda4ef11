//! Asset pair metadata lookup
//!
//! The aggregator only needs the base asset of an instrument, to tell which
//! leg of a fill is the base volume. The lookup is a read model owned by
//! another service; [`StaticAssetPairs`] is the configuration-seeded variant.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use types::ids::{AssetId, InstrumentId};

use crate::error::MarketDataError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetPair {
    pub id: InstrumentId,
    pub base_asset_id: AssetId,
    pub quoting_asset_id: AssetId,
}

/// Read-only asset pair metadata.
pub trait AssetPairLookup: Send + Sync {
    fn get(&self, instrument: &InstrumentId) -> Option<AssetPair>;

    /// Base asset of `instrument`, or `UnknownInstrument`.
    fn resolve_base_asset(&self, instrument: &InstrumentId) -> Result<AssetId, MarketDataError> {
        self.get(instrument)
            .map(|pair| pair.base_asset_id)
            .ok_or_else(|| MarketDataError::UnknownInstrument(instrument.to_string()))
    }
}

/// Fixed set of asset pairs.
#[derive(Debug, Clone, Default)]
pub struct StaticAssetPairs {
    pairs: HashMap<InstrumentId, AssetPair>,
}

impl StaticAssetPairs {
    pub fn new(pairs: impl IntoIterator<Item = AssetPair>) -> Self {
        Self {
            pairs: pairs.into_iter().map(|p| (p.id.clone(), p)).collect(),
        }
    }

    /// Parse `PAIR:BASE:QUOTE` entries separated by commas.
    pub fn parse_list(raw: &str) -> Result<Self, MarketDataError> {
        let mut pairs = Vec::new();
        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let parts: Vec<&str> = entry.split(':').map(str::trim).collect();
            match parts.as_slice() {
                [id, base, quote] if !id.is_empty() && !base.is_empty() && !quote.is_empty() => {
                    pairs.push(AssetPair {
                        id: InstrumentId::new(*id),
                        base_asset_id: AssetId::new(*base),
                        quoting_asset_id: AssetId::new(*quote),
                    });
                }
                _ => {
                    return Err(MarketDataError::Config(format!(
                        "asset pair entry must be PAIR:BASE:QUOTE, got {:?}",
                        entry
                    )))
                }
            }
        }
        Ok(Self::new(pairs))
    }

    /// Configured instruments, sorted.
    pub fn instruments(&self) -> Vec<InstrumentId> {
        let mut ids: Vec<_> = self.pairs.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

impl AssetPairLookup for StaticAssetPairs {
    fn get(&self, instrument: &InstrumentId) -> Option<AssetPair> {
        self.pairs.get(instrument).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list() {
        let pairs = StaticAssetPairs::parse_list("BTCUSD:BTC:USD, ETHUSD:ETH:USD,").unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(
            pairs.instruments(),
            vec![InstrumentId::new("BTCUSD"), InstrumentId::new("ETHUSD")]
        );
        assert_eq!(
            pairs.resolve_base_asset(&InstrumentId::new("ETHUSD")).unwrap(),
            AssetId::new("ETH")
        );
    }

    #[test]
    fn test_parse_list_rejects_bad_entries() {
        assert!(StaticAssetPairs::parse_list("BTCUSD:BTC").is_err());
        assert!(StaticAssetPairs::parse_list("BTCUSD::USD").is_err());
        assert!(StaticAssetPairs::parse_list("").unwrap().is_empty());
    }

    #[test]
    fn test_unknown_instrument() {
        let pairs = StaticAssetPairs::default();
        let err = pairs
            .resolve_base_asset(&InstrumentId::new("XYZ"))
            .unwrap_err();
        assert_eq!(err, MarketDataError::UnknownInstrument("XYZ".into()));
    }
}
