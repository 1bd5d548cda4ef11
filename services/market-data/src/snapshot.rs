//! Snapshot reader
//!
//! Answers point and bulk reads by overlaying a live window scan on the
//! cached snapshot map. Volumes always come from the scan. High, low and
//! price change are overlaid only when the window yields a value, so an
//! instrument without recent trades keeps its last known extremes.
//!
//! Reads never mutate the store and are not linearizable against writers.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tracing::warn;
use types::ids::InstrumentId;

use crate::error::MarketDataError;
use crate::index::InstrumentIndex;
use crate::metrics::ServiceMetrics;
use crate::series::SeriesStore;
use crate::slice::{MarketSlice, SnapshotMap};
use crate::window::WindowSettings;

#[derive(Clone)]
pub struct SnapshotReader {
    series: SeriesStore,
    snapshot: SnapshotMap,
    index: InstrumentIndex,
    settings: WindowSettings,
    metrics: Arc<ServiceMetrics>,
}

impl SnapshotReader {
    pub fn new(
        series: SeriesStore,
        snapshot: SnapshotMap,
        index: InstrumentIndex,
        settings: WindowSettings,
        metrics: Arc<ServiceMetrics>,
    ) -> Self {
        Self {
            series,
            snapshot,
            index,
            settings,
            metrics,
        }
    }

    /// Current state of `instrument`; unknown instruments read as empty.
    pub async fn get_snapshot(
        &self,
        instrument: &InstrumentId,
    ) -> Result<MarketSlice, MarketDataError> {
        self.snapshot_at(instrument, Utc::now()).await
    }

    /// State of `instrument` for the window ending at `now`.
    pub async fn snapshot_at(
        &self,
        instrument: &InstrumentId,
        now: DateTime<Utc>,
    ) -> Result<MarketSlice, MarketDataError> {
        let started = Instant::now();

        let (mut slice, window) = futures::try_join!(
            self.snapshot.read(instrument),
            self.series
                .aggregate_window(instrument, now, self.settings.window),
        )?;

        slice.volume_base = Some(window.base_volume);
        slice.volume_quote = Some(window.quote_volume);
        if let Some(high) = window.high {
            slice.high = Some(high);
        }
        if let Some(low) = window.low {
            slice.low = Some(low);
        }
        if let Some(change) = slice.last_price.and_then(|last| window.price_change(last)) {
            slice.price_change = Some(change);
        }

        self.metrics
            .record_snapshot(started.elapsed().as_micros() as u64);
        Ok(slice)
    }

    /// Every indexed instrument; failing instruments are logged and omitted.
    pub async fn get_all_snapshots(&self) -> Result<Vec<MarketSlice>, MarketDataError> {
        self.all_at(Utc::now()).await
    }

    pub async fn all_at(&self, now: DateTime<Utc>) -> Result<Vec<MarketSlice>, MarketDataError> {
        let instruments = self.index.members().await?;

        let results = join_all(
            instruments
                .iter()
                .map(|instrument| self.snapshot_at(instrument, now)),
        )
        .await;

        Ok(instruments
            .iter()
            .zip(results)
            .filter_map(|(instrument, result)| match result {
                Ok(slice) => Some(slice),
                Err(e) => {
                    warn!(instrument = %instrument, error = %e, "Omitting instrument from bulk snapshot");
                    None
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::Metric;
    use crate::slice::SliceField;
    use crate::store::InMemoryStore;
    use chrono::{Duration, TimeZone};
    use rust_decimal::Decimal;

    struct Fixture {
        store: Arc<InMemoryStore>,
        series: SeriesStore,
        snapshot: SnapshotMap,
        index: InstrumentIndex,
        reader: SnapshotReader,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let series = SeriesStore::new(store.clone());
        let snapshot = SnapshotMap::new(store.clone());
        let index = InstrumentIndex::new(store.clone());
        let reader = SnapshotReader::new(
            series.clone(),
            snapshot.clone(),
            index.clone(),
            WindowSettings::new(3600, 300).unwrap(),
            Arc::new(ServiceMetrics::new()),
        );
        Fixture {
            store,
            series,
            snapshot,
            index,
            reader,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_unknown_instrument_reads_default() {
        let f = fixture();
        let slice = f
            .reader
            .snapshot_at(&InstrumentId::new("NOPE"), now())
            .await
            .unwrap();
        assert_eq!(slice.asset_pair_id, InstrumentId::new("NOPE"));
        assert_eq!(slice.volume_base, Some(Decimal::ZERO));
        assert_eq!(slice.high, None);
        assert_eq!(slice.price_change, None);
    }

    #[tokio::test]
    async fn test_overlay_window_values() {
        let f = fixture();
        let btc = InstrumentId::new("BTCUSD");
        let t = now() - Duration::minutes(10);

        f.snapshot
            .write(
                &btc,
                &[
                    (SliceField::LastPrice, Decimal::from(120)),
                    (SliceField::VolumeBase, Decimal::from(999)),
                    (SliceField::High, Decimal::from(500)),
                ],
            )
            .await
            .unwrap();
        f.series.append(&btc, Metric::BaseVolume, Decimal::from(4), t).await.unwrap();
        f.series.append(&btc, Metric::OpenPrice, Decimal::from(100), t).await.unwrap();
        f.series.append(&btc, Metric::High, Decimal::from(130), t).await.unwrap();

        let slice = f.reader.snapshot_at(&btc, now()).await.unwrap();
        assert_eq!(slice.volume_base, Some(Decimal::from(4)));
        assert_eq!(slice.volume_quote, Some(Decimal::ZERO));
        assert_eq!(slice.high, Some(Decimal::from(130)));
        assert_eq!(slice.price_change, Some(Decimal::new(2, 1)));
    }

    #[tokio::test]
    async fn test_stale_extremes_kept_when_window_empty() {
        let f = fixture();
        let btc = InstrumentId::new("BTCUSD");
        f.snapshot
            .write(
                &btc,
                &[
                    (SliceField::High, Decimal::from(50)),
                    (SliceField::Low, Decimal::from(40)),
                    (SliceField::PriceChange, Decimal::new(5, 2)),
                ],
            )
            .await
            .unwrap();
        f.series
            .append(&btc, Metric::High, Decimal::from(70), now() - Duration::hours(3))
            .await
            .unwrap();

        let slice = f.reader.snapshot_at(&btc, now()).await.unwrap();
        assert_eq!(slice.high, Some(Decimal::from(50)));
        assert_eq!(slice.low, Some(Decimal::from(40)));
        assert_eq!(slice.price_change, Some(Decimal::new(5, 2)));
        assert_eq!(slice.volume_base, Some(Decimal::ZERO));
    }

    #[tokio::test]
    async fn test_get_all_snapshots() {
        let f = fixture();
        for id in ["BTCUSD", "ETHUSD"] {
            f.index.add(&InstrumentId::new(id)).await.unwrap();
        }

        let mut slices = f.reader.all_at(now()).await.unwrap();
        slices.sort_by(|a, b| a.asset_pair_id.cmp(&b.asset_pair_id));
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].asset_pair_id, InstrumentId::new("BTCUSD"));
    }

    #[tokio::test]
    async fn test_index_failure_surfaces() {
        let f = fixture();
        f.store.set_available(false);
        assert!(f.reader.all_at(now()).await.is_err());
    }
}
