//! Trade aggregator
//!
//! Consumes limit-order execution batches and folds every fill into the
//! windowed series and the snapshot map.
//!
//! Per batch:
//!
//! 1. Orders whose instrument has no asset pair metadata are skipped.
//! 2. An order's fills are processed in `(timestamp, index)` order.
//! 3. A match between two limit orders of the same batch is reported by both
//!    of them; only the sell side's record is aggregated.
//! 4. Every aggregated fill overwrites `LastPrice`. Fills with a non-positive
//!    price or volume stop there.
//! 5. The first fill of each open-price bucket records the bucket's open.
//! 6. Window sums and extremes are recomputed and the fill's volumes appended.
//! 7. Once the order is done its own high/low are appended as one entry each,
//!    the snapshot map is updated and the instrument is indexed.
//! 8. The tick of the last fill per opposite order is published, then
//!    mirrored to the ticker read model.
//!
//! Store failures abort the batch so the transport can redeliver it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};
use types::ids::{AssetId, InstrumentId, OrderId};
use types::numeric::is_positive;

use crate::assets::AssetPairLookup;
use crate::codec;
use crate::error::MarketDataError;
use crate::events::{LimitOrderWithTrades, LimitOrdersMessage, LimitTrade, MarketDataChangedEvent};
use crate::index::InstrumentIndex;
use crate::ingestion::MessageHandler;
use crate::metrics::ServiceMetrics;
use crate::publisher::ChangePublisher;
use crate::series::{Metric, SeriesStore};
use crate::slice::{SliceField, SnapshotMap};
use crate::store::ScoreBound;
use crate::ticker::{Ticker, TickerWriter};
use crate::window::WindowSettings;

/// Outcome of one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub orders_processed: usize,
    pub orders_skipped: usize,
    pub trades_aggregated: usize,
    pub trades_deduplicated: usize,
    /// Fills that only updated the last price (non-positive price or volume).
    pub trades_ignored: usize,
    /// Published ticks, in publication order.
    pub notifications: Vec<MarketDataChangedEvent>,
}

/// Running high/low of one order's aggregated fills.
#[derive(Debug, Clone, Copy)]
struct Extremes {
    high: Decimal,
    low: Decimal,
}

impl Extremes {
    fn include(current: Option<Self>, price: Decimal) -> Self {
        match current {
            Some(e) => Extremes {
                high: e.high.max(price),
                low: e.low.min(price),
            },
            None => Extremes {
                high: price,
                low: price,
            },
        }
    }
}

/// Last tick computed for an order, flushed once the order is done.
struct OrderState {
    tick: MarketDataChangedEvent,
    extremes: Extremes,
    at: DateTime<Utc>,
    /// Series entry key of the order's last aggregated fill.
    key: String,
}

/// Series entry key of one fill: stable across redeliveries of the batch and
/// distinct for every fill of every order.
fn fill_key(order_id: &OrderId, trade: &LimitTrade) -> String {
    format!(
        "{}:{}:{}",
        order_id.as_str(),
        trade.opposite_order_id.as_str(),
        trade.index
    )
}

/// Batch-wide context shared by every order in the batch.
struct BatchContext<'a> {
    limit_order_ids: HashSet<&'a OrderId>,
    last_index: HashMap<&'a OrderId, i64>,
}

impl<'a> BatchContext<'a> {
    fn new(message: &'a LimitOrdersMessage) -> Self {
        let limit_order_ids = message.orders.iter().map(|o| &o.order.id).collect();

        let mut last_index: HashMap<&OrderId, i64> = HashMap::new();
        for trade in message.all_trades() {
            last_index
                .entry(&trade.opposite_order_id)
                .and_modify(|i| *i = (*i).max(trade.index))
                .or_insert(trade.index);
        }

        Self {
            limit_order_ids,
            last_index,
        }
    }

    /// Both matched orders are limit orders of this batch.
    fn is_limit_match(&self, trade: &LimitTrade) -> bool {
        self.limit_order_ids.contains(&trade.opposite_order_id)
    }

    /// Last fill reported against `trade`'s opposite order.
    fn is_last_fill(&self, trade: &LimitTrade) -> bool {
        self.last_index.get(&trade.opposite_order_id) == Some(&trade.index)
    }
}

pub struct TradeAggregator {
    series: SeriesStore,
    snapshot: SnapshotMap,
    index: InstrumentIndex,
    assets: Arc<dyn AssetPairLookup>,
    publisher: Arc<dyn ChangePublisher>,
    tickers: Arc<dyn TickerWriter>,
    settings: WindowSettings,
    metrics: Arc<ServiceMetrics>,
}

impl TradeAggregator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        series: SeriesStore,
        snapshot: SnapshotMap,
        index: InstrumentIndex,
        assets: Arc<dyn AssetPairLookup>,
        publisher: Arc<dyn ChangePublisher>,
        tickers: Arc<dyn TickerWriter>,
        settings: WindowSettings,
        metrics: Arc<ServiceMetrics>,
    ) -> Self {
        Self {
            series,
            snapshot,
            index,
            assets,
            publisher,
            tickers,
            settings,
            metrics,
        }
    }

    /// Aggregate one batch.
    pub async fn process_batch(
        &self,
        message: &LimitOrdersMessage,
    ) -> Result<BatchReport, MarketDataError> {
        let started = Instant::now();
        let mut report = BatchReport::default();
        let ctx = BatchContext::new(message);

        for order in &message.orders {
            if order.trades.is_empty() {
                continue;
            }

            let instrument = &order.order.asset_pair_id;
            let base_asset = match self.assets.resolve_base_asset(instrument) {
                Ok(asset) => asset,
                Err(e) => {
                    warn!(
                        instrument = %instrument,
                        order_id = %order.order.id,
                        error = %e,
                        "Skipping order for unknown asset pair"
                    );
                    report.orders_skipped += 1;
                    self.metrics.record_order_skipped();
                    continue;
                }
            };

            let pending = self
                .process_order(order, &base_asset, &ctx, &mut report)
                .await?;
            report.orders_processed += 1;

            for tick in pending {
                self.notify(tick, &mut report).await?;
            }
        }

        self.metrics
            .record_batch(started.elapsed().as_micros() as u64);
        debug!(
            orders = report.orders_processed,
            skipped = report.orders_skipped,
            aggregated = report.trades_aggregated,
            deduplicated = report.trades_deduplicated,
            "Processed limit orders batch"
        );
        Ok(report)
    }

    /// Aggregate one order's fills; returns the ticks to publish.
    async fn process_order(
        &self,
        order: &LimitOrderWithTrades,
        base_asset: &AssetId,
        ctx: &BatchContext<'_>,
        report: &mut BatchReport,
    ) -> Result<Vec<MarketDataChangedEvent>, MarketDataError> {
        let instrument = &order.order.asset_pair_id;

        let mut trades: Vec<&LimitTrade> = order.trades.iter().collect();
        trades.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.index.cmp(&b.index))
        });

        let mut state: Option<OrderState> = None;
        let mut pending = Vec::new();

        for trade in trades {
            if ctx.is_limit_match(trade) && order.order.is_buy() {
                debug!(
                    instrument = %instrument,
                    order_id = %order.order.id,
                    opposite_order_id = %trade.opposite_order_id,
                    "Skipping buy-side record of limit/limit match"
                );
                report.trades_deduplicated += 1;
                self.metrics.record_trade_deduplicated();
                continue;
            }

            self.snapshot
                .write(instrument, &[(SliceField::LastPrice, trade.price)])
                .await?;

            let (base_volume, quote_volume) = trade.volumes_for(base_asset);
            if !(is_positive(trade.price) && is_positive(base_volume) && is_positive(quote_volume)) {
                debug!(
                    instrument = %instrument,
                    order_id = %order.order.id,
                    price = %trade.price,
                    base_volume = %base_volume,
                    quote_volume = %quote_volume,
                    "Fill updates last price only"
                );
                report.trades_ignored += 1;
                continue;
            }

            let at = trade.event_time();
            self.record_open_price(instrument, trade.price, at).await?;

            let window = self
                .series
                .aggregate_window(instrument, at, self.settings.window)
                .await?;

            let extremes = Extremes::include(state.as_ref().map(|s| s.extremes), trade.price);
            let tick = MarketDataChangedEvent {
                asset_pair_id: instrument.clone(),
                volume_base: window.base_volume + base_volume,
                volume_quote: window.quote_volume + quote_volume,
                price_change: window.price_change(trade.price),
                last_price: trade.price,
                high: window.high.map_or(extremes.high, |h| h.max(extremes.high)),
                low: window.low.map_or(extremes.low, |l| l.min(extremes.low)),
            };

            let key = fill_key(&order.order.id, trade);
            futures::try_join!(
                self.series
                    .append_keyed(instrument, Metric::BaseVolume, base_volume, at, &key),
                self.series
                    .append_keyed(instrument, Metric::QuoteVolume, quote_volume, at, &key),
            )?;

            report.trades_aggregated += 1;
            self.metrics.record_trade_aggregated();

            if ctx.is_last_fill(trade) {
                pending.push(tick.clone());
            }
            state = Some(OrderState {
                tick,
                extremes,
                at,
                key,
            });
        }

        if let Some(state) = state {
            self.flush_order(instrument, &state).await?;
        }

        Ok(pending)
    }

    /// Record `price` as the open of its bucket unless the bucket has one.
    ///
    /// Scan and insert are separate store calls; two concurrent writers for
    /// the same instrument and bucket can both insert.
    async fn record_open_price(
        &self,
        instrument: &InstrumentId,
        price: Decimal,
        at: DateTime<Utc>,
    ) -> Result<(), MarketDataError> {
        let bucket_start = self.settings.bucket.align(at);
        let existing = self
            .series
            .range_scan(instrument, Metric::OpenPrice, bucket_start, bucket_start)
            .await?;

        if existing.is_empty() {
            self.series
                .append(instrument, Metric::OpenPrice, price, bucket_start)
                .await?;

            let expired_before = codec::score(self.settings.window_start(at));
            self.series
                .range_delete(
                    instrument,
                    Metric::OpenPrice,
                    ScoreBound::NegInfinity,
                    ScoreBound::Exclusive(expired_before),
                )
                .await?;
            debug!(instrument = %instrument, bucket = %bucket_start, price = %price, "Recorded open price");
        }
        Ok(())
    }

    /// Persist an order's extremes and its final tick.
    async fn flush_order(
        &self,
        instrument: &InstrumentId,
        state: &OrderState,
    ) -> Result<(), MarketDataError> {
        futures::try_join!(
            self.series.append_keyed(
                instrument,
                Metric::High,
                state.extremes.high,
                state.at,
                &state.key
            ),
            self.series.append_keyed(
                instrument,
                Metric::Low,
                state.extremes.low,
                state.at,
                &state.key
            ),
        )?;

        let tick = &state.tick;
        let mut fields = vec![
            (SliceField::VolumeBase, tick.volume_base),
            (SliceField::VolumeQuote, tick.volume_quote),
            (SliceField::High, tick.high),
            (SliceField::Low, tick.low),
        ];
        if let Some(change) = tick.price_change {
            fields.push((SliceField::PriceChange, change));
        }
        self.snapshot.write(instrument, &fields).await?;
        self.index.add(instrument).await?;
        Ok(())
    }

    /// Publish a tick, then mirror it; mirror failures are logged only.
    async fn notify(
        &self,
        tick: MarketDataChangedEvent,
        report: &mut BatchReport,
    ) -> Result<(), MarketDataError> {
        self.publisher.publish(&tick).await?;
        self.metrics.record_notification();
        info!(
            instrument = %tick.asset_pair_id,
            last_price = %tick.last_price,
            volume_base = %tick.volume_base,
            "Market data changed"
        );

        if let Err(e) = self
            .tickers
            .upsert_ticker(Ticker::from_event(&tick, Utc::now()))
            .await
        {
            let e = match e {
                MarketDataError::DownstreamWriteFailure(_) => e,
                other => MarketDataError::DownstreamWriteFailure(other.to_string()),
            };
            warn!(instrument = %tick.asset_pair_id, error = %e, "Ticker mirror write failed");
            self.metrics.record_downstream_failure();
        }

        report.notifications.push(tick);
        Ok(())
    }
}

#[async_trait]
impl MessageHandler<LimitOrdersMessage> for TradeAggregator {
    async fn handle(&self, message: &LimitOrdersMessage) -> Result<(), MarketDataError> {
        self.process_batch(message).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{AssetPair, StaticAssetPairs};
    use crate::events::LimitOrder;
    use crate::publisher::BroadcastPublisher;
    use crate::store::InMemoryStore;
    use crate::ticker::InMemoryTickerWriter;
    use chrono::{Duration, TimeZone};

    struct Harness {
        store: Arc<InMemoryStore>,
        tickers: Arc<InMemoryTickerWriter>,
        metrics: Arc<ServiceMetrics>,
        aggregator: TradeAggregator,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryStore::new());
        let tickers = Arc::new(InMemoryTickerWriter::new());
        let metrics = Arc::new(ServiceMetrics::new());
        let assets = StaticAssetPairs::new([AssetPair {
            id: InstrumentId::new("BTCUSD"),
            base_asset_id: AssetId::new("BTC"),
            quoting_asset_id: AssetId::new("USD"),
        }]);

        let aggregator = TradeAggregator::new(
            SeriesStore::new(store.clone()),
            SnapshotMap::new(store.clone()),
            InstrumentIndex::new(store.clone()),
            Arc::new(assets),
            Arc::new(BroadcastPublisher::default()),
            tickers.clone(),
            WindowSettings::default(),
            metrics.clone(),
        );

        Harness {
            store,
            tickers,
            metrics,
            aggregator,
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn trade(price: i64, base: i64, opposite: &str, secs: i64, index: i64) -> LimitTrade {
        LimitTrade {
            price: Decimal::from(price),
            volume: Decimal::from(base),
            opposite_volume: Decimal::from(base * price),
            asset: AssetId::new("BTC"),
            opposite_asset_id: Some(AssetId::new("USD")),
            opposite_order_id: OrderId::new(opposite),
            timestamp: t0() + Duration::seconds(secs),
            index,
        }
    }

    fn order(id: &str, instrument: &str, volume: i64, trades: Vec<LimitTrade>) -> LimitOrderWithTrades {
        LimitOrderWithTrades {
            order: LimitOrder {
                id: OrderId::new(id),
                asset_pair_id: InstrumentId::new(instrument),
                volume: Decimal::from(volume),
            },
            trades,
        }
    }

    #[tokio::test]
    async fn test_single_fill_tick() {
        let h = harness();
        let batch = LimitOrdersMessage {
            orders: vec![order("sell-1", "BTCUSD", -2, vec![trade(100, 2, "mkt-1", 0, 0)])],
        };

        let report = h.aggregator.process_batch(&batch).await.unwrap();
        assert_eq!(report.trades_aggregated, 1);
        assert_eq!(report.notifications.len(), 1);

        let tick = &report.notifications[0];
        assert_eq!(tick.volume_base, Decimal::from(2));
        assert_eq!(tick.volume_quote, Decimal::from(200));
        assert_eq!(tick.high, Decimal::from(100));
        assert_eq!(tick.low, Decimal::from(100));
        assert_eq!(tick.price_change, Some(Decimal::ZERO));

        let ticker = h.tickers.ticker(&InstrumentId::new("BTCUSD")).unwrap();
        assert_eq!(ticker.last_price, Decimal::from(100));
    }

    #[tokio::test]
    async fn test_limit_limit_match_counted_once() {
        let h = harness();
        let batch = LimitOrdersMessage {
            orders: vec![
                order("sell-A", "BTCUSD", -1, vec![trade(100, 1, "buy-B", 0, 0)]),
                order("buy-B", "BTCUSD", 1, vec![trade(100, 1, "sell-A", 0, 0)]),
            ],
        };

        let report = h.aggregator.process_batch(&batch).await.unwrap();
        assert_eq!(report.trades_aggregated, 1);
        assert_eq!(report.trades_deduplicated, 1);
        assert_eq!(
            report.notifications.last().unwrap().volume_base,
            Decimal::from(1)
        );
    }

    #[tokio::test]
    async fn test_buy_against_market_order_is_aggregated() {
        let h = harness();
        let batch = LimitOrdersMessage {
            orders: vec![order("buy-1", "BTCUSD", 3, vec![trade(100, 3, "mkt-9", 0, 0)])],
        };

        let report = h.aggregator.process_batch(&batch).await.unwrap();
        assert_eq!(report.trades_aggregated, 1);
        assert_eq!(report.trades_deduplicated, 0);
    }

    #[tokio::test]
    async fn test_unknown_instrument_skipped_rest_processed() {
        let h = harness();
        let batch = LimitOrdersMessage {
            orders: vec![
                order("x-1", "XYZUSD", -1, vec![trade(5, 1, "mkt-1", 0, 0)]),
                order("s-1", "BTCUSD", -1, vec![trade(100, 1, "mkt-2", 0, 0)]),
            ],
        };

        let report = h.aggregator.process_batch(&batch).await.unwrap();
        assert_eq!(report.orders_skipped, 1);
        assert_eq!(report.orders_processed, 1);
        assert_eq!(h.metrics.export()["orders_skipped"], 1);
    }

    #[tokio::test]
    async fn test_zero_volume_updates_last_price_only() {
        let h = harness();
        let batch = LimitOrdersMessage {
            orders: vec![order("s-1", "BTCUSD", -1, vec![trade(123, 0, "mkt-1", 0, 0)])],
        };

        let report = h.aggregator.process_batch(&batch).await.unwrap();
        assert_eq!(report.trades_ignored, 1);
        assert!(report.notifications.is_empty());

        let slice = SnapshotMap::new(h.store.clone())
            .read(&InstrumentId::new("BTCUSD"))
            .await
            .unwrap();
        assert_eq!(slice.last_price, Some(Decimal::from(123)));
        assert_eq!(slice.volume_base, None);
    }

    #[tokio::test]
    async fn test_notification_only_for_last_fill_per_opposite_order() {
        let h = harness();
        let batch = LimitOrdersMessage {
            orders: vec![order(
                "s-1",
                "BTCUSD",
                -3,
                vec![
                    trade(101, 1, "mkt-1", 0, 1),
                    trade(100, 1, "mkt-1", 0, 0),
                    trade(102, 1, "mkt-1", 0, 2),
                ],
            )],
        };

        let report = h.aggregator.process_batch(&batch).await.unwrap();
        assert_eq!(report.notifications.len(), 1);
        let tick = &report.notifications[0];
        assert_eq!(tick.last_price, Decimal::from(102));
        assert_eq!(tick.volume_base, Decimal::from(3));
        assert_eq!(tick.high, Decimal::from(102));
        assert_eq!(tick.low, Decimal::from(100));
    }

    #[tokio::test]
    async fn test_order_extremes_appended_once() {
        let h = harness();
        let batch = LimitOrdersMessage {
            orders: vec![order(
                "s-1",
                "BTCUSD",
                -2,
                vec![trade(100, 1, "mkt-1", 0, 0), trade(90, 1, "mkt-2", 1, 0)],
            )],
        };
        h.aggregator.process_batch(&batch).await.unwrap();

        let btc = InstrumentId::new("BTCUSD");
        let high_key = crate::store::keys::series(&btc, Metric::High);
        let low_key = crate::store::keys::series(&btc, Metric::Low);
        assert_eq!(h.store.sorted_len(&high_key), 1);
        assert_eq!(h.store.sorted_len(&low_key), 1);
    }

    #[tokio::test]
    async fn test_store_outage_aborts_without_notification() {
        let h = harness();
        h.store.set_available(false);
        let batch = LimitOrdersMessage {
            orders: vec![order("s-1", "BTCUSD", -1, vec![trade(100, 1, "mkt-1", 0, 0)])],
        };

        let err = h.aggregator.process_batch(&batch).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(h.metrics.export()["notifications_published"], 0);
    }

    #[tokio::test]
    async fn test_ticker_failure_does_not_abort() {
        let h = harness();
        h.tickers.set_failing(true);
        let batch = LimitOrdersMessage {
            orders: vec![order("s-1", "BTCUSD", -1, vec![trade(100, 1, "mkt-1", 0, 0)])],
        };

        let report = h.aggregator.process_batch(&batch).await.unwrap();
        assert_eq!(report.notifications.len(), 1);
        assert_eq!(h.metrics.export()["downstream_write_failures"], 1);
    }
}
