//! Quote updater: top-of-book bid/ask into the snapshot map

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};
use types::order::Side;

use crate::error::MarketDataError;
use crate::events::QuoteMessage;
use crate::ingestion::MessageHandler;
use crate::metrics::ServiceMetrics;
use crate::slice::{SliceField, SnapshotMap};
use crate::ticker::TickerWriter;

pub struct QuoteUpdater {
    snapshot: SnapshotMap,
    tickers: Arc<dyn TickerWriter>,
    metrics: Arc<ServiceMetrics>,
}

impl QuoteUpdater {
    pub fn new(
        snapshot: SnapshotMap,
        tickers: Arc<dyn TickerWriter>,
        metrics: Arc<ServiceMetrics>,
    ) -> Self {
        Self {
            snapshot,
            tickers,
            metrics,
        }
    }

    /// Overwrite the bid (buy quote) or ask (sell quote). Last write wins.
    pub async fn apply(&self, quote: &QuoteMessage) -> Result<(), MarketDataError> {
        let field = match quote.side {
            Side::Buy => SliceField::Bid,
            Side::Sell => SliceField::Ask,
        };

        self.snapshot
            .write(&quote.instrument, &[(field, quote.price)])
            .await?;
        self.metrics.record_quote();
        debug!(instrument = %quote.instrument, side = %quote.side, price = %quote.price, "Applied quote");

        let at = quote.timestamp.unwrap_or_else(Utc::now);
        if let Err(e) = self
            .tickers
            .upsert_price(&quote.instrument, quote.side, quote.price, at)
            .await
        {
            warn!(instrument = %quote.instrument, error = %e, "Price mirror write failed");
            self.metrics.record_downstream_failure();
        }
        Ok(())
    }
}

#[async_trait]
impl MessageHandler<QuoteMessage> for QuoteUpdater {
    async fn handle(&self, message: &QuoteMessage) -> Result<(), MarketDataError> {
        self.apply(message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use crate::ticker::InMemoryTickerWriter;
    use rust_decimal::Decimal;
    use types::ids::InstrumentId;

    fn quote(side: Side, price: i64) -> QuoteMessage {
        QuoteMessage {
            instrument: InstrumentId::new("ETHUSD"),
            side,
            price: Decimal::from(price),
            timestamp: None,
        }
    }

    #[tokio::test]
    async fn test_bid_and_ask_written_by_side() {
        let store = Arc::new(InMemoryStore::new());
        let tickers = Arc::new(InMemoryTickerWriter::new());
        let updater = QuoteUpdater::new(
            SnapshotMap::new(store.clone()),
            tickers.clone(),
            Arc::new(ServiceMetrics::new()),
        );

        updater.apply(&quote(Side::Buy, 1799)).await.unwrap();
        updater.apply(&quote(Side::Sell, 1801)).await.unwrap();
        updater.apply(&quote(Side::Buy, 1800)).await.unwrap();

        let slice = SnapshotMap::new(store)
            .read(&InstrumentId::new("ETHUSD"))
            .await
            .unwrap();
        assert_eq!(slice.bid, Some(Decimal::from(1800)));
        assert_eq!(slice.ask, Some(Decimal::from(1801)));
        assert_eq!(slice.last_price, None);

        let mirrored = tickers.price(&InstrumentId::new("ETHUSD")).unwrap();
        assert_eq!(mirrored.bid, Some(Decimal::from(1800)));
    }

    #[tokio::test]
    async fn test_store_outage_is_transient() {
        let store = Arc::new(InMemoryStore::new());
        store.set_available(false);
        let updater = QuoteUpdater::new(
            SnapshotMap::new(store),
            Arc::new(InMemoryTickerWriter::new()),
            Arc::new(ServiceMetrics::new()),
        );

        let err = updater.apply(&quote(Side::Sell, 1)).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_mirror_failure_is_logged_not_returned() {
        let tickers = Arc::new(InMemoryTickerWriter::new());
        tickers.set_failing(true);
        let metrics = Arc::new(ServiceMetrics::new());
        let updater = QuoteUpdater::new(
            SnapshotMap::new(Arc::new(InMemoryStore::new())),
            tickers,
            metrics.clone(),
        );

        updater.apply(&quote(Side::Buy, 10)).await.unwrap();
        assert_eq!(metrics.export()["downstream_write_failures"], 1);
    }
}
