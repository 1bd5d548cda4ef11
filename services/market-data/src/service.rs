//! Service wiring
//!
//! Builds every component from a [`MarketDataConfig`], spawns the background
//! tasks (retention sweeper, both subscribers, dead-letter drain) and hands
//! back the state the HTTP surface needs.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::api::AppState;
use crate::config::MarketDataConfig;
use crate::error::MarketDataError;
use crate::events::{LimitOrdersMessage, QuoteMessage};
use crate::index::InstrumentIndex;
use crate::ingestion::{DeadLetter, Subscriber};
use crate::metrics::ServiceMetrics;
use crate::publisher::BroadcastPublisher;
use crate::quotes::QuoteUpdater;
use crate::retention::RetentionSweeper;
use crate::series::SeriesStore;
use crate::slice::SnapshotMap;
use crate::snapshot::SnapshotReader;
use crate::store::{InMemoryStore, MarketStore, RedisStore};
use crate::ticker::InMemoryTickerWriter;
use crate::trades::TradeAggregator;

/// Buffered deliveries per intake stream.
pub const INTAKE_CAPACITY: usize = 1024;

/// A running service instance.
pub struct MarketDataService {
    pub state: AppState,
    pub publisher: BroadcastPublisher,
    pub tickers: Arc<InMemoryTickerWriter>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl MarketDataService {
    /// Connect the configured store and start the service.
    pub async fn start(config: &MarketDataConfig) -> Result<Self, MarketDataError> {
        config.validate()?;

        let store: Arc<dyn MarketStore> = match &config.redis_url {
            Some(url) => Arc::new(RedisStore::connect(url).await?),
            None => {
                info!("No Redis URL configured, using in-memory store");
                Arc::new(InMemoryStore::new())
            }
        };

        Self::start_with_store(config, store).await
    }

    /// Start the service on an already-built store.
    pub async fn start_with_store(
        config: &MarketDataConfig,
        store: Arc<dyn MarketStore>,
    ) -> Result<Self, MarketDataError> {
        let settings = config.window_settings()?;
        let assets = Arc::new(config.asset_pairs()?);
        let metrics = Arc::new(ServiceMetrics::new());

        let series = SeriesStore::new(store.clone());
        let snapshot = SnapshotMap::new(store.clone());
        let index = InstrumentIndex::new(store);

        // Configured pairs are readable (as empty slices) before their first trade.
        for instrument in assets.instruments() {
            index.add(&instrument).await?;
        }

        let publisher = BroadcastPublisher::default();
        let tickers = Arc::new(InMemoryTickerWriter::new());

        let aggregator = Arc::new(TradeAggregator::new(
            series.clone(),
            snapshot.clone(),
            index.clone(),
            assets.clone(),
            Arc::new(publisher.clone()),
            tickers.clone(),
            settings,
            metrics.clone(),
        ));
        let quotes = Arc::new(QuoteUpdater::new(
            snapshot.clone(),
            tickers.clone(),
            metrics.clone(),
        ));
        let reader = SnapshotReader::new(
            series.clone(),
            snapshot,
            index.clone(),
            settings,
            metrics.clone(),
        );
        let sweeper = Arc::new(RetentionSweeper::new(
            series,
            index,
            settings,
            config.sweep_interval(),
            metrics.clone(),
        ));

        let cancel = CancellationToken::new();
        let policy = config.redelivery_policy();
        let (dead_tx, dead_rx) = mpsc::unbounded_channel();
        let (limit_orders_tx, limit_orders_rx) = mpsc::channel(INTAKE_CAPACITY);
        let (quotes_tx, quotes_rx) = mpsc::channel(INTAKE_CAPACITY);

        let limit_orders = Subscriber::<LimitOrdersMessage>::new(
            config.limit_orders_exchange.clone(),
            aggregator,
            policy,
            dead_tx.clone(),
            metrics.clone(),
        );
        let quote_subscriber = Subscriber::<QuoteMessage>::new(
            config.quotes_exchange.clone(),
            quotes,
            policy,
            dead_tx,
            metrics.clone(),
        );

        let tasks = vec![
            tokio::spawn(sweeper.run(cancel.clone())),
            tokio::spawn(limit_orders.run(limit_orders_rx, cancel.clone())),
            tokio::spawn(quote_subscriber.run(quotes_rx, cancel.clone())),
            tokio::spawn(drain_dead_letters(dead_rx)),
        ];

        info!(
            window_secs = config.window_secs,
            bucket_secs = config.bucket_secs,
            instruments = assets.len(),
            "Market data service started"
        );

        Ok(Self {
            state: AppState {
                reader,
                metrics,
                limit_orders: limit_orders_tx,
                quotes: quotes_tx,
            },
            publisher,
            tickers,
            cancel,
            tasks,
        })
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel background tasks and wait for them to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        // The dead-letter drain ends once both subscribers drop their senders.
        for task in futures::future::join_all(self.tasks).await {
            if let Err(e) = task {
                error!(error = %e, "Background task panicked");
            }
        }
        info!("Market data service stopped");
    }
}

/// Letters are logged by the subscriber when produced; this keeps the
/// channel open and records the serialized form for operators.
async fn drain_dead_letters(mut rx: mpsc::UnboundedReceiver<DeadLetter>) {
    while let Some(letter) = rx.recv().await {
        match serde_json::to_string(&letter) {
            Ok(json) => info!(dead_letter = %json, "Dead letter stored"),
            Err(e) => error!(error = %e, "Dead letter could not be serialized"),
        }
    }
}
