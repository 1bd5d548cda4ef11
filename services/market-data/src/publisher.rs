//! Outbound change notifications

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::MarketDataError;
use crate::events::MarketDataChangedEvent;

/// Default buffered ticks per subscriber before it starts lagging.
pub const CHANNEL_CAPACITY: usize = 1024;

/// Downstream bus for [`MarketDataChangedEvent`]s.
#[async_trait]
pub trait ChangePublisher: Send + Sync {
    async fn publish(&self, event: &MarketDataChangedEvent) -> Result<(), MarketDataError>;
}

/// In-process bus on a tokio broadcast channel.
///
/// Publishing with no subscribers is not an error; lagging subscribers lose
/// the oldest ticks.
#[derive(Debug, Clone)]
pub struct BroadcastPublisher {
    tx: broadcast::Sender<MarketDataChangedEvent>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MarketDataChangedEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new(CHANNEL_CAPACITY)
    }
}

#[async_trait]
impl ChangePublisher for BroadcastPublisher {
    async fn publish(&self, event: &MarketDataChangedEvent) -> Result<(), MarketDataError> {
        match self.tx.send(event.clone()) {
            Ok(receivers) => {
                debug!(instrument = %event.asset_pair_id, receivers, "Published market data change");
            }
            Err(_) => {
                debug!(instrument = %event.asset_pair_id, "No subscribers for market data change");
            }
        }
        Ok(())
    }
}
