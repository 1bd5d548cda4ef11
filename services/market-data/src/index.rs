//! Global instrument index

use std::sync::Arc;

use tracing::warn;
use types::ids::InstrumentId;

use crate::error::MarketDataError;
use crate::store::{keys, MarketStore};

/// Set of known instruments, enumerated by bulk reads and the sweeper.
#[derive(Clone)]
pub struct InstrumentIndex {
    store: Arc<dyn MarketStore>,
}

impl InstrumentIndex {
    pub fn new(store: Arc<dyn MarketStore>) -> Self {
        Self { store }
    }

    pub async fn add(&self, instrument: &InstrumentId) -> Result<(), MarketDataError> {
        self.store
            .sadd(&keys::instrument_index(), instrument.as_str())
            .await?;
        Ok(())
    }

    /// All known instruments; blank members are dropped.
    pub async fn members(&self) -> Result<Vec<InstrumentId>, MarketDataError> {
        let members = self.store.smembers(&keys::instrument_index()).await?;
        Ok(members
            .into_iter()
            .filter_map(|m| {
                let id = InstrumentId::try_new(m.as_str());
                if id.is_none() {
                    warn!(member = %m, "Ignoring blank instrument index member");
                }
                id
            })
            .collect())
    }
}
