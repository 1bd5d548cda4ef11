//! Retention sweeper
//!
//! On a fixed interval, deletes series entries older than the window for
//! every indexed instrument. Each (instrument, metric) delete runs as its own
//! task and is not awaited by the sweep loop; a failed delete is logged and
//! counted, and the data ages out on a later tick. The snapshot map and the
//! instrument index are never touched.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec;
use crate::error::MarketDataError;
use crate::index::InstrumentIndex;
use crate::metrics::ServiceMetrics;
use crate::series::{Metric, SeriesStore};
use crate::store::ScoreBound;
use crate::window::WindowSettings;

/// Default sweep period (10 minutes).
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(600);

/// Deletes issued by one sweep.
///
/// Dropping the ticket detaches the deletes; [`SweepTicket::settled`] waits
/// for them.
#[derive(Debug)]
pub struct SweepTicket {
    instruments: usize,
    handles: Vec<JoinHandle<Result<u64, MarketDataError>>>,
}

/// Outcome of a settled sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub instruments: usize,
    pub removed: u64,
    pub failed: usize,
}

impl SweepTicket {
    /// Number of deletes issued.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every delete of this sweep.
    pub async fn settled(self) -> SweepSummary {
        let mut summary = SweepSummary {
            instruments: self.instruments,
            ..Default::default()
        };
        for handle in self.handles {
            match handle.await {
                Ok(Ok(removed)) => summary.removed += removed,
                Ok(Err(_)) => summary.failed += 1,
                Err(e) => {
                    warn!(error = %e, "Sweep delete task aborted");
                    summary.failed += 1;
                }
            }
        }
        summary
    }
}

pub struct RetentionSweeper {
    series: SeriesStore,
    index: InstrumentIndex,
    settings: WindowSettings,
    period: Duration,
    metrics: Arc<ServiceMetrics>,
}

impl RetentionSweeper {
    pub fn new(
        series: SeriesStore,
        index: InstrumentIndex,
        settings: WindowSettings,
        period: Duration,
        metrics: Arc<ServiceMetrics>,
    ) -> Self {
        Self {
            series,
            index,
            settings,
            period,
            metrics,
        }
    }

    /// Sweep every `period` until cancelled. The first sweep runs immediately.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(period_secs = self.period.as_secs(), "Retention sweeper started");

        let mut timer = interval(self.period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = timer.tick() => {
                    match self.sweep_at(Utc::now()).await {
                        Ok(ticket) => {
                            debug!(deletes = ticket.len(), "Sweep issued");
                        }
                        Err(e) => {
                            warn!(error = %e, "Sweep skipped: instrument index unavailable");
                        }
                    }
                }
            }
        }

        info!("Retention sweeper stopped");
    }

    /// Issue deletes of `[0, now - W)` on all five series of every indexed
    /// instrument.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepTicket, MarketDataError> {
        let instruments = self.index.members().await?;
        let cutoff = codec::score(self.settings.window_start(now));

        let mut handles = Vec::with_capacity(instruments.len() * Metric::all().len());
        for instrument in &instruments {
            for &metric in Metric::all() {
                let series = self.series.clone();
                let metrics = self.metrics.clone();
                let instrument = instrument.clone();

                handles.push(tokio::spawn(async move {
                    let result = series
                        .range_delete(
                            &instrument,
                            metric,
                            ScoreBound::Inclusive(0.0),
                            ScoreBound::Exclusive(cutoff),
                        )
                        .await;

                    match &result {
                        Ok(removed) => {
                            metrics.record_sweep_removed(*removed);
                            if *removed > 0 {
                                debug!(instrument = %instrument, metric = metric.key_segment(), removed, "Swept expired entries");
                            }
                        }
                        Err(e) => {
                            metrics.record_sweep_failure();
                            warn!(instrument = %instrument, metric = metric.key_segment(), error = %e, "Sweep delete failed");
                        }
                    }
                    result
                }));
            }
        }

        self.metrics.record_sweep();
        Ok(SweepTicket {
            instruments: instruments.len(),
            handles,
        })
    }
}
