//! Window and bucket settings
//!
//! The window `W` bounds every rolling aggregate: series scans cover
//! `[now - W, now]` and the sweeper deletes everything older. Open prices are
//! sampled once per bucket, with bucket boundaries aligned to the Unix epoch
//! (a 5 minute bucket closes on :00, :05, :10, ...).

use chrono::{DateTime, Duration, Utc};

use crate::error::MarketDataError;

/// Default rolling window (24h).
pub const DEFAULT_WINDOW_SECS: u64 = 24 * 3600;

/// Default open-price bucket (5 minutes).
pub const DEFAULT_BUCKET_SECS: u64 = 5 * 60;

/// Fixed-width, epoch-aligned time bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketSize {
    millis: i64,
}

impl BucketSize {
    /// Bucket of `secs` seconds; zero is rejected.
    pub fn from_secs(secs: u64) -> Result<Self, MarketDataError> {
        let millis = i64::try_from(secs)
            .ok()
            .and_then(|s| s.checked_mul(1000))
            .filter(|m| *m > 0)
            .ok_or_else(|| MarketDataError::Config(format!("invalid bucket size: {}s", secs)))?;
        Ok(Self { millis })
    }

    pub fn duration(&self) -> Duration {
        Duration::milliseconds(self.millis)
    }

    /// Floor `at` to the start of its bucket.
    pub fn align(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        let millis = at.timestamp_millis();
        let start = millis - millis.rem_euclid(self.millis);
        DateTime::from_timestamp_millis(start).unwrap_or(at)
    }
}

/// Rolling-window parameters shared by the aggregator, reader and sweeper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSettings {
    pub window: Duration,
    pub bucket: BucketSize,
}

impl WindowSettings {
    pub fn new(window_secs: u64, bucket_secs: u64) -> Result<Self, MarketDataError> {
        let window = i64::try_from(window_secs)
            .ok()
            .filter(|s| *s > 0)
            .and_then(Duration::try_seconds)
            .ok_or_else(|| {
                MarketDataError::Config(format!("invalid window: {}s", window_secs))
            })?;

        Ok(Self {
            window,
            bucket: BucketSize::from_secs(bucket_secs)?,
        })
    }

    /// Oldest event time still inside the window ending at `now`.
    pub fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            window: Duration::seconds(DEFAULT_WINDOW_SECS as i64),
            bucket: BucketSize {
                millis: DEFAULT_BUCKET_SECS as i64 * 1000,
            },
        }
    }
}
