//! Service configuration
//!
//! Loaded once from `MARKET_DATA_*` environment variables at startup and
//! immutable afterwards. Unparseable numbers fall back to their defaults;
//! [`MarketDataConfig::validate`] rejects values the engine cannot run with.

use std::env;
use std::time::Duration;

use crate::assets::StaticAssetPairs;
use crate::error::MarketDataError;
use crate::ingestion::RedeliveryPolicy;
use crate::window::{WindowSettings, DEFAULT_BUCKET_SECS, DEFAULT_WINDOW_SECS};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketDataConfig {
    pub window_secs: u64,
    pub bucket_secs: u64,
    pub sweep_interval_secs: u64,
    /// Unset ⇒ in-memory store.
    pub redis_url: Option<String>,
    pub http_bind: String,
    pub limit_orders_exchange: String,
    pub quotes_exchange: String,
    pub retry_timeout_secs: u64,
    pub retry_num: u32,
    pub handler_timeout_secs: u64,
    /// `PAIR:BASE:QUOTE,...`
    pub asset_pairs: String,
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        Self {
            window_secs: DEFAULT_WINDOW_SECS,
            bucket_secs: DEFAULT_BUCKET_SECS,
            sweep_interval_secs: 600,
            redis_url: None,
            http_bind: "0.0.0.0:5000".to_string(),
            limit_orders_exchange: "spot.limit-orders".to_string(),
            quotes_exchange: "spot.quotes".to_string(),
            retry_timeout_secs: 10,
            retry_num: 10,
            handler_timeout_secs: 30,
            asset_pairs: String::new(),
        }
    }
}

struct Vars<F> {
    lookup: F,
}

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    fn string_or(&self, name: &str, default: &str) -> String {
        self.string(name).unwrap_or_else(|| default.to_string())
    }

    fn u64_or(&self, name: &str, default: u64) -> u64 {
        self.string(name)
            .and_then(|s| s.parse().ok())
            .unwrap_or(default)
    }

    fn u32_or(&self, name: &str, default: u32) -> u32 {
        self.string(name)
            .and_then(|s| s.parse().ok())
            .unwrap_or(default)
    }
}

impl MarketDataConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let vars = Vars { lookup };
        let d = Self::default();

        Self {
            window_secs: vars.u64_or("MARKET_DATA_WINDOW_SECS", d.window_secs),
            bucket_secs: vars.u64_or("MARKET_DATA_BUCKET_SECS", d.bucket_secs),
            sweep_interval_secs: vars.u64_or("MARKET_DATA_SWEEP_INTERVAL_SECS", d.sweep_interval_secs),
            redis_url: vars.string("MARKET_DATA_REDIS_URL"),
            http_bind: vars.string_or("MARKET_DATA_HTTP_BIND", &d.http_bind),
            limit_orders_exchange: vars
                .string_or("MARKET_DATA_LIMIT_ORDERS_EXCHANGE", &d.limit_orders_exchange),
            quotes_exchange: vars.string_or("MARKET_DATA_QUOTES_EXCHANGE", &d.quotes_exchange),
            retry_timeout_secs: vars.u64_or("MARKET_DATA_RETRY_TIMEOUT_SECS", d.retry_timeout_secs),
            retry_num: vars.u32_or("MARKET_DATA_RETRY_NUM", d.retry_num),
            handler_timeout_secs: vars
                .u64_or("MARKET_DATA_HANDLER_TIMEOUT_SECS", d.handler_timeout_secs),
            asset_pairs: vars.string_or("MARKET_DATA_ASSET_PAIRS", ""),
        }
    }

    pub fn validate(&self) -> Result<(), MarketDataError> {
        let positive = [
            ("MARKET_DATA_WINDOW_SECS", self.window_secs),
            ("MARKET_DATA_BUCKET_SECS", self.bucket_secs),
            ("MARKET_DATA_SWEEP_INTERVAL_SECS", self.sweep_interval_secs),
            ("MARKET_DATA_HANDLER_TIMEOUT_SECS", self.handler_timeout_secs),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(MarketDataError::Config(format!("{} must be positive", name)));
        }

        if self.bucket_secs > self.window_secs {
            return Err(MarketDataError::Config(format!(
                "bucket ({}s) must not exceed the window ({}s)",
                self.bucket_secs, self.window_secs
            )));
        }

        self.window_settings()?;
        self.asset_pairs()?;
        Ok(())
    }

    pub fn window_settings(&self) -> Result<WindowSettings, MarketDataError> {
        WindowSettings::new(self.window_secs, self.bucket_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn redelivery_policy(&self) -> RedeliveryPolicy {
        RedeliveryPolicy {
            retry_timeout: Duration::from_secs(self.retry_timeout_secs),
            retry_num: self.retry_num,
            handler_timeout: Duration::from_secs(self.handler_timeout_secs),
        }
    }

    pub fn asset_pairs(&self) -> Result<StaticAssetPairs, MarketDataError> {
        StaticAssetPairs::parse_list(&self.asset_pairs)
    }
}
