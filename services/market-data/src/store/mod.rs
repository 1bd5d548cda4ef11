//! External store abstraction
//!
//! The engine only needs three structure types from its backing store:
//! scored sorted sets (series), hashes (snapshot map) and plain sets
//! (instrument index). Operations are atomic per key; nothing here assumes
//! atomicity across keys.

use std::collections::HashMap;

use async_trait::async_trait;
use types::ids::InstrumentId;

use crate::error::StoreError;
use crate::series::Metric;

pub mod memory;
pub mod redis_store;

pub use memory::InMemoryStore;
pub use redis_store::RedisStore;

/// One end of a score range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScoreBound {
    Inclusive(f64),
    Exclusive(f64),
    NegInfinity,
    PosInfinity,
}

impl ScoreBound {
    /// Whether `score` satisfies this bound used as the range minimum.
    pub fn admits_from_below(&self, score: f64) -> bool {
        match *self {
            ScoreBound::Inclusive(min) => score >= min,
            ScoreBound::Exclusive(min) => score > min,
            ScoreBound::NegInfinity => true,
            ScoreBound::PosInfinity => false,
        }
    }

    /// Whether `score` satisfies this bound used as the range maximum.
    pub fn admits_from_above(&self, score: f64) -> bool {
        match *self {
            ScoreBound::Inclusive(max) => score <= max,
            ScoreBound::Exclusive(max) => score < max,
            ScoreBound::NegInfinity => false,
            ScoreBound::PosInfinity => true,
        }
    }

    /// Redis range argument (`(` prefix marks an exclusive bound).
    pub fn to_redis_arg(&self) -> String {
        match *self {
            ScoreBound::Inclusive(v) => v.to_string(),
            ScoreBound::Exclusive(v) => format!("({}", v),
            ScoreBound::NegInfinity => "-inf".to_string(),
            ScoreBound::PosInfinity => "+inf".to_string(),
        }
    }
}

/// Minimal sorted-set/hash/set store contract.
#[async_trait]
pub trait MarketStore: Send + Sync {
    /// Add `member` with `score`; an existing identical member is re-scored.
    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<(), StoreError>;

    /// Members with score in `[min, max]` (per bound kind), ascending by score.
    async fn zrange_by_score(
        &self,
        key: &str,
        min: ScoreBound,
        max: ScoreBound,
    ) -> Result<Vec<String>, StoreError>;

    /// Remove members with score in range, returning how many were removed.
    async fn zrem_range_by_score(
        &self,
        key: &str,
        min: ScoreBound,
        max: ScoreBound,
    ) -> Result<u64, StoreError>;

    async fn hset(&self, key: &str, fields: &[(&str, String)]) -> Result<(), StoreError>;

    /// All fields of a hash; an absent key yields an empty map.
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;

    async fn sadd(&self, key: &str, member: &str) -> Result<(), StoreError>;

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError>;
}

/// Store key scheme.
pub mod keys {
    use super::*;

    pub const PREFIX: &str = "MarketData";

    /// Global instrument index (set).
    pub fn instrument_index() -> String {
        format!("{}:AssetPairs", PREFIX)
    }

    /// Snapshot map hash for one instrument.
    pub fn slice(instrument: &InstrumentId) -> String {
        format!("{}:Slice:{}", PREFIX, instrument)
    }

    /// Windowed series for one (instrument, metric).
    pub fn series(instrument: &InstrumentId, metric: Metric) -> String {
        format!("{}:{}:{}", PREFIX, metric.key_segment(), instrument)
    }
}
