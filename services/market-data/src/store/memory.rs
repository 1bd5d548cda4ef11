//! In-memory store backend
//!
//! Mirrors Redis semantics closely enough for the engine: members are unique
//! per sorted set (re-adding re-scores), scans come back ascending by score
//! with ties in insertion order, and absent keys read as empty. An
//! availability switch lets callers simulate an outage.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::StoreError;
use crate::store::{MarketStore, ScoreBound};

/// Score-ordered members plus a member index, so re-adding a member finds
/// its old slot without scanning the whole set.
#[derive(Debug, Default)]
struct SortedSet {
    entries: Vec<(f64, String)>,
    scores: HashMap<String, f64>,
}

impl SortedSet {
    fn insert(&mut self, score: f64, member: &str) {
        if let Some(old) = self.scores.get(member).copied() {
            let lo = self.entries.partition_point(|(s, _)| *s < old);
            let hi = self.entries.partition_point(|(s, _)| *s <= old);
            if let Some(offset) = self.entries[lo..hi].iter().position(|(_, m)| m == member) {
                self.entries.remove(lo + offset);
            }
        }
        let idx = self.entries.partition_point(|(s, _)| *s <= score);
        self.entries.insert(idx, (score, member.to_string()));
        self.scores.insert(member.to_string(), score);
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn range(&self, min: ScoreBound, max: ScoreBound) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(s, _)| min.admits_from_below(*s) && max.admits_from_above(*s))
            .map(|(_, m)| m.clone())
            .collect()
    }

    fn remove_range(&mut self, min: ScoreBound, max: ScoreBound) -> u64 {
        let SortedSet { entries, scores } = self;
        let before = entries.len();
        entries.retain(|(s, m)| {
            let doomed = min.admits_from_below(*s) && max.admits_from_above(*s);
            if doomed {
                scores.remove(m);
            }
            !doomed
        });
        (before - entries.len()) as u64
    }
}

/// Process-local store used by tests and by single-node deployments without
/// an external store.
#[derive(Debug)]
pub struct InMemoryStore {
    sorted: DashMap<String, SortedSet>,
    hashes: DashMap<String, HashMap<String, String>>,
    sets: DashMap<String, BTreeSet<String>>,
    available: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            sorted: DashMap::new(),
            hashes: DashMap::new(),
            sets: DashMap::new(),
            available: AtomicBool::new(true),
        }
    }

    /// Toggle availability; while unavailable every call fails.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of members in a sorted set.
    pub fn sorted_len(&self, key: &str) -> usize {
        self.sorted.get(key).map(|s| s.len()).unwrap_or(0)
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("in-memory store switched off".to_string()))
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketStore for InMemoryStore {
    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<(), StoreError> {
        self.check()?;
        self.sorted
            .entry(key.to_string())
            .or_default()
            .insert(score, member);
        Ok(())
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min: ScoreBound,
        max: ScoreBound,
    ) -> Result<Vec<String>, StoreError> {
        self.check()?;
        Ok(self
            .sorted
            .get(key)
            .map(|set| set.range(min, max))
            .unwrap_or_default())
    }

    async fn zrem_range_by_score(
        &self,
        key: &str,
        min: ScoreBound,
        max: ScoreBound,
    ) -> Result<u64, StoreError> {
        self.check()?;
        Ok(self
            .sorted
            .get_mut(key)
            .map(|mut set| set.remove_range(min, max))
            .unwrap_or(0))
    }

    async fn hset(&self, key: &str, fields: &[(&str, String)]) -> Result<(), StoreError> {
        self.check()?;
        let mut hash = self.hashes.entry(key.to_string()).or_default();
        for (field, value) in fields {
            hash.insert((*field).to_string(), value.clone());
        }
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        self.check()?;
        Ok(self
            .hashes
            .get(key)
            .map(|hash| hash.clone())
            .unwrap_or_default())
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), StoreError> {
        self.check()?;
        self.sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        self.check()?;
        Ok(self
            .sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }
}
