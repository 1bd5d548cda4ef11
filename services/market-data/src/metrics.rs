//! Observability counters for the Market Data Service
//!
//! Plain atomic counters plus bounded latency sample windows, exported as a
//! flat name → value map.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Core metrics for the Market Data Service.
pub struct ServiceMetrics {
    // Trade stream
    pub batches_processed: AtomicU64,
    pub trades_aggregated: AtomicU64,
    pub trades_deduplicated: AtomicU64,
    pub orders_skipped: AtomicU64,
    pub notifications_published: AtomicU64,
    pub downstream_write_failures: AtomicU64,
    pub batch_latency_us: Mutex<LatencyTracker>,

    // Quote stream
    pub quotes_applied: AtomicU64,

    // Reads
    pub snapshots_served: AtomicU64,
    pub snapshot_latency_us: Mutex<LatencyTracker>,

    // Retention
    pub sweeps_run: AtomicU64,
    pub sweep_entries_removed: AtomicU64,
    pub sweep_delete_failures: AtomicU64,

    // Transport
    pub redeliveries: AtomicU64,
    pub dead_letters: AtomicU64,
}

impl ServiceMetrics {
    pub fn new() -> Self {
        Self {
            batches_processed: AtomicU64::new(0),
            trades_aggregated: AtomicU64::new(0),
            trades_deduplicated: AtomicU64::new(0),
            orders_skipped: AtomicU64::new(0),
            notifications_published: AtomicU64::new(0),
            downstream_write_failures: AtomicU64::new(0),
            batch_latency_us: Mutex::new(LatencyTracker::new(1000)),
            quotes_applied: AtomicU64::new(0),
            snapshots_served: AtomicU64::new(0),
            snapshot_latency_us: Mutex::new(LatencyTracker::new(1000)),
            sweeps_run: AtomicU64::new(0),
            sweep_entries_removed: AtomicU64::new(0),
            sweep_delete_failures: AtomicU64::new(0),
            redeliveries: AtomicU64::new(0),
            dead_letters: AtomicU64::new(0),
        }
    }

    /// Record a trade batch fully processed.
    pub fn record_batch(&self, latency_us: u64) {
        self.batches_processed.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut tracker) = self.batch_latency_us.lock() {
            tracker.record(latency_us);
        }
    }

    pub fn record_trade_aggregated(&self) {
        self.trades_aggregated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_trade_deduplicated(&self) {
        self.trades_deduplicated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_order_skipped(&self) {
        self.orders_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_notification(&self) {
        self.notifications_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_downstream_failure(&self) {
        self.downstream_write_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_quote(&self) {
        self.quotes_applied.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a snapshot read.
    pub fn record_snapshot(&self, latency_us: u64) {
        self.snapshots_served.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut tracker) = self.snapshot_latency_us.lock() {
            tracker.record(latency_us);
        }
    }

    pub fn record_sweep(&self) {
        self.sweeps_run.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sweep_removed(&self, entries: u64) {
        self.sweep_entries_removed.fetch_add(entries, Ordering::Relaxed);
    }

    pub fn record_sweep_failure(&self) {
        self.sweep_delete_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_redelivery(&self) {
        self.redeliveries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dead_letter(&self) {
        self.dead_letters.fetch_add(1, Ordering::Relaxed);
    }

    /// Export metrics as a BTreeMap for Prometheus-style exposition.
    pub fn export(&self) -> BTreeMap<String, u64> {
        let counters = [
            ("batches_processed", &self.batches_processed),
            ("trades_aggregated", &self.trades_aggregated),
            ("trades_deduplicated", &self.trades_deduplicated),
            ("orders_skipped", &self.orders_skipped),
            ("notifications_published", &self.notifications_published),
            ("downstream_write_failures", &self.downstream_write_failures),
            ("quotes_applied", &self.quotes_applied),
            ("snapshots_served", &self.snapshots_served),
            ("sweeps_run", &self.sweeps_run),
            ("sweep_entries_removed", &self.sweep_entries_removed),
            ("sweep_delete_failures", &self.sweep_delete_failures),
            ("redeliveries", &self.redeliveries),
            ("dead_letters", &self.dead_letters),
        ];

        let mut m: BTreeMap<String, u64> = counters
            .iter()
            .map(|(name, counter)| (name.to_string(), counter.load(Ordering::Relaxed)))
            .collect();

        let trackers = [
            ("batch_latency", &self.batch_latency_us),
            ("snapshot_latency", &self.snapshot_latency_us),
        ];
        for (name, tracker) in trackers {
            let Ok(tracker) = tracker.lock() else {
                continue;
            };
            if let Some(p99) = tracker.percentile(99) {
                m.insert(format!("{}_p99_us", name), p99);
            }
            if let Some(avg) = tracker.average() {
                m.insert(format!("{}_avg_us", name), avg);
            }
        }
        m
    }
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks latency samples for percentile calculation.
pub struct LatencyTracker {
    samples: Vec<u64>,
    max_samples: usize,
}

impl LatencyTracker {
    pub fn new(max_samples: usize) -> Self {
        Self {
            samples: Vec::with_capacity(max_samples),
            max_samples,
        }
    }

    /// Record a latency sample, evicting the oldest once full.
    pub fn record(&mut self, value: u64) {
        if self.samples.len() >= self.max_samples {
            self.samples.remove(0);
        }
        self.samples.push(value);
    }

    /// Get a percentile value (0-100).
    pub fn percentile(&self, p: usize) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }

        let mut sorted = self.samples.clone();
        sorted.sort_unstable();

        let idx = (p as f64 / 100.0 * (sorted.len() - 1) as f64) as usize;
        Some(sorted[idx.min(sorted.len() - 1)])
    }

    pub fn average(&self) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: u64 = self.samples.iter().sum();
        Some(sum / self.samples.len() as u64)
    }
}
