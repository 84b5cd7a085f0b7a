//! # Rewind Metrics
//!
//! Observability for the back/forward cache: `metrics`-crate counters and
//! gauges, an optional Prometheus exporter, and tracing subscriber setup.
//!
//! ## Features
//!
//! - **Outcome counters**: stores, rejections, evictions and restores, labelled
//!   by reason
//! - **Occupancy gauges**: total and foreground-classified entries
//! - **Restore latency**: histogram of activation round trips
//! - **Structured logging**: JSON and text log formats

use metrics::{counter, gauge, histogram};
use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

pub mod prometheus;
pub mod tracing_setup;

/// Global metrics instance.
static METRICS: OnceCell<CacheMetrics> = OnceCell::new();

/// Gets or initializes the global metrics instance.
pub fn metrics() -> &'static CacheMetrics {
    METRICS.get_or_init(CacheMetrics::new)
}

/// Back/forward cache metrics.
pub struct CacheMetrics {
    /// Metrics start time.
    start_time: Instant,

    /// Pages stored.
    stores_total: AtomicU64,

    /// Entries evicted.
    evictions_total: AtomicU64,

    /// Entries restored.
    restores_total: AtomicU64,

    /// Restore attempts turned into fresh navigations.
    reissues_total: AtomicU64,
}

impl CacheMetrics {
    /// Creates a new metrics instance.
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            stores_total: AtomicU64::new(0),
            evictions_total: AtomicU64::new(0),
            restores_total: AtomicU64::new(0),
            reissues_total: AtomicU64::new(0),
        }
    }

    /// Returns the time since the metrics were created.
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    // =========================================================================
    // Store metrics
    // =========================================================================

    /// Records a page entering the cache.
    pub fn record_store(&self) {
        self.stores_total.fetch_add(1, Ordering::Relaxed);
        counter!("bfcache_stores_total").increment(1);
    }

    /// Records a page refused at store time.
    pub fn record_store_rejected(&self, reason: &'static str) {
        counter!("bfcache_store_rejections_total", "reason" => reason).increment(1);
    }

    // =========================================================================
    // Eviction metrics
    // =========================================================================

    /// Records an eviction.
    pub fn record_eviction(&self, reason: &'static str) {
        self.evictions_total.fetch_add(1, Ordering::Relaxed);
        counter!("bfcache_evictions_total", "reason" => reason).increment(1);
    }

    /// Updates the occupancy gauges.
    pub fn set_cache_size(&self, total: usize, foreground: usize) {
        gauge!("bfcache_entries").set(total as f64);
        gauge!("bfcache_foreground_entries").set(foreground as f64);
    }

    // =========================================================================
    // Restore metrics
    // =========================================================================

    /// Records a successful restore.
    pub fn record_restore(&self) {
        self.restores_total.fetch_add(1, Ordering::Relaxed);
        counter!("bfcache_restores_total").increment(1);
    }

    /// Records a navigation that could not be served from the cache.
    pub fn record_not_restored(&self, reason: &'static str) {
        counter!("bfcache_not_restored_total", "reason" => reason).increment(1);
    }

    /// Records an aborted restore reissued as a fresh navigation.
    pub fn record_reissue(&self, reason: &'static str) {
        self.reissues_total.fetch_add(1, Ordering::Relaxed);
        counter!("bfcache_reissued_navigations_total", "reason" => reason).increment(1);
    }

    /// Records the time between a restore request and its commit.
    pub fn record_restore_latency(&self, duration: Duration) {
        histogram!("bfcache_restore_duration_seconds").record(duration.as_secs_f64());
    }

    // =========================================================================
    // Totals
    // =========================================================================

    /// Total pages stored.
    pub fn stores(&self) -> u64 {
        self.stores_total.load(Ordering::Relaxed)
    }

    /// Total evictions.
    pub fn evictions(&self) -> u64 {
        self.evictions_total.load(Ordering::Relaxed)
    }

    /// Total restores.
    pub fn restores(&self) -> u64 {
        self.restores_total.load(Ordering::Relaxed)
    }

    /// Total reissued navigations.
    pub fn reissues(&self) -> u64 {
        self.reissues_total.load(Ordering::Relaxed)
    }
}

impl Default for CacheMetrics {
    fn default() -> Self {
        Self::new()
    }
}
