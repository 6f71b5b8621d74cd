//! Index metrics.
//!
//! Metric namespaces:
//! - msgindex.rebuild.*
//! - msgindex.lookup.*
//! - msgindex.interim.*

use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Metric names.
pub mod names {
    /// Completed rebuilds counter.
    pub const REBUILDS_TOTAL: &str = "msgindex.rebuild.total";
    /// Rebuilds that failed before commit.
    pub const REBUILD_FAILURES_TOTAL: &str = "msgindex.rebuild.failures_total";
    /// Rebuilds skipped because one was already running on the thread.
    pub const REBUILDS_SKIPPED_TOTAL: &str = "msgindex.rebuild.skipped_total";
    /// Lock acquisitions that timed out.
    pub const LOCK_UNAVAILABLE_TOTAL: &str = "msgindex.rebuild.lock_unavailable_total";
    /// Lock wait histogram (seconds).
    pub const LOCK_WAIT_SECONDS: &str = "msgindex.rebuild.lock_wait_seconds";
    /// Critical section histogram (seconds).
    pub const CRITICAL_SECTION_SECONDS: &str = "msgindex.rebuild.critical_section_seconds";
    /// Keys in the last committed snapshot.
    pub const SNAPSHOT_KEYS: &str = "msgindex.rebuild.snapshot_keys";
    /// Conflicting keys in the last committed snapshot.
    pub const SNAPSHOT_CONFLICTS: &str = "msgindex.rebuild.snapshot_conflicts";
    /// Lock wait of the last rebuild (milliseconds).
    pub const LAST_LOCK_WAIT_MS: &str = "msgindex.rebuild.last_lock_wait_ms";
    /// Critical section of the last rebuild (milliseconds).
    pub const LAST_CRITICAL_SECTION_MS: &str = "msgindex.rebuild.last_critical_section_ms";
    /// Conflicting claims recorded by rebuilds.
    pub const CONFLICTS_TOTAL: &str = "msgindex.rebuild.conflicts_total";
    /// Follow-up rebuilds enqueued for a retained overlay.
    pub const FOLLOWUPS_TOTAL: &str = "msgindex.rebuild.followups_total";
    /// Keys changed by rebuilds.
    pub const CHANGED_KEYS_TOTAL: &str = "msgindex.rebuild.changed_keys_total";
    /// Post-commit side effects that failed.
    pub const SIDE_EFFECT_FAILURES_TOTAL: &str = "msgindex.rebuild.side_effect_failures_total";
    /// Lookup requests.
    pub const LOOKUPS_TOTAL: &str = "msgindex.lookup.total";
    /// Lookups served from the process cache.
    pub const LOOKUP_CACHE_HITS_TOTAL: &str = "msgindex.lookup.cache_hits_total";
    /// Lookups answered by the interim overlay.
    pub const LOOKUP_INTERIM_HITS_TOTAL: &str = "msgindex.lookup.interim_hits_total";
    /// Lookups degraded by a backend failure.
    pub const LOOKUP_ERRORS_TOTAL: &str = "msgindex.lookup.errors_total";
    /// Overlay merges.
    pub const INTERIM_MERGES_TOTAL: &str = "msgindex.interim.merges_total";
    /// Overlay entries deleted by rebuilds.
    pub const INTERIM_PURGES_TOTAL: &str = "msgindex.interim.purges_total";
    /// Overlay entries kept for a follow-up rebuild.
    pub const INTERIM_RETAINED_TOTAL: &str = "msgindex.interim.retained_total";
}

/// Counter, gauge and histogram registry.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    counters: RwLock<BTreeMap<String, AtomicU64>>,
    gauges: RwLock<BTreeMap<String, AtomicU64>>,
    histograms: RwLock<BTreeMap<String, HistogramData>>,
}

impl MetricsRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment a counter.
    pub fn counter_inc(&self, name: &str) {
        self.counter_add(name, 1);
    }

    /// Add to a counter.
    pub fn counter_add(&self, name: &str, value: u64) {
        if let Some(counter) = self.counters.read().get(name) {
            counter.fetch_add(value, Ordering::Relaxed);
            return;
        }
        self.counters
            .write()
            .entry(name.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(value, Ordering::Relaxed);
    }

    /// Counter value (0 if never incremented).
    pub fn counter_get(&self, name: &str) -> u64 {
        self.counters
            .read()
            .get(name)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Set a gauge.
    pub fn gauge_set(&self, name: &str, value: u64) {
        if let Some(gauge) = self.gauges.read().get(name) {
            gauge.store(value, Ordering::Relaxed);
            return;
        }
        self.gauges
            .write()
            .entry(name.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .store(value, Ordering::Relaxed);
    }

    /// Gauge value (0 if never set).
    pub fn gauge_get(&self, name: &str) -> u64 {
        self.gauges
            .read()
            .get(name)
            .map(|g| g.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Record a histogram observation.
    pub fn histogram_observe(&self, name: &str, value: f64) {
        self.histograms
            .write()
            .entry(name.to_string())
            .or_default()
            .observe(value);
    }

    /// Histogram summary, if anything was observed.
    pub fn histogram_get(&self, name: &str) -> Option<HistogramSnapshot> {
        self.histograms.read().get(name).map(|h| h.snapshot())
    }

    /// Export metrics in Prometheus text format.
    pub fn export_prometheus(&self) -> String {
        let mut output = String::new();

        for (name, value) in self.counters.read().iter() {
            let name = prometheus_name(name);
            output.push_str(&format!(
                "# TYPE {} counter\n{} {}\n",
                name,
                name,
                value.load(Ordering::Relaxed)
            ));
        }

        for (name, value) in self.gauges.read().iter() {
            let name = prometheus_name(name);
            output.push_str(&format!(
                "# TYPE {} gauge\n{} {}\n",
                name,
                name,
                value.load(Ordering::Relaxed)
            ));
        }

        for (name, data) in self.histograms.read().iter() {
            let name = prometheus_name(name);
            let snapshot = data.snapshot();
            output.push_str(&format!(
                "# TYPE {} summary\n{}_count {}\n{}_sum {}\n",
                name, name, snapshot.count, name, snapshot.sum
            ));
        }

        output
    }
}

fn prometheus_name(name: &str) -> String {
    name.replace('.', "_")
}

#[derive(Debug)]
struct HistogramData {
    count: AtomicU64,
    stats: Mutex<(f64, f64, f64)>,
}

impl Default for HistogramData {
    fn default() -> Self {
        Self {
            count: AtomicU64::new(0),
            stats: Mutex::new((0.0, f64::MAX, f64::MIN)),
        }
    }
}

impl HistogramData {
    fn observe(&self, value: f64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        let mut stats = self.stats.lock();
        stats.0 += value;
        stats.1 = stats.1.min(value);
        stats.2 = stats.2.max(value);
    }

    fn snapshot(&self) -> HistogramSnapshot {
        let (sum, min, max) = *self.stats.lock();
        HistogramSnapshot {
            count: self.count.load(Ordering::Relaxed),
            sum,
            min,
            max,
        }
    }
}

/// Histogram summary.
#[derive(Debug, Clone)]
pub struct HistogramSnapshot {
    /// Number of observations.
    pub count: u64,
    /// Sum of all observations.
    pub sum: f64,
    /// Minimum value observed.
    pub min: f64,
    /// Maximum value observed.
    pub max: f64,
}

impl HistogramSnapshot {
    /// Mean observation.
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

/// Typed recorder for index events.
#[derive(Debug, Default)]
pub struct IndexMetrics {
    registry: MetricsRegistry,
}

impl IndexMetrics {
    /// Create an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Underlying registry.
    pub fn registry(&self) -> &MetricsRegistry {
        &self.registry
    }

    // === Rebuild ===

    /// Record a committed rebuild.
    pub fn record_rebuild(
        &self,
        keys: usize,
        conflicts: usize,
        changed: usize,
        lock_wait: Duration,
        critical_section: Duration,
    ) {
        self.registry.counter_inc(names::REBUILDS_TOTAL);
        self.registry.gauge_set(names::SNAPSHOT_KEYS, keys as u64);
        self.registry
            .gauge_set(names::SNAPSHOT_CONFLICTS, conflicts as u64);
        self.registry
            .counter_add(names::CHANGED_KEYS_TOTAL, changed as u64);
        self.registry
            .gauge_set(names::LAST_LOCK_WAIT_MS, lock_wait.as_millis() as u64);
        self.registry.gauge_set(
            names::LAST_CRITICAL_SECTION_MS,
            critical_section.as_millis() as u64,
        );
        self.registry
            .histogram_observe(names::LOCK_WAIT_SECONDS, lock_wait.as_secs_f64());
        self.registry.histogram_observe(
            names::CRITICAL_SECTION_SECONDS,
            critical_section.as_secs_f64(),
        );
    }

    /// Record a rebuild that failed before commit.
    pub fn record_rebuild_failure(&self) {
        self.registry.counter_inc(names::REBUILD_FAILURES_TOTAL);
    }

    /// Record a re-entrant rebuild that was skipped.
    pub fn record_rebuild_skipped(&self) {
        self.registry.counter_inc(names::REBUILDS_SKIPPED_TOTAL);
    }

    /// Record a lock acquisition timeout.
    pub fn record_lock_unavailable(&self) {
        self.registry.counter_inc(names::LOCK_UNAVAILABLE_TOTAL);
    }

    /// Record conflicting claims seen while building a snapshot.
    pub fn record_conflicts(&self, count: usize) {
        self.registry
            .counter_add(names::CONFLICTS_TOTAL, count as u64);
    }

    /// Record a follow-up rebuild enqueued for a retained overlay.
    pub fn record_followup(&self) {
        self.registry.counter_inc(names::FOLLOWUPS_TOTAL);
    }

    /// Record a failed post-commit side effect.
    pub fn record_side_effect_failure(&self) {
        self.registry.counter_inc(names::SIDE_EFFECT_FAILURES_TOTAL);
    }

    // === Lookup ===

    /// Record a lookup and where it was answered.
    pub fn record_lookup(&self, source: LookupSource) {
        self.registry.counter_inc(names::LOOKUPS_TOTAL);
        match source {
            LookupSource::Cache => self.registry.counter_inc(names::LOOKUP_CACHE_HITS_TOTAL),
            LookupSource::Interim => self.registry.counter_inc(names::LOOKUP_INTERIM_HITS_TOTAL),
            LookupSource::Degraded => self.registry.counter_inc(names::LOOKUP_ERRORS_TOTAL),
            LookupSource::Filtered | LookupSource::Store => {}
        }
    }

    // === Interim ===

    /// Record an overlay merge.
    pub fn record_interim_merge(&self) {
        self.registry.counter_inc(names::INTERIM_MERGES_TOTAL);
    }

    /// Record an overlay purge.
    pub fn record_interim_purged(&self) {
        self.registry.counter_inc(names::INTERIM_PURGES_TOTAL);
    }

    /// Record an overlay kept for a follow-up rebuild.
    pub fn record_interim_retained(&self) {
        self.registry.counter_inc(names::INTERIM_RETAINED_TOTAL);
    }

    /// Export in Prometheus text format.
    pub fn export_prometheus(&self) -> String {
        self.registry.export_prometheus()
    }
}

/// Where a lookup was answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupSource {
    /// Namespace outside the configured message namespaces.
    Filtered,
    /// Process-local LRU cache.
    Cache,
    /// Interim overlay.
    Interim,
    /// Durable store.
    Store,
    /// A backend failed and the answer was degraded.
    Degraded,
}
