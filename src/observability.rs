//! Cache statistics and performance monitoring.
//!
//! [`CacheMetrics`] is the hook trait the store calls on every operation.
//! [`StatsCollector`] is the built-in implementation: lock-free process-wide
//! counters, reset only on restart, summarised on demand by
//! [`StatsCollector::snapshot`].
//!
//! Custom sinks (Prometheus, StatsD) implement [`CacheMetrics`] and are
//! attached next to the collector, see
//! [`CacheStore::with_metrics`](crate::store::CacheStore::with_metrics).
//!
//! Batched reads and writes report once per item, each with an equal share of
//! the batch's wall time, so the average response time stays a per-entry figure.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Trait for cache metrics collection.
pub trait CacheMetrics: Send + Sync {
    /// Record a cache hit.
    fn record_hit(&self, key: &str, duration: Duration) {
        debug!("Cache HIT: {} took {:?}", key, duration);
    }

    /// Record a cache miss (including a fast-failed read on an open circuit).
    fn record_miss(&self, key: &str, duration: Duration) {
        debug!("Cache MISS: {} took {:?}", key, duration);
    }

    /// Record a successful write.
    fn record_write(&self, key: &str, duration: Duration) {
        debug!("Cache SET: {} took {:?}", key, duration);
    }

    /// Record an error.
    fn record_error(&self, key: &str, error: &str) {
        warn!("Cache ERROR for {}: {}", key, error);
    }
}

/// Metrics sink that discards everything.
#[derive(Clone, Default)]
pub struct NoOpMetrics;

impl CacheMetrics for NoOpMetrics {
    fn record_hit(&self, _key: &str, _duration: Duration) {}
    fn record_miss(&self, _key: &str, _duration: Duration) {}
    fn record_write(&self, _key: &str, _duration: Duration) {}
    fn record_error(&self, _key: &str, _error: &str) {}
}

/// Point-in-time view of the counters.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub errors: u64,
    /// Percentage of reads that hit, rounded to two decimals. `0.0` before any read.
    pub hit_rate: f64,
    /// Mean time per timed operation, milliseconds.
    pub average_response_time: f64,
    /// Cumulative time across timed operations, milliseconds.
    pub total_response_time: f64,
}

/// Process-wide cache counters.
#[derive(Debug, Default)]
pub struct StatsCollector {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    errors: AtomicU64,
    total_response_micros: AtomicU64,
    timed_operations: AtomicU64,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    fn record_time(&self, duration: Duration) {
        let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        self.total_response_micros
            .fetch_add(micros, Ordering::Relaxed);
        self.timed_operations.fetch_add(1, Ordering::Relaxed);
    }

    /// Compute the current statistics. Never fails.
    pub fn snapshot(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let writes = self.writes.load(Ordering::Relaxed);
        let errors = self.errors.load(Ordering::Relaxed);
        let total_micros = self.total_response_micros.load(Ordering::Relaxed);
        let timed = self.timed_operations.load(Ordering::Relaxed);

        let reads = hits + misses;
        let hit_rate = if reads > 0 {
            round2(hits as f64 / reads as f64 * 100.0)
        } else {
            0.0
        };

        let total_ms = total_micros as f64 / 1000.0;
        let average_response_time = if timed > 0 {
            total_ms / timed as f64
        } else {
            0.0
        };

        CacheStats {
            hits,
            misses,
            writes,
            errors,
            hit_rate,
            average_response_time,
            total_response_time: total_ms,
        }
    }

    /// Zero every counter.
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.writes.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
        self.total_response_micros.store(0, Ordering::Relaxed);
        self.timed_operations.store(0, Ordering::Relaxed);
    }
}

impl CacheMetrics for StatsCollector {
    fn record_hit(&self, key: &str, duration: Duration) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.record_time(duration);
        debug!("Cache hit for key: {}, response time: {:?}", key, duration);
    }

    fn record_miss(&self, key: &str, duration: Duration) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.record_time(duration);
        debug!("Cache miss for key: {}", key);
    }

    fn record_write(&self, key: &str, duration: Duration) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.record_time(duration);
        debug!("Cache set for key: {}", key);
    }

    fn record_error(&self, key: &str, error: &str) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        error!("Cache error for key {}: {}", key, error);
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Thresholds for the periodic performance report.
#[derive(Clone, Debug)]
pub struct MonitorConfig {
    pub interval: Duration,
    /// Warn when the hit rate (percent) drops below this.
    pub min_hit_rate: f64,
    /// Warn when the average response time (ms) exceeds this.
    pub max_avg_response_ms: f64,
    /// Alert when the error count exceeds this.
    pub max_errors: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            interval: Duration::from_secs(60),
            min_hit_rate: 70.0,
            max_avg_response_ms: 10.0,
            max_errors: 10,
        }
    }
}

/// Condition flagged by the performance monitor.
#[derive(Clone, Debug, PartialEq)]
pub enum Alert {
    LowHitRate(f64),
    SlowResponses(f64),
    HighErrorCount(u64),
}

impl MonitorConfig {
    /// Conditions in `stats` that breach the thresholds.
    pub fn assess(&self, stats: &CacheStats) -> Vec<Alert> {
        let mut alerts = Vec::new();

        if stats.hits + stats.misses > 0 && stats.hit_rate < self.min_hit_rate {
            alerts.push(Alert::LowHitRate(stats.hit_rate));
        }
        if stats.average_response_time > self.max_avg_response_ms {
            alerts.push(Alert::SlowResponses(stats.average_response_time));
        }
        if stats.errors > self.max_errors {
            alerts.push(Alert::HighErrorCount(stats.errors));
        }

        alerts
    }
}

/// Log a performance report every `config.interval` until the handle is aborted.
pub fn spawn_monitor(stats: Arc<StatsCollector>, config: MonitorConfig) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.interval);
        // first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let snapshot = stats.snapshot();

            info!(
                "Cache performance report: hit rate {:.2}%, avg response {:.2}ms, {} operations, {} errors",
                snapshot.hit_rate,
                snapshot.average_response_time,
                snapshot.hits + snapshot.misses,
                snapshot.errors
            );

            for alert in config.assess(&snapshot) {
                match alert {
                    Alert::LowHitRate(rate) => warn!("Low cache hit rate: {:.2}%", rate),
                    Alert::SlowResponses(ms) => {
                        warn!("High average response time: {:.2}ms", ms)
                    }
                    Alert::HighErrorCount(n) => error!("High error count: {} errors", n),
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_metrics() {
        let metrics = NoOpMetrics;
        metrics.record_hit("key", Duration::from_secs(1));
        metrics.record_miss("key", Duration::from_secs(2));
    }

    #[test]
    fn test_empty_snapshot() {
        let stats = StatsCollector::new().snapshot();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.hit_rate, 0.0);
        assert_eq!(stats.average_response_time, 0.0);
    }

    #[test]
    fn test_hit_rate_three_hits_two_misses() {
        let collector = StatsCollector::new();
        for _ in 0..3 {
            collector.record_hit("k", Duration::from_millis(1));
        }
        for _ in 0..2 {
            collector.record_miss("k", Duration::from_millis(1));
        }

        let stats = collector.snapshot();
        assert_eq!(stats.hit_rate, 60.0);
        assert_eq!(stats.hits, 3);
        assert_eq!(stats.misses, 2);
    }

    #[test]
    fn test_hit_rate_rounding() {
        let collector = StatsCollector::new();
        collector.record_hit("k", Duration::ZERO);
        collector.record_miss("k", Duration::ZERO);
        collector.record_miss("k", Duration::ZERO);

        assert_eq!(collector.snapshot().hit_rate, 33.33);
    }

    #[test]
    fn test_average_response_time() {
        let collector = StatsCollector::new();
        collector.record_hit("k", Duration::from_millis(2));
        collector.record_write("k", Duration::from_millis(4));
        collector.record_error("k", "boom");

        let stats = collector.snapshot();
        assert_eq!(stats.writes, 1);
        assert_eq!(stats.errors, 1);
        assert!((stats.average_response_time - 3.0).abs() < 1e-9);
        assert!((stats.total_response_time - 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_reset() {
        let collector = StatsCollector::new();
        collector.record_hit("k", Duration::from_millis(2));
        collector.reset();
        assert_eq!(collector.snapshot(), StatsCollector::new().snapshot());
    }

    #[test]
    fn test_stats_serialise_camel_case() {
        let json = serde_json::to_value(StatsCollector::new().snapshot()).unwrap();
        assert!(json.get("hitRate").is_some());
        assert!(json.get("averageResponseTime").is_some());
    }

    #[test]
    fn test_monitor_assess() {
        let config = MonitorConfig::default();
        let stats = CacheStats {
            hits: 1,
            misses: 9,
            writes: 0,
            errors: 11,
            hit_rate: 10.0,
            average_response_time: 12.5,
            total_response_time: 125.0,
        };

        assert_eq!(
            config.assess(&stats),
            vec![
                Alert::LowHitRate(10.0),
                Alert::SlowResponses(12.5),
                Alert::HighErrorCount(11)
            ]
        );
    }

    #[test]
    fn test_monitor_ignores_hit_rate_without_reads() {
        let config = MonitorConfig::default();
        let stats = StatsCollector::new().snapshot();
        assert!(config.assess(&stats).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_monitor_runs_until_aborted() {
        let stats = Arc::new(StatsCollector::new());
        let handle = spawn_monitor(
            stats.clone(),
            MonitorConfig {
                interval: Duration::from_secs(1),
                ..MonitorConfig::default()
            },
        );

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!handle.is_finished());
        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());
    }
}
