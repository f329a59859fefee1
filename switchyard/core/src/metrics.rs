//! Dispatch Metrics
//!
//! Running counters for the dispatch loop, an incremental mean task duration,
//! and latency histograms shared with the router.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

// ============================================================================
// Histogram for Latency Tracking
// ============================================================================

/// A histogram for tracking latency distributions
#[derive(Debug)]
pub struct Histogram {
    /// Bucket upper bounds in milliseconds
    buckets: Vec<f64>,
    /// Count per bucket
    counts: Vec<AtomicU64>,
    /// Total count
    total_count: AtomicU64,
    /// Sum of all values
    sum: AtomicU64,
    /// Maximum value seen
    max: AtomicU64,
}

impl Histogram {
    /// Create a histogram with the given bucket upper bounds
    pub fn new(buckets: Vec<f64>) -> Self {
        let counts = buckets.iter().map(|_| AtomicU64::new(0)).collect();
        Self {
            buckets,
            counts,
            total_count: AtomicU64::new(0),
            sum: AtomicU64::new(0),
            max: AtomicU64::new(0),
        }
    }

    /// Default latency buckets (milliseconds)
    pub fn latency_default() -> Self {
        Self::new(vec![
            10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0, 30000.0,
            60000.0, 120000.0,
        ])
    }

    /// Record a duration
    pub fn record(&self, value: Duration) {
        if self.buckets.is_empty() {
            return;
        }
        let ms = value.as_millis() as u64;
        let bucket_idx = self
            .buckets
            .iter()
            .position(|&b| ms as f64 <= b)
            .unwrap_or(self.buckets.len() - 1);

        self.counts[bucket_idx].fetch_add(1, Ordering::Relaxed);
        self.total_count.fetch_add(1, Ordering::Relaxed);
        self.sum.fetch_add(ms, Ordering::Relaxed);
        self.max.fetch_max(ms, Ordering::Relaxed);
    }

    /// Get histogram snapshot
    pub fn snapshot(&self) -> HistogramSnapshot {
        let counts: Vec<u64> = self
            .counts
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .collect();
        let total = self.total_count.load(Ordering::Relaxed);
        let sum = self.sum.load(Ordering::Relaxed);

        HistogramSnapshot {
            buckets: self.buckets.clone(),
            counts,
            total,
            max_ms: self.max.load(Ordering::Relaxed),
            mean_ms: if total > 0 {
                sum as f64 / total as f64
            } else {
                0.0
            },
        }
    }
}

/// Snapshot of histogram data
#[derive(Clone, Debug, Serialize)]
pub struct HistogramSnapshot {
    /// Bucket upper bounds in milliseconds
    pub buckets: Vec<f64>,
    /// Count per bucket
    pub counts: Vec<u64>,
    /// Total samples
    pub total: u64,
    /// Largest sample
    pub max_ms: u64,
    /// Mean sample
    pub mean_ms: f64,
}

impl HistogramSnapshot {
    /// Upper bound of the bucket holding the `p` quantile
    pub fn percentile(&self, p: f64) -> f64 {
        if self.total == 0 {
            return 0.0;
        }

        let target = ((self.total as f64 * p).ceil() as u64).max(1);
        let mut cumulative = 0u64;

        for (i, &count) in self.counts.iter().enumerate() {
            cumulative += count;
            if cumulative >= target {
                return self.buckets[i];
            }
        }

        self.buckets.last().copied().unwrap_or(0.0)
    }

    /// Get p50
    pub fn p50(&self) -> f64 {
        self.percentile(0.5)
    }

    /// Get p99
    pub fn p99(&self) -> f64 {
        self.percentile(0.99)
    }
}

// ============================================================================
// Dispatch Metrics
// ============================================================================

#[derive(Debug, Default)]
struct Counters {
    tasks_processed: u64,
    tasks_completed: u64,
    tasks_failed: u64,
    tasks_requeued: u64,
    tasks_cancelled: u64,
    avg_task_secs: f64,
}

/// Running totals for the dispatch loop
#[derive(Debug)]
pub struct DispatchMetrics {
    counters: Mutex<Counters>,
    durations: Histogram,
}

impl Default for DispatchMetrics {
    fn default() -> Self {
        Self {
            counters: Mutex::new(Counters::default()),
            durations: Histogram::latency_default(),
        }
    }
}

impl DispatchMetrics {
    /// Create zeroed metrics
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a finished execution.
    ///
    /// The mean is updated incrementally: `avg' = avg + (d - avg) / n`.
    pub fn record_execution(&self, duration: Duration, success: bool) {
        self.durations.record(duration);

        let mut c = self.counters.lock();
        c.tasks_processed += 1;
        if success {
            c.tasks_completed += 1;
        } else {
            c.tasks_failed += 1;
        }

        let n = c.tasks_processed as f64;
        c.avg_task_secs += (duration.as_secs_f64() - c.avg_task_secs) / n;
    }

    /// Count a requeue
    pub fn record_requeue(&self) {
        self.counters.lock().tasks_requeued += 1;
    }

    /// Count a cancellation
    pub fn record_cancel(&self) {
        self.counters.lock().tasks_cancelled += 1;
    }

    /// Current mean task duration
    pub fn avg_task_duration(&self) -> Duration {
        Duration::from_secs_f64(self.counters.lock().avg_task_secs.max(0.0))
    }

    /// Get metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        let c = self.counters.lock();
        MetricsSnapshot {
            tasks_processed: c.tasks_processed,
            tasks_completed: c.tasks_completed,
            tasks_failed: c.tasks_failed,
            tasks_requeued: c.tasks_requeued,
            tasks_cancelled: c.tasks_cancelled,
            avg_task_duration_ms: c.avg_task_secs * 1000.0,
            task_durations: self.durations.snapshot(),
        }
    }
}

/// Serializable dispatch metrics
#[derive(Clone, Debug, Serialize)]
pub struct MetricsSnapshot {
    /// Executions finished (completed + failed)
    pub tasks_processed: u64,
    /// Executions that succeeded
    pub tasks_completed: u64,
    /// Executions that failed
    pub tasks_failed: u64,
    /// Times a task went back to the queue
    pub tasks_requeued: u64,
    /// Tasks cancelled before dispatch
    pub tasks_cancelled: u64,
    /// Mean execution time
    pub avg_task_duration_ms: f64,
    /// Execution time distribution
    pub task_durations: HistogramSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incremental_mean() {
        let metrics = DispatchMetrics::new();
        metrics.record_execution(Duration::from_millis(10), true);
        metrics.record_execution(Duration::from_millis(20), true);
        metrics.record_execution(Duration::from_millis(30), false);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.tasks_processed, 3);
        assert_eq!(snapshot.tasks_completed, 2);
        assert_eq!(snapshot.tasks_failed, 1);
        assert!((snapshot.avg_task_duration_ms - 20.0).abs() < 1e-3);
    }

    #[test]
    fn test_counters() {
        let metrics = DispatchMetrics::new();
        metrics.record_requeue();
        metrics.record_requeue();
        metrics.record_cancel();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.tasks_requeued, 2);
        assert_eq!(snapshot.tasks_cancelled, 1);
        assert_eq!(snapshot.tasks_processed, 0);
        assert_eq!(snapshot.avg_task_duration_ms, 0.0);
    }

    #[test]
    fn test_histogram_percentiles() {
        let histogram = Histogram::new(vec![10.0, 100.0, 1000.0]);
        for _ in 0..9 {
            histogram.record(Duration::from_millis(5));
        }
        histogram.record(Duration::from_millis(500));

        let snapshot = histogram.snapshot();
        assert_eq!(snapshot.total, 10);
        assert_eq!(snapshot.counts, vec![9, 0, 1]);
        assert_eq!(snapshot.p50(), 10.0);
        assert_eq!(snapshot.p99(), 1000.0);
        assert_eq!(snapshot.max_ms, 500);
    }

    #[test]
    fn test_histogram_overflow_goes_to_last_bucket() {
        let histogram = Histogram::new(vec![10.0, 100.0]);
        histogram.record(Duration::from_secs(5));
        assert_eq!(histogram.snapshot().counts, vec![0, 1]);
    }
}
