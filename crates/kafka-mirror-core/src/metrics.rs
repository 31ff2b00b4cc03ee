//! Mirror throughput and error counters.
//!
//! Counters are lock-free; produce latencies keep a bounded window of samples.
//! The mirror loop logs a [`MetricsReport`] periodically and once more when it
//! terminates.

use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Produce latency samples kept for percentiles
const LATENCY_WINDOW: usize = 1000;

/// Mirror metrics collector
pub struct MirrorMetrics {
    /// Fetch calls on the source consumer
    pub polls: AtomicU64,
    /// Records returned by the source
    pub records_fetched: AtomicU64,
    /// Payload bytes returned by the source
    pub bytes_fetched: AtomicU64,
    /// Records acknowledged (or sent, with `acks = none`) by the sink
    pub records_forwarded: AtomicU64,
    /// Per-partition fetch errors reported
    pub fetch_errors: AtomicU64,
    /// Batches the sink rejected or never received
    pub produce_errors: AtomicU64,
    /// Records in failed batches
    pub records_dropped: AtomicU64,
    produce_latencies_ns: RwLock<Vec<u64>>,
    start_time: Instant,
}

impl Default for MirrorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MirrorMetrics {
    pub fn new() -> Self {
        Self {
            polls: AtomicU64::new(0),
            records_fetched: AtomicU64::new(0),
            bytes_fetched: AtomicU64::new(0),
            records_forwarded: AtomicU64::new(0),
            fetch_errors: AtomicU64::new(0),
            produce_errors: AtomicU64::new(0),
            records_dropped: AtomicU64::new(0),
            produce_latencies_ns: RwLock::new(Vec::with_capacity(LATENCY_WINDOW)),
            start_time: Instant::now(),
        }
    }

    pub fn record_poll(&self, records: u64, bytes: u64, errors: u64) {
        self.polls.fetch_add(1, Ordering::Relaxed);
        self.records_fetched.fetch_add(records, Ordering::Relaxed);
        self.bytes_fetched.fetch_add(bytes, Ordering::Relaxed);
        self.fetch_errors.fetch_add(errors, Ordering::Relaxed);
    }

    pub fn record_forwarded(&self, records: u64, latency: Duration) {
        self.records_forwarded.fetch_add(records, Ordering::Relaxed);

        let mut latencies = self.produce_latencies_ns.write();
        latencies.push(latency.as_nanos() as u64);
        if latencies.len() > LATENCY_WINDOW {
            latencies.remove(0);
        }
    }

    pub fn record_produce_error(&self, records: u64) {
        self.produce_errors.fetch_add(1, Ordering::Relaxed);
        self.records_dropped.fetch_add(records, Ordering::Relaxed);
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Forwarded records per second since the collector was created
    pub fn records_per_second(&self) -> f64 {
        let records = self.records_forwarded.load(Ordering::Relaxed) as f64;
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            records / elapsed
        } else {
            0.0
        }
    }

    pub fn produce_latency_stats(&self) -> LatencyStats {
        let latencies = self.produce_latencies_ns.read();
        LatencyStats::from_samples(&latencies)
    }

    /// Point-in-time copy of every counter
    pub fn report(&self) -> MetricsReport {
        MetricsReport {
            elapsed_secs: self.elapsed().as_secs_f64(),
            polls: self.polls.load(Ordering::Relaxed),
            records_fetched: self.records_fetched.load(Ordering::Relaxed),
            bytes_fetched: self.bytes_fetched.load(Ordering::Relaxed),
            records_forwarded: self.records_forwarded.load(Ordering::Relaxed),
            fetch_errors: self.fetch_errors.load(Ordering::Relaxed),
            produce_errors: self.produce_errors.load(Ordering::Relaxed),
            records_dropped: self.records_dropped.load(Ordering::Relaxed),
            records_per_second: self.records_per_second(),
            produce_latency: self.produce_latency_stats(),
        }
    }
}

/// Latency statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct LatencyStats {
    pub count: usize,
    pub avg_ms: f64,
    pub p50_ms: f64,
    pub p99_ms: f64,
    pub max_ms: f64,
}

impl LatencyStats {
    /// Calculate stats from samples (in nanoseconds)
    fn from_samples(samples: &[u64]) -> Self {
        let mut sorted: Vec<u64> = samples.to_vec();
        sorted.sort_unstable();

        let Some(&max) = sorted.last() else {
            return Self::default();
        };

        let count = sorted.len();
        let sum: u64 = sorted.iter().sum();
        let ns_to_ms = |ns: u64| ns as f64 / 1_000_000.0;

        Self {
            count,
            avg_ms: ns_to_ms(sum / count as u64),
            p50_ms: ns_to_ms(sorted[count / 2]),
            p99_ms: ns_to_ms(sorted[(count as f64 * 0.99) as usize]),
            max_ms: ns_to_ms(max),
        }
    }
}

/// Metrics report
#[derive(Debug, Clone, Serialize)]
pub struct MetricsReport {
    pub elapsed_secs: f64,
    pub polls: u64,
    pub records_fetched: u64,
    pub bytes_fetched: u64,
    pub records_forwarded: u64,
    pub fetch_errors: u64,
    pub produce_errors: u64,
    pub records_dropped: u64,
    pub records_per_second: f64,
    pub produce_latency: LatencyStats,
}

impl std::fmt::Display for MetricsReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "elapsed={:.1}s polls={} fetched={} ({} bytes) forwarded={} ({:.0}/s) \
             fetch_errors={} produce_errors={} dropped={} produce_p99={:.2}ms",
            self.elapsed_secs,
            self.polls,
            self.records_fetched,
            self.bytes_fetched,
            self.records_forwarded,
            self.records_per_second,
            self.fetch_errors,
            self.produce_errors,
            self.records_dropped,
            self.produce_latency.p99_ms
        )
    }
}
