//! Fixed-bucket latency histogram.
//!
//! The histogram has no synchronization of its own: it lives inside a
//! [`CategoryAggregate`](crate::CategoryAggregate) and is updated under the
//! aggregate's lock together with the counters, so a snapshot of both is
//! always consistent.

use std::time::Duration;

use serde::Serialize;

/// Bucket upper bounds in microseconds: 100us, 500us, 1ms, 5ms, 10ms, 50ms,
/// 100ms, 500ms, 1s, 5s. Larger values land in the last bucket.
pub const LATENCY_BUCKETS_US: [u64; 10] = [
    100, 500, 1_000, 5_000, 10_000, 50_000, 100_000, 500_000, 1_000_000, 5_000_000,
];

/// Latency distribution over [`LATENCY_BUCKETS_US`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LatencyHistogram {
    counts: [u64; LATENCY_BUCKETS_US.len()],
}

impl LatencyHistogram {
    /// Create an empty histogram.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one observation.
    pub fn observe(&mut self, value: Duration) {
        let value_us = value.as_micros().min(u64::MAX as u128) as u64;
        let index = LATENCY_BUCKETS_US
            .iter()
            .position(|&boundary| value_us <= boundary)
            .unwrap_or(LATENCY_BUCKETS_US.len() - 1);
        self.counts[index] += 1;
    }

    /// Total number of observations.
    pub fn count(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Approximate percentile (e.g. 0.99 for P99).
    ///
    /// Returns the upper bound of the bucket holding the target rank, or
    /// zero when empty.
    pub fn percentile(&self, p: f64) -> Duration {
        let total = self.count();
        if total == 0 {
            return Duration::ZERO;
        }

        let target = ((total as f64 * p).ceil() as u64).max(1);
        let mut cumulative = 0u64;
        for (count, &boundary) in self.counts.iter().zip(LATENCY_BUCKETS_US.iter()) {
            cumulative += count;
            if cumulative >= target {
                return Duration::from_micros(boundary);
            }
        }
        Duration::from_micros(LATENCY_BUCKETS_US[LATENCY_BUCKETS_US.len() - 1])
    }

    /// Bucket bounds paired with their (non-cumulative) counts.
    pub fn buckets(&self) -> Vec<(u64, u64)> {
        LATENCY_BUCKETS_US
            .iter()
            .copied()
            .zip(self.counts.iter().copied())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observe_buckets() {
        let mut hist = LatencyHistogram::new();
        hist.observe(Duration::from_micros(50));
        hist.observe(Duration::from_micros(200));
        hist.observe(Duration::from_micros(1_500));
        hist.observe(Duration::from_secs(60));

        let buckets = hist.buckets();
        assert_eq!(buckets[0], (100, 1));
        assert_eq!(buckets[1], (500, 1));
        assert_eq!(buckets[3], (5_000, 1));
        assert_eq!(buckets[9], (5_000_000, 1));
        assert_eq!(hist.count(), 4);
    }

    #[test]
    fn test_percentile() {
        let mut hist = LatencyHistogram::new();
        for _ in 0..100 {
            hist.observe(Duration::from_micros(50));
        }
        assert_eq!(hist.percentile(0.50), Duration::from_micros(100));
        assert_eq!(hist.percentile(0.99), Duration::from_micros(100));

        for _ in 0..100 {
            hist.observe(Duration::from_micros(800));
        }
        assert_eq!(hist.percentile(0.50), Duration::from_micros(100));
        assert_eq!(hist.percentile(0.99), Duration::from_micros(1_000));
    }

    #[test]
    fn test_empty() {
        let hist = LatencyHistogram::new();
        assert_eq!(hist.count(), 0);
        assert_eq!(hist.percentile(0.5), Duration::ZERO);
    }
}
