//! Per-category running statistics.

use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::histogram::LatencyHistogram;
use crate::record::{CommandRecord, Outcome};

/// Running statistics for one category.
///
/// All fields are updated under one lock so that a [`snapshot`] never
/// observes a partially applied update.
///
/// [`snapshot`]: CategoryAggregate::snapshot
#[derive(Debug)]
pub struct CategoryAggregate {
    category: String,
    stats: Mutex<AggregateSnapshot>,
}

/// Point-in-time copy of a [`CategoryAggregate`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AggregateSnapshot {
    /// Recorded calls.
    pub call_count: u64,
    /// Recorded calls that failed.
    pub error_count: u64,
    /// Sum of call durations.
    #[serde(rename = "total_duration_us", serialize_with = "serialize_micros")]
    pub total_duration: Duration,
    /// Slowest recorded call.
    #[serde(rename = "max_duration_us", serialize_with = "serialize_micros")]
    pub max_duration: Duration,
    /// Latency distribution.
    pub latency: LatencyHistogram,
}

fn serialize_micros<S: serde::Serializer>(
    value: &Duration,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u64(value.as_micros() as u64)
}

impl AggregateSnapshot {
    /// Successful calls.
    pub fn success_count(&self) -> u64 {
        self.call_count - self.error_count
    }

    /// Mean call duration, zero when empty.
    pub fn avg_duration(&self) -> Duration {
        if self.call_count == 0 {
            return Duration::ZERO;
        }
        let avg_nanos = self.total_duration.as_nanos() / self.call_count as u128;
        Duration::from_nanos(avg_nanos.min(u64::MAX as u128) as u64)
    }

    /// Fraction of calls that failed (0.0 - 1.0).
    pub fn error_rate(&self) -> f64 {
        if self.call_count == 0 {
            return 0.0;
        }
        self.error_count as f64 / self.call_count as f64
    }

    /// Approximate median latency.
    pub fn p50(&self) -> Duration {
        self.latency.percentile(0.50)
    }

    /// Approximate 99th percentile latency.
    pub fn p99(&self) -> Duration {
        self.latency.percentile(0.99)
    }
}

impl CategoryAggregate {
    /// Create an empty aggregate.
    pub fn new(category: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            stats: Mutex::new(AggregateSnapshot::default()),
        }
    }

    /// Category name.
    pub fn category(&self) -> &str {
        &self.category
    }

    /// Fold a finished record into the statistics.
    pub fn update(&self, record: &CommandRecord) -> Result<()> {
        let (Some(outcome), Some(cost)) = (record.outcome(), record.cost()) else {
            return Err(Error::NotEnded {
                name: record.name().to_string(),
            });
        };
        self.apply(outcome, cost);
        Ok(())
    }

    pub(crate) fn apply(&self, outcome: Outcome, cost: Duration) {
        let mut stats = self.stats.lock();
        stats.call_count += 1;
        if outcome == Outcome::Error {
            stats.error_count += 1;
        }
        stats.total_duration += cost;
        if cost > stats.max_duration {
            stats.max_duration = cost;
        }
        stats.latency.observe(cost);
    }

    /// Consistent copy of the current statistics.
    pub fn snapshot(&self) -> AggregateSnapshot {
        self.stats.lock().clone()
    }

    /// Recorded calls.
    pub fn call_count(&self) -> u64 {
        self.stats.lock().call_count
    }

    /// Recorded failures.
    pub fn error_count(&self) -> u64 {
        self.stats.lock().error_count
    }

    /// Sum of recorded durations.
    pub fn total_duration(&self) -> Duration {
        self.stats.lock().total_duration
    }

    pub(crate) fn reset(&self) {
        *self.stats.lock() = AggregateSnapshot::default();
    }
}
