//! Per-connection metrics registry.
//!
//! The registry maps category names to [`CategoryAggregate`]s, creating them
//! on first use, and exports their snapshots as JSON or Prometheus text.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;

use crate::aggregate::{AggregateSnapshot, CategoryAggregate};
use crate::classify::Category;
use crate::error::{Error, Result};
use crate::record::CommandRecord;

/// Destination for finished command records.
///
/// Proxies only talk to this trait, so tests can substitute a sink that
/// fails on purpose and assert the proxied call is unaffected.
pub trait MetricsSink: Send + Sync {
    /// Record a finished command under each of `categories`.
    fn record(&self, categories: &[Category], record: &CommandRecord) -> Result<()>;
}

/// Category name to aggregate map.
pub struct MetricsRegistry {
    started_at: Instant,
    aggregates: DashMap<String, Arc<CategoryAggregate>>,
    // Held for reading while a record is applied, so `close` waits for
    // in-flight updates before taking the final snapshot.
    closed: RwLock<bool>,
}

/// Serializable export of a whole registry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegistrySnapshot {
    /// Seconds since the registry was created.
    pub uptime_secs: u64,
    /// Aggregates keyed by category, sorted by name.
    pub categories: BTreeMap<String, AggregateSnapshot>,
}

impl MetricsRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            aggregates: DashMap::new(),
            closed: RwLock::new(false),
        }
    }

    /// Fold a finished record into every listed category.
    ///
    /// The record is validated before any aggregate changes, and a category
    /// listed twice is counted once.
    pub fn record(&self, categories: &[Category], record: &CommandRecord) -> Result<()> {
        let closed = self.closed.read();
        if *closed {
            return Err(Error::RegistryClosed);
        }
        let (Some(outcome), Some(cost)) = (record.outcome(), record.cost()) else {
            return Err(Error::NotEnded {
                name: record.name().to_string(),
            });
        };

        for (i, category) in categories.iter().enumerate() {
            if categories[..i].contains(category) {
                continue;
            }
            self.aggregate(category.as_str()).apply(outcome, cost);
        }
        Ok(())
    }

    /// Fetch or create the aggregate for `category`.
    fn aggregate(&self, category: &str) -> Arc<CategoryAggregate> {
        if let Some(existing) = self.aggregates.get(category) {
            return Arc::clone(existing.value());
        }
        // The entry API holds the shard lock, so concurrent first use of a
        // category yields a single aggregate.
        let entry = self
            .aggregates
            .entry(category.to_string())
            .or_insert_with(|| Arc::new(CategoryAggregate::new(category)));
        Arc::clone(entry.value())
    }

    /// Get the aggregate for a category, if anything was recorded under it.
    pub fn get(&self, category: &str) -> Option<Arc<CategoryAggregate>> {
        self.aggregates
            .get(category)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Snapshot every category.
    pub fn all(&self) -> BTreeMap<String, AggregateSnapshot> {
        self.aggregates
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().snapshot()))
            .collect()
    }

    /// Number of categories seen so far.
    pub fn category_count(&self) -> usize {
        self.aggregates.len()
    }

    /// Time since the registry was created.
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Serializable export of all categories.
    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            uptime_secs: self.uptime().as_secs(),
            categories: self.all(),
        }
    }

    /// Export as pretty-printed JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.snapshot())
    }

    /// Export to Prometheus text format.
    pub fn to_prometheus(&self) -> String {
        self.to_prometheus_labeled(&[])
    }

    /// Export to Prometheus text format with extra labels on every sample
    /// (e.g. `[("backend", "redis")]`).
    pub fn to_prometheus_labeled(&self, labels: &[(&str, &str)]) -> String {
        prometheus_text(&[(labels, self)])
    }

    /// Stop accepting records and return the final export.
    ///
    /// Records already being applied finish first, so the returned snapshot
    /// includes every record that was accepted.
    pub fn close(&self) -> RegistrySnapshot {
        let mut closed = self.closed.write();
        *closed = true;
        self.snapshot()
    }

    /// Whether [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        *self.closed.read()
    }

    /// Reset all aggregates to zero (for testing).
    pub fn reset(&self) {
        for entry in self.aggregates.iter() {
            entry.value().reset();
        }
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSink for MetricsRegistry {
    fn record(&self, categories: &[Category], record: &CommandRecord) -> Result<()> {
        MetricsRegistry::record(self, categories, record)
    }
}

/// Metric families exported per category: name, type, help, value.
type Family = (&'static str, &'static str, &'static str, fn(&AggregateSnapshot) -> u64);

const FAMILIES: [Family; 6] = [
    ("probedb_commands_total", "counter", "Total commands recorded", |s| s.call_count),
    ("probedb_command_errors_total", "counter", "Total failed commands", |s| s.error_count),
    (
        "probedb_command_duration_us_sum",
        "counter",
        "Sum of command durations in microseconds",
        |s| s.total_duration.as_micros() as u64,
    ),
    (
        "probedb_command_duration_us_avg",
        "gauge",
        "Average command duration in microseconds",
        |s| s.avg_duration().as_micros() as u64,
    ),
    (
        "probedb_command_duration_us_p99",
        "gauge",
        "P99 command duration in microseconds",
        |s| s.p99().as_micros() as u64,
    ),
    (
        "probedb_command_duration_us_max",
        "gauge",
        "Maximum command duration in microseconds",
        |s| s.max_duration.as_micros() as u64,
    ),
];

/// Export several registries as one Prometheus text document.
///
/// Each metric family is declared once, followed by the samples of every
/// registry tagged with that registry's labels. The label sets must differ
/// between registries or the samples collide.
pub fn prometheus_text(registries: &[(&[(&str, &str)], &MetricsRegistry)]) -> String {
    let exports: Vec<_> = registries
        .iter()
        .map(|(labels, registry)| {
            let extra: String = labels
                .iter()
                .map(|(name, value)| format!(",{}=\"{}\"", name, escape_label(value)))
                .collect();
            (extra, registry.uptime().as_secs(), registry.all())
        })
        .collect();
    let mut out = String::new();

    let _ = writeln!(out, "# HELP probedb_uptime_seconds Registry uptime in seconds");
    let _ = writeln!(out, "# TYPE probedb_uptime_seconds gauge");
    for (extra, uptime, _) in &exports {
        let base_labels = if extra.is_empty() {
            String::new()
        } else {
            format!("{{{}}}", &extra[1..])
        };
        let _ = writeln!(out, "probedb_uptime_seconds{} {}", base_labels, uptime);
    }
    out.push('\n');

    for (name, kind, help, value) in FAMILIES {
        let _ = writeln!(out, "# HELP {} {}", name, help);
        let _ = writeln!(out, "# TYPE {} {}", name, kind);
        for (extra, _, categories) in &exports {
            for (category, snapshot) in categories {
                let _ = writeln!(
                    out,
                    "{}{{category=\"{}\"{}}} {}",
                    name,
                    escape_label(category),
                    extra,
                    value(snapshot)
                );
            }
        }
        out.push('\n');
    }

    out
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

/// Shared metrics registry handle.
pub type SharedMetricsRegistry = Arc<MetricsRegistry>;

/// Create a new shared metrics registry.
pub fn new_shared_registry() -> SharedMetricsRegistry {
    Arc::new(MetricsRegistry::new())
}
