//! probedb Core - command lifecycle capture and per-category metrics.
//!
//! This crate provides the backend-agnostic part of probedb: command
//! records, category aggregates, the metrics registry, operation
//! classification, and the [`Instrumented`] proxy that ties them together.
//!
//! # Usage
//!
//! ```ignore
//! use probedb_core::{instrument, new_shared_registry, KeywordClassifier};
//!
//! let registry = new_shared_registry();
//! let sql = instrument(connection, registry.clone(), KeywordClassifier::new());
//!
//! sql.execute("INSERT INTO users VALUES (?1)", &params).await?;
//!
//! let dml = registry.get("DML").unwrap().snapshot();
//! println!("{} inserts, {} errors", dml.call_count, dml.error_count);
//! println!("{}", registry.to_prometheus());
//! ```

pub mod aggregate;
pub mod classify;
pub mod config;
pub mod error;
pub mod histogram;
pub mod instrument;
pub mod payload;
pub mod record;
pub mod registry;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use aggregate::{AggregateSnapshot, CategoryAggregate};
pub use classify::{
    statement_keyword, Category, Classifier, KeywordClassifier, Operation, TableClassifier,
};
pub use config::InstrumentConfig;
pub use error::{Error, Result};
pub use histogram::LatencyHistogram;
pub use instrument::{instrument, Instrumented, CANCELLED_DETAIL};
pub use payload::Payload;
pub use record::{CommandRecord, Outcome};
pub use registry::{
    new_shared_registry, prometheus_text, MetricsRegistry, MetricsSink, RegistrySnapshot,
    SharedMetricsRegistry,
};
