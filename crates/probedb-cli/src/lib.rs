//! probedb CLI library.
//!
//! Drives a concurrent workload through instrumented reference backends
//! and renders the collected command metrics.

pub mod config;
pub mod error;
pub mod report;
pub mod workload;

pub use config::{Args, ExportFormat, RunConfig};
pub use error::{Error, Result};
pub use report::render;
pub use workload::{run, BackendReport};
