//! Workload configuration.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use probedb_core::InstrumentConfig;

/// Default number of operations per backend.
pub const DEFAULT_ITERATIONS: usize = 1000;

/// Default number of concurrent tasks per backend.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// How the collected metrics are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExportFormat {
    /// Prometheus text exposition format.
    Prometheus,
    /// Pretty-printed JSON snapshot.
    Json,
}

/// Workload configuration.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Operations issued against each backend.
    pub iterations: usize,

    /// Concurrent tasks per backend.
    pub concurrency: usize,

    /// Output format.
    pub format: ExportFormat,

    /// SQLite database file. `None` uses an in-memory database.
    pub sqlite_path: Option<PathBuf>,

    /// Calls slower than this are logged.
    pub slow_call_threshold: Option<Duration>,

    /// Whether request and response payloads are captured.
    pub capture_payloads: bool,
}

impl RunConfig {
    /// Configuration with the given iteration count.
    pub fn new(iterations: usize) -> Self {
        Self {
            iterations,
            concurrency: DEFAULT_CONCURRENCY,
            format: ExportFormat::Prometheus,
            sqlite_path: None,
            slow_call_threshold: None,
            capture_payloads: true,
        }
    }

    /// Set the number of concurrent tasks.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Set the output format.
    pub fn with_format(mut self, format: ExportFormat) -> Self {
        self.format = format;
        self
    }

    /// Use a SQLite file instead of an in-memory database.
    pub fn with_sqlite_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.sqlite_path = Some(path.into());
        self
    }

    /// Log calls slower than `threshold`.
    pub fn with_slow_call_threshold(mut self, threshold: Duration) -> Self {
        self.slow_call_threshold = Some(threshold);
        self
    }

    /// Skip payload capture.
    pub fn without_payloads(mut self) -> Self {
        self.capture_payloads = false;
        self
    }

    /// Instrumentation settings for one backend.
    pub fn instrument_config(&self, backend: &str) -> InstrumentConfig {
        let mut config = InstrumentConfig::new(backend);
        if !self.capture_payloads {
            config = config.without_payloads();
        }
        if let Some(threshold) = self.slow_call_threshold {
            config = config.with_slow_call_threshold(threshold);
        }
        config
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self::new(DEFAULT_ITERATIONS)
    }
}

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "probedb")]
#[command(version, about = "Run an instrumented workload and print its command metrics", long_about = None)]
pub struct Args {
    /// Operations issued against each backend.
    #[arg(short, long, default_value_t = DEFAULT_ITERATIONS)]
    pub iterations: usize,

    /// Concurrent tasks per backend.
    #[arg(short, long, default_value_t = DEFAULT_CONCURRENCY)]
    pub concurrency: usize,

    /// Output format.
    #[arg(short, long, value_enum, default_value_t = ExportFormat::Prometheus)]
    pub format: ExportFormat,

    /// SQLite database file (in-memory when omitted).
    #[arg(long)]
    pub sqlite_path: Option<PathBuf>,

    /// Log calls slower than this many milliseconds. 0 disables.
    #[arg(long, default_value_t = 0)]
    pub slow_ms: u64,

    /// Do not capture request and response payloads.
    #[arg(long)]
    pub no_payloads: bool,
}

impl Args {
    /// Convert command-line arguments to a run configuration.
    pub fn into_config(self) -> RunConfig {
        let mut config = RunConfig::new(self.iterations)
            .with_concurrency(self.concurrency)
            .with_format(self.format);
        if let Some(path) = self.sqlite_path {
            config = config.with_sqlite_path(path);
        }
        if self.slow_ms > 0 {
            config = config.with_slow_call_threshold(Duration::from_millis(self.slow_ms));
        }
        if self.no_payloads {
            config = config.without_payloads();
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RunConfig::default();
        assert_eq!(config.iterations, DEFAULT_ITERATIONS);
        assert_eq!(config.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(config.format, ExportFormat::Prometheus);
        assert!(config.sqlite_path.is_none());
        assert!(config.capture_payloads);
    }

    #[test]
    fn test_args_into_config() {
        let args = Args::parse_from([
            "probedb",
            "--iterations",
            "50",
            "--concurrency",
            "0",
            "--format",
            "json",
            "--slow-ms",
            "25",
            "--no-payloads",
        ]);
        let config = args.into_config();

        assert_eq!(config.iterations, 50);
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.format, ExportFormat::Json);
        assert_eq!(config.slow_call_threshold, Some(Duration::from_millis(25)));
        assert!(!config.capture_payloads);
    }

    #[test]
    fn test_instrument_config() {
        let config = RunConfig::new(1)
            .with_slow_call_threshold(Duration::from_millis(5))
            .without_payloads()
            .instrument_config("redis");

        assert_eq!(config.backend, "redis");
        assert!(!config.capture_requests);
        assert!(!config.capture_responses);
        assert_eq!(config.slow_call_threshold, Some(Duration::from_millis(5)));
    }
}
