//! CLI error types.

use thiserror::Error;

/// Errors that abort a workload run.
#[derive(Debug, Error)]
pub enum Error {
    /// A backend failed while preparing its fixtures.
    #[error("{backend} setup failed: {message}")]
    Setup {
        backend: &'static str,
        message: String,
    },

    /// A workload task panicked or was cancelled.
    #[error("workload task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Metrics could not be serialized.
    #[error("export error: {0}")]
    Export(#[from] serde_json::Error),
}

impl Error {
    /// Setup failure for `backend`.
    pub fn setup(backend: &'static str, err: impl std::fmt::Display) -> Self {
        Error::Setup {
            backend,
            message: err.to_string(),
        }
    }
}

/// Result type for CLI operations.
pub type Result<T> = std::result::Result<T, Error>;
