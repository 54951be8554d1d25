//! Core error types.

use thiserror::Error;

/// Instrumentation errors.
///
/// These describe misuse of the metrics core (wiring defects), never the
/// outcome of a backend call. Proxies log and discard them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The record was already finalized.
    #[error("command record `{name}` already ended")]
    AlreadyEnded {
        /// Name of the offending record.
        name: String,
    },

    /// The record was handed to an aggregate before it ended.
    #[error("command record `{name}` has not ended")]
    NotEnded {
        /// Name of the offending record.
        name: String,
    },

    /// The registry was closed and no longer accepts records.
    #[error("metrics registry is closed")]
    RegistryClosed,
}

/// Result alias for instrumentation operations.
pub type Result<T> = std::result::Result<T, Error>;
