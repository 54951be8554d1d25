//! Per-call command records.
//!
//! A [`CommandRecord`] is opened when a proxied call starts, owned by that
//! call, finalized exactly once when the call returns, and then handed
//! read-only to a [`MetricsSink`](crate::MetricsSink).

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::error::{Error, Result};
use crate::payload::Payload;

/// Final status of a recorded call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// The backend call succeeded.
    Ok,
    /// The backend call failed or was cancelled.
    Error,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Ok => write!(f, "ok"),
            Outcome::Error => write!(f, "error"),
        }
    }
}

/// Capture of a single proxied call.
#[derive(Debug, Clone)]
pub struct CommandRecord {
    name: String,
    request: Option<Payload>,
    response: Option<Payload>,
    started_at: SystemTime,
    start: Instant,
    cost: Option<Duration>,
    outcome: Option<Outcome>,
    error_detail: Option<String>,
}

impl CommandRecord {
    /// Open a record for the named operation, starting the clock.
    pub fn begin(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            request: None,
            response: None,
            started_at: SystemTime::now(),
            start: Instant::now(),
            cost: None,
            outcome: None,
            error_detail: None,
        }
    }

    /// Attach the request snapshot.
    pub fn set_request(&mut self, payload: Payload) -> Result<()> {
        self.ensure_open()?;
        self.request = Some(payload);
        Ok(())
    }

    /// Attach the response snapshot.
    pub fn set_response(&mut self, payload: Payload) -> Result<()> {
        self.ensure_open()?;
        self.response = Some(payload);
        Ok(())
    }

    /// Finalize the record.
    ///
    /// An error detail forces the outcome to [`Outcome::Error`], and an
    /// error outcome discards any response snapshot. A second call is
    /// rejected and leaves the first result untouched.
    pub fn end(&mut self, outcome: Outcome, error: Option<String>) -> Result<()> {
        self.ensure_open()?;

        let outcome = if error.is_some() {
            Outcome::Error
        } else {
            outcome
        };
        if outcome == Outcome::Error {
            self.response = None;
        }

        self.cost = Some(self.start.elapsed());
        self.outcome = Some(outcome);
        self.error_detail = error;
        Ok(())
    }

    /// Finalize as successful.
    pub fn end_ok(&mut self) -> Result<()> {
        self.end(Outcome::Ok, None)
    }

    /// Finalize as failed with the given detail.
    pub fn end_err(&mut self, detail: impl Into<String>) -> Result<()> {
        self.end(Outcome::Error, Some(detail.into()))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_ended() {
            return Err(Error::AlreadyEnded {
                name: self.name.clone(),
            });
        }
        Ok(())
    }

    /// Operation name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Request snapshot, if captured.
    pub fn request(&self) -> Option<&Payload> {
        self.request.as_ref()
    }

    /// Response snapshot, if captured. Always `None` for failed calls.
    pub fn response(&self) -> Option<&Payload> {
        self.response.as_ref()
    }

    /// Wall-clock start time.
    pub fn started_at(&self) -> SystemTime {
        self.started_at
    }

    /// Wall-clock start time in microseconds since the Unix epoch.
    pub fn started_at_us(&self) -> u64 {
        self.started_at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0)
    }

    /// Elapsed time between begin and end. `None` until ended.
    pub fn cost(&self) -> Option<Duration> {
        self.cost
    }

    /// Outcome. `None` until ended.
    pub fn outcome(&self) -> Option<Outcome> {
        self.outcome
    }

    /// Error detail for failed calls.
    pub fn error_detail(&self) -> Option<&str> {
        self.error_detail.as_deref()
    }

    /// Whether the record has been finalized.
    pub fn is_ended(&self) -> bool {
        self.outcome.is_some()
    }

    /// Whether the record ended with an error.
    pub fn is_error(&self) -> bool {
        self.outcome == Some(Outcome::Error)
    }

    /// Build an already-ended record with a fixed cost.
    #[cfg(test)]
    pub(crate) fn finished(name: &str, outcome: Outcome, cost: Duration) -> Self {
        let mut record = Self::begin(name);
        record.cost = Some(cost);
        record.outcome = Some(outcome);
        if outcome == Outcome::Error {
            record.error_detail = Some("failed".to_string());
        }
        record
    }
}
