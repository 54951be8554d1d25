//! Instrumentation configuration.

use std::time::Duration;

/// Default backend label used in log events.
pub const DEFAULT_BACKEND_LABEL: &str = "backend";

/// Default maximum serialized size of a request/response snapshot (4 KB).
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 4 * 1024;

/// Settings for an [`Instrumented`](crate::Instrumented) proxy.
#[derive(Debug, Clone)]
pub struct InstrumentConfig {
    /// Backend label attached to log events (e.g. "redis").
    pub backend: String,

    /// Attach request snapshots to records.
    pub capture_requests: bool,

    /// Attach response snapshots to successful records.
    pub capture_responses: bool,

    /// Log a warning for calls slower than this. `None` disables it.
    pub slow_call_threshold: Option<Duration>,

    /// Replace snapshots larger than this with a truncation marker.
    /// `None` keeps snapshots of any size.
    pub max_payload_bytes: Option<usize>,
}

impl InstrumentConfig {
    /// Create a configuration for the given backend label.
    pub fn new(backend: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            capture_requests: true,
            capture_responses: true,
            slow_call_threshold: None,
            max_payload_bytes: Some(DEFAULT_MAX_PAYLOAD_BYTES),
        }
    }

    /// Enable or disable request snapshots.
    pub fn with_capture_requests(mut self, enabled: bool) -> Self {
        self.capture_requests = enabled;
        self
    }

    /// Enable or disable response snapshots.
    pub fn with_capture_responses(mut self, enabled: bool) -> Self {
        self.capture_responses = enabled;
        self
    }

    /// Disable both request and response snapshots.
    pub fn without_payloads(self) -> Self {
        self.with_capture_requests(false)
            .with_capture_responses(false)
    }

    /// Set the slow call threshold.
    pub fn with_slow_call_threshold(mut self, threshold: Duration) -> Self {
        self.slow_call_threshold = Some(threshold);
        self
    }

    /// Set the maximum snapshot size.
    pub fn with_max_payload_bytes(mut self, max: usize) -> Self {
        self.max_payload_bytes = Some(max);
        self
    }

    /// Keep snapshots of any size.
    pub fn without_payload_limit(mut self) -> Self {
        self.max_payload_bytes = None;
        self
    }
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BACKEND_LABEL)
    }
}
