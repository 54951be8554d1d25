//! Sink test doubles.

use parking_lot::Mutex;

use crate::classify::Category;
use crate::error::{Error, Result};
use crate::record::CommandRecord;
use crate::registry::MetricsSink;

/// Keeps every record it receives.
#[derive(Debug, Default)]
pub struct CapturingSink {
    records: Mutex<Vec<(Vec<Category>, CommandRecord)>>,
}

impl CapturingSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records received so far, with their categories.
    pub fn records(&self) -> Vec<(Vec<Category>, CommandRecord)> {
        self.records.lock().clone()
    }

    /// Names of the records received so far.
    pub fn names(&self) -> Vec<String> {
        self.records
            .lock()
            .iter()
            .map(|(_, record)| record.name().to_string())
            .collect()
    }
}

impl MetricsSink for CapturingSink {
    fn record(&self, categories: &[Category], record: &CommandRecord) -> Result<()> {
        self.records
            .lock()
            .push((categories.to_vec(), record.clone()));
        Ok(())
    }
}

/// Rejects every record.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingSink;

impl MetricsSink for FailingSink {
    fn record(&self, _categories: &[Category], _record: &CommandRecord) -> Result<()> {
        Err(Error::RegistryClosed)
    }
}
