//! Error history - recent failures with recovery hints.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::LinkError;

/// Default number of errors kept.
pub const DEFAULT_ERROR_HISTORY_CAPACITY: usize = 50;

/// One recorded failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorRecord {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub recovery_hint: &'static str,
}

impl ErrorRecord {
    pub fn from_error(error: &LinkError) -> Self {
        Self {
            timestamp: Utc::now(),
            message: error.to_string(),
            recovery_hint: error.recovery_hint(),
        }
    }
}

/// Newest-first list of [`ErrorRecord`], bounded.
#[derive(Debug)]
pub struct ErrorHistory {
    records: VecDeque<ErrorRecord>,
    capacity: usize,
}

impl ErrorHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record `error`; the oldest record falls off when full.
    pub fn record(&mut self, error: &LinkError) {
        tracing::debug!("Recording error: {}", error);
        self.records.push_front(ErrorRecord::from_error(error));
        self.records.truncate(self.capacity);
    }

    /// Most recent record.
    pub fn latest(&self) -> Option<&ErrorRecord> {
        self.records.front()
    }

    /// Copy of all records, newest first.
    pub fn records(&self) -> Vec<ErrorRecord> {
        self.records.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

impl Default for ErrorHistory {
    fn default() -> Self {
        Self::new(DEFAULT_ERROR_HISTORY_CAPACITY)
    }
}
