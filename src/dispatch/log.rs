//! Protocol log - bounded, append-only record of protocol events.
//!
//! Entries keep insertion order; when the log is full the oldest entry is
//! evicted. Entries carry a sequence id so a command's entry can be updated
//! in place once its outcome is known.

use std::collections::VecDeque;

use chrono::{DateTime, Local, Utc};
use serde::Serialize;

use crate::error::Result;

/// Default number of entries kept.
pub const DEFAULT_LOG_CAPACITY: usize = 1000;

/// What produced a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    CommandSent,
    ResponseReceived,
    SystemMessage,
    Error,
    Info,
}

/// Outcome recorded for a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Pending,
    Success,
    Failed,
    Timeout,
    NoResponse,
}

/// One protocol event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    /// Insertion sequence, unique within a log.
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: LogKind,
    pub command: Option<String>,
    pub response: Option<String>,
    pub status: LogStatus,
}

impl LogEntry {
    /// Render as `[HH:MM:SS] text` in local wall-clock time.
    pub fn display_line(&self) -> String {
        let stamp = self.timestamp.with_timezone(&Local).format("%H:%M:%S");

        let command = self.command.as_deref().unwrap_or("");
        let response = self.response.as_deref().unwrap_or("");
        let text = match self.kind {
            LogKind::CommandSent => format!("Command sent: {}", command),
            LogKind::ResponseReceived => format!("Response received: {}", response),
            LogKind::SystemMessage => format!("System: {}", response),
            LogKind::Error => format!("Error: {}", response),
            LogKind::Info => response.to_string(),
        };

        format!("[{}] {}", stamp, text)
    }

    fn mentions(&self, needle: &str) -> bool {
        [&self.command, &self.response]
            .into_iter()
            .flatten()
            .any(|text| text.to_lowercase().contains(needle))
    }
}

/// Which entries a log view shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFilter {
    #[default]
    All,
    Commands,
    Responses,
    System,
    /// Failed or timed out.
    Errors,
}

impl LogFilter {
    fn accepts(&self, entry: &LogEntry) -> bool {
        match self {
            LogFilter::All => true,
            LogFilter::Commands => entry.kind == LogKind::CommandSent,
            LogFilter::Responses => entry.kind == LogKind::ResponseReceived,
            LogFilter::System => entry.kind == LogKind::SystemMessage,
            LogFilter::Errors => {
                matches!(entry.status, LogStatus::Failed | LogStatus::Timeout)
            }
        }
    }
}

/// Command/response counters derived from the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct LogStatistics {
    pub total_commands: usize,
    pub successful_responses: usize,
    pub failed_responses: usize,
    pub pending_commands: usize,
}

/// Ring buffer of [`LogEntry`].
#[derive(Debug)]
pub struct ProtocolLog {
    entries: VecDeque<LogEntry>,
    capacity: usize,
    next_seq: u64,
}

impl ProtocolLog {
    /// Create a log that keeps at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(DEFAULT_LOG_CAPACITY)),
            capacity: capacity.max(1),
            next_seq: 1,
        }
    }

    /// Append an entry, evicting the oldest one if full. Returns its sequence id.
    pub fn append(
        &mut self,
        kind: LogKind,
        command: Option<String>,
        response: Option<String>,
        status: LogStatus,
    ) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;

        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(LogEntry {
            seq,
            timestamp: Utc::now(),
            kind,
            command,
            response,
            status,
        });

        seq
    }

    /// Update the status of entry `seq`. Returns false if it was evicted.
    pub fn set_status(&mut self, seq: u64, status: LogStatus) -> bool {
        match self.entries.binary_search_by_key(&seq, |e| e.seq) {
            Ok(idx) => {
                self.entries[idx].status = status;
                true
            }
            Err(_) => false,
        }
    }

    /// Get entry `seq` if still held.
    pub fn get(&self, seq: u64) -> Option<&LogEntry> {
        self.entries
            .binary_search_by_key(&seq, |e| e.seq)
            .ok()
            .map(|idx| &self.entries[idx])
    }

    /// Copy of all entries, oldest first.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.iter().cloned().collect()
    }

    /// Entries accepted by `filter` whose command or response contains
    /// `search` (case-insensitive). An empty search matches everything.
    pub fn filtered(&self, filter: LogFilter, search: &str) -> Vec<LogEntry> {
        let needle = search.to_lowercase();
        self.entries
            .iter()
            .filter(|e| filter.accepts(e))
            .filter(|e| needle.is_empty() || e.mentions(&needle))
            .cloned()
            .collect()
    }

    /// Counters over the held entries. `pending_commands` is left at zero.
    pub fn statistics(&self) -> LogStatistics {
        let mut stats = LogStatistics::default();
        for entry in &self.entries {
            match (entry.kind, entry.status) {
                (LogKind::CommandSent, _) => stats.total_commands += 1,
                (LogKind::ResponseReceived, LogStatus::Success) => {
                    stats.successful_responses += 1
                }
                (LogKind::ResponseReceived, LogStatus::Failed) => stats.failed_responses += 1,
                _ => {}
            }
        }
        stats
    }

    /// Newline-joined [`LogEntry::display_line`]s.
    pub fn export_text(entries: &[LogEntry]) -> String {
        entries
            .iter()
            .map(LogEntry::display_line)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Entries as a JSON array.
    pub fn export_json(entries: &[LogEntry]) -> Result<String> {
        Ok(serde_json::to_string_pretty(entries)?)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop every entry. Sequence ids keep increasing.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for ProtocolLog {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}
