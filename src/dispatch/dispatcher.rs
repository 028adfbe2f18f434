//! Command dispatcher - sending, correlation and timeouts.
//!
//! The dispatcher validates and rate-limits outgoing commands, writes them to a
//! [`CommandWriter`], and keeps every sent command pending until a response
//! correlates with it, it times out, or the link goes away.
//!
//! Correlation is by substring: a response belongs to a pending command when it
//! echoes the command text or carries a status token (`ok`, `success`, `error`,
//! `hata`). When several commands could match, the oldest one wins.

use std::collections::VecDeque;
use std::time::Duration;

use bytes::Bytes;
use serde::Deserialize;
use tokio::time::Instant;

use super::log::{LogEntry, LogKind, LogStatistics, LogStatus, ProtocolLog, DEFAULT_LOG_CAPACITY};
use super::rate_limit::{RateLimitPolicy, RateLimiter};
use crate::error::{LinkError, Result};
use crate::protocol::{self, ParsedResponse, SystemMessage, DEFAULT_MAX_COMMAND_LEN};
use crate::registry::ModuleRegistry;

/// Default time a command may stay unanswered.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Rate-limit key used for commands from this dispatcher.
pub const DEFAULT_SINK: &str = "default";

/// System status before the device reports one.
pub const INITIAL_SYSTEM_STATUS: &str = "OFFLINE";

/// Lowercase tokens that mark a line as a response to the oldest pending command.
const STATUS_TOKENS: [&str; 4] = ["ok", "success", "error", "hata"];

/// Lowercase tokens that mark a correlated response as a failure.
const FAILURE_TOKENS: [&str; 2] = ["error", "hata"];

/// Response text recorded when a command times out.
const TIMEOUT_TEXT: &str = "Timeout - no response";

/// Response text recorded when the link drops under a pending command.
const DISCONNECT_TEXT: &str = "Disconnected - no response";

/// Destination for command lines.
///
/// Implemented by the connection state machine; tests use a plain buffer.
pub trait CommandWriter {
    /// Whether an active write channel exists.
    fn is_ready(&self) -> bool;

    /// Queue one encoded line. Must not wait for delivery.
    fn write_line(&mut self, line: Bytes) -> Result<()>;
}

/// Configuration for [`CommandDispatcher`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Age after which a pending command is expired by `tick`.
    #[serde(rename = "command_timeout_ms", with = "crate::config::duration_ms")]
    pub command_timeout: Duration,
    /// Longest accepted command after sanitization.
    pub max_command_len: usize,
    /// Protocol log capacity.
    pub log_capacity: usize,
    /// Outgoing command quota.
    pub rate_limit: RateLimitPolicy,
    /// Resolve pending commands as `NoResponse` when the link drops,
    /// instead of leaving them to time out.
    pub fail_pending_on_disconnect: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            max_command_len: DEFAULT_MAX_COMMAND_LEN,
            log_capacity: DEFAULT_LOG_CAPACITY,
            rate_limit: RateLimitPolicy::default(),
            fail_pending_on_disconnect: true,
        }
    }
}

/// A sent command waiting for its response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCommand {
    /// Correlation key.
    pub seq: u64,
    /// Sanitized command text as written.
    pub command: String,
    pub sent_at: Instant,
    /// Sequence id of the `CommandSent` log entry.
    log_seq: u64,
}

/// Tracks in-flight commands and the protocol log.
#[derive(Debug)]
pub struct CommandDispatcher {
    config: DispatcherConfig,
    limiter: RateLimiter,
    /// Oldest first; send times are non-decreasing.
    pending: VecDeque<PendingCommand>,
    log: ProtocolLog,
    system_status: String,
    next_seq: u64,
}

impl CommandDispatcher {
    pub fn new(config: DispatcherConfig) -> Self {
        Self {
            limiter: RateLimiter::new(config.rate_limit),
            log: ProtocolLog::new(config.log_capacity),
            pending: VecDeque::new(),
            system_status: INITIAL_SYSTEM_STATUS.to_string(),
            next_seq: 1,
            config,
        }
    }

    /// Validate, rate-limit and write `command`.
    ///
    /// Returns the correlation sequence id of the new pending command.
    ///
    /// # Errors
    ///
    /// - [`LinkError::Validation`] for blank, non-ASCII or oversized text
    /// - [`LinkError::RateLimited`] when the quota for the window is used up
    /// - [`LinkError::NotReady`] when `writer` has no active write channel
    /// - whatever `writer` returns if it refuses the line
    ///
    /// The first three also append one `Error` entry to the log.
    ///
    /// `now` earlier than the newest pending command's send time is raised to
    /// it, so the pending queue stays ordered by `sent_at`.
    pub fn send<W>(&mut self, command: &str, writer: &mut W, now: Instant) -> Result<u64>
    where
        W: CommandWriter + ?Sized,
    {
        let sanitized = match self.admit(command, writer, now) {
            Ok(sanitized) => sanitized,
            Err(e) => {
                self.log.append(
                    LogKind::Error,
                    Some(command.to_string()),
                    Some(e.to_string()),
                    LogStatus::Failed,
                );
                return Err(e);
            }
        };

        let seq = self.next_seq;
        self.next_seq += 1;

        let log_seq = self.log.append(
            LogKind::CommandSent,
            Some(sanitized.clone()),
            None,
            LogStatus::Pending,
        );

        let line = Bytes::from(format!("{}\n", sanitized));
        if let Err(e) = writer.write_line(line) {
            tracing::warn!("Write of {:?} refused: {}", sanitized, e);
            self.log.set_status(log_seq, LogStatus::Failed);
            return Err(e);
        }

        tracing::debug!("Sent command #{}: {}", seq, sanitized);
        let now = self.pending.back().map_or(now, |last| now.max(last.sent_at));
        self.pending.push_back(PendingCommand {
            seq,
            command: sanitized,
            sent_at: now,
            log_seq,
        });

        Ok(seq)
    }

    fn admit<W>(&mut self, command: &str, writer: &W, now: Instant) -> Result<String>
    where
        W: CommandWriter + ?Sized,
    {
        let sanitized = protocol::validate(command, self.config.max_command_len)?;
        self.limiter.try_acquire(DEFAULT_SINK, now)?;
        if !writer.is_ready() {
            return Err(LinkError::NotReady);
        }
        Ok(sanitized)
    }

    /// Handle one complete line from the link.
    ///
    /// Returns the sequence id of the command it was correlated with, if any.
    pub fn on_message(&mut self, message: &str, registry: &mut ModuleRegistry) -> Option<u64> {
        let correlated = self.correlate(message);

        match SystemMessage::classify(message) {
            Some(SystemMessage::Status(status)) => {
                tracing::info!("System status: {}", status);
                self.system_status = status.to_string();
                self.log.append(
                    LogKind::SystemMessage,
                    None,
                    Some(status.to_string()),
                    LogStatus::Success,
                );
            }
            Some(SystemMessage::Log(text)) => {
                self.log
                    .append(LogKind::Info, None, Some(text.to_string()), LogStatus::Success);
            }
            None => {
                let parsed = ParsedResponse::parse(message);
                match parsed.module_update() {
                    Some((module, action, value)) => registry.apply(module, action, value),
                    None => {
                        self.log.append(
                            LogKind::Info,
                            None,
                            Some(message.to_string()),
                            LogStatus::Success,
                        );
                    }
                }
            }
        }

        correlated
    }

    fn correlate(&mut self, message: &str) -> Option<u64> {
        let lowered = message.to_lowercase();
        let carries_status = STATUS_TOKENS.iter().any(|t| lowered.contains(t));

        let idx = self
            .pending
            .iter()
            .position(|p| carries_status || lowered.contains(&p.command.to_lowercase()))?;
        let pending = self.pending.remove(idx)?;

        let status = if FAILURE_TOKENS.iter().any(|t| lowered.contains(t)) {
            LogStatus::Failed
        } else {
            LogStatus::Success
        };

        let seq = pending.seq;
        tracing::debug!("Response to #{} ({:?}): {}", seq, status, message);
        self.resolve(pending, message, status);
        Some(seq)
    }

    fn resolve(&mut self, pending: PendingCommand, response: &str, status: LogStatus) {
        self.log.set_status(pending.log_seq, status);
        self.log.append(
            LogKind::ResponseReceived,
            Some(pending.command),
            Some(response.to_string()),
            status,
        );
    }

    /// Expire every pending command older than the timeout.
    ///
    /// Returns the number of commands expired.
    pub fn tick(&mut self, now: Instant) -> usize {
        let mut expired = 0;
        while let Some(oldest) = self.pending.front() {
            if now.saturating_duration_since(oldest.sent_at) <= self.config.command_timeout {
                break;
            }
            if let Some(pending) = self.pending.pop_front() {
                tracing::warn!("Command #{} timed out: {}", pending.seq, pending.command);
                self.resolve(pending, TIMEOUT_TEXT, LogStatus::Timeout);
                expired += 1;
            }
        }
        expired
    }

    /// The link dropped; no pending command can be answered any more.
    ///
    /// Returns the number of commands resolved as `NoResponse`.
    pub fn on_disconnect(&mut self) -> usize {
        if !self.config.fail_pending_on_disconnect {
            return 0;
        }

        let dropped: Vec<PendingCommand> = self.pending.drain(..).collect();
        let count = dropped.len();
        for pending in dropped {
            self.resolve(pending, DISCONNECT_TEXT, LogStatus::NoResponse);
        }
        if count > 0 {
            tracing::info!("{} pending commands dropped on disconnect", count);
        }
        count
    }

    /// Record an error that did not come from a send.
    pub fn log_error(&mut self, error: &LinkError) {
        self.log
            .append(LogKind::Error, None, Some(error.to_string()), LogStatus::Failed);
    }

    /// Empty the log and the pending set.
    pub fn clear(&mut self) {
        self.log.clear();
        self.pending.clear();
    }

    pub fn system_status(&self) -> &str {
        &self.system_status
    }

    pub fn pending(&self) -> impl Iterator<Item = &PendingCommand> {
        self.pending.iter()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn log(&self) -> &ProtocolLog {
        &self.log
    }

    /// Copy of the log, oldest first.
    pub fn log_entries(&self) -> Vec<LogEntry> {
        self.log.entries()
    }

    pub fn statistics(&self) -> LogStatistics {
        LogStatistics {
            pending_commands: self.pending.len(),
            ..self.log.statistics()
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }
}

impl Default for CommandDispatcher {
    fn default() -> Self {
        Self::new(DispatcherConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Writer that records lines.
    struct BufferWriter {
        ready: bool,
        refuse: bool,
        lines: Vec<Bytes>,
    }

    impl BufferWriter {
        fn ready() -> Self {
            Self {
                ready: true,
                refuse: false,
                lines: Vec::new(),
            }
        }
    }

    impl CommandWriter for BufferWriter {
        fn is_ready(&self) -> bool {
            self.ready
        }

        fn write_line(&mut self, line: Bytes) -> Result<()> {
            if self.refuse {
                return Err(LinkError::SendFailed("queue full".to_string()));
            }
            self.lines.push(line);
            Ok(())
        }
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn test_send_writes_line_and_tracks_pending() {
        let mut dispatcher = CommandDispatcher::default();
        let mut writer = BufferWriter::ready();
        let now = Instant::now();

        let seq = dispatcher.send("  start_system\r\n", &mut writer, now).unwrap();

        assert_eq!(seq, 1);
        assert_eq!(writer.lines, vec![Bytes::from_static(b"start_system\n")]);
        assert_eq!(dispatcher.pending_count(), 1);

        let entries = dispatcher.log_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, LogKind::CommandSent);
        assert_eq!(entries[0].command.as_deref(), Some("start_system"));
        assert_eq!(entries[0].status, LogStatus::Pending);
    }

    #[test]
    fn test_send_validation_errors() {
        let mut dispatcher = CommandDispatcher::default();
        let mut writer = BufferWriter::ready();
        let now = Instant::now();

        let oversized = "x".repeat(513);
        for bad in ["", "   ", oversized.as_str()] {
            let result = dispatcher.send(bad, &mut writer, now);
            assert!(matches!(result, Err(LinkError::Validation(_))), "{:?}", bad);
        }
        assert!(dispatcher.send(&"x".repeat(512), &mut writer, now).is_ok());

        assert_eq!(writer.lines.len(), 1);
        assert_eq!(dispatcher.pending_count(), 1);
        let errors = dispatcher
            .log_entries()
            .iter()
            .filter(|e| e.kind == LogKind::Error)
            .count();
        assert_eq!(errors, 3);
    }

    #[test]
    fn test_send_not_ready() {
        let mut dispatcher = CommandDispatcher::default();
        let mut writer = BufferWriter::ready();
        writer.ready = false;

        let result = dispatcher.send("get_status", &mut writer, Instant::now());

        assert!(matches!(result, Err(LinkError::NotReady)));
        assert!(writer.lines.is_empty());
        assert_eq!(dispatcher.pending_count(), 0);
    }

    #[test]
    fn test_send_rate_limited_then_window_rolls_over() {
        let mut dispatcher = CommandDispatcher::default();
        let mut writer = BufferWriter::ready();
        let start = Instant::now();

        for i in 0..60 {
            dispatcher
                .send("get_status", &mut writer, start + Duration::from_millis(i * 100))
                .unwrap();
        }
        let result = dispatcher.send("get_status", &mut writer, start + secs(30));
        assert!(matches!(result, Err(LinkError::RateLimited { .. })));

        assert!(dispatcher
            .send("get_status", &mut writer, start + secs(61))
            .is_ok());
        assert_eq!(writer.lines.len(), 61);
    }

    #[test]
    fn test_refused_write_marks_entry_failed() {
        let mut dispatcher = CommandDispatcher::default();
        let mut writer = BufferWriter::ready();
        writer.refuse = true;

        let result = dispatcher.send("reset", &mut writer, Instant::now());

        assert!(matches!(result, Err(LinkError::SendFailed(_))));
        assert_eq!(dispatcher.pending_count(), 0);
        let entries = dispatcher.log_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, LogStatus::Failed);
    }

    #[test]
    fn test_response_echoing_command_correlates() {
        let mut dispatcher = CommandDispatcher::default();
        let mut registry = ModuleRegistry::new();
        let mut writer = BufferWriter::ready();
        let now = Instant::now();
        dispatcher.send("get_status", &mut writer, now).unwrap();

        let correlated = dispatcher.on_message("GET_STATUS done", &mut registry);

        assert_eq!(correlated, Some(1));
        assert_eq!(dispatcher.pending_count(), 0);
        let entries = dispatcher.log_entries();
        assert_eq!(entries[0].status, LogStatus::Success);
        assert_eq!(entries[1].kind, LogKind::ResponseReceived);
        assert_eq!(entries[1].response.as_deref(), Some("GET_STATUS done"));
        assert_eq!(entries[2].kind, LogKind::Info);
    }

    #[test]
    fn test_failure_token_marks_failed() {
        let mut dispatcher = CommandDispatcher::default();
        let mut registry = ModuleRegistry::new();
        let mut writer = BufferWriter::ready();
        dispatcher.send("CAN1:RESET", &mut writer, Instant::now()).unwrap();

        dispatcher.on_message("ERROR: module busy", &mut registry);

        let stats = dispatcher.statistics();
        assert_eq!(stats.total_commands, 1);
        assert_eq!(stats.failed_responses, 1);
        assert_eq!(stats.successful_responses, 0);
        assert_eq!(stats.pending_commands, 0);
        assert_eq!(dispatcher.log_entries()[0].status, LogStatus::Failed);
    }

    #[test]
    fn test_oldest_pending_wins() {
        let mut dispatcher = CommandDispatcher::default();
        let mut registry = ModuleRegistry::new();
        let mut writer = BufferWriter::ready();
        let start = Instant::now();
        dispatcher.send("get_status", &mut writer, start).unwrap();
        dispatcher.send("get_status", &mut writer, start + secs(1)).unwrap();

        assert_eq!(dispatcher.on_message("OK", &mut registry), Some(1));
        assert_eq!(dispatcher.on_message("OK", &mut registry), Some(2));
        assert_eq!(dispatcher.on_message("OK", &mut registry), None);
    }

    #[test]
    fn test_unrelated_message_not_correlated() {
        let mut dispatcher = CommandDispatcher::default();
        let mut registry = ModuleRegistry::new();
        let mut writer = BufferWriter::ready();
        dispatcher.send("start_system", &mut writer, Instant::now()).unwrap();

        assert_eq!(dispatcher.on_message("CAN1:durum:1", &mut registry), None);

        assert_eq!(dispatcher.pending_count(), 1);
        assert!(registry.get("CAN1").unwrap().is_active);
        // Module updates do not add an Info entry.
        assert_eq!(dispatcher.log_entries().len(), 1);
    }

    #[test]
    fn test_system_status_message() {
        let mut dispatcher = CommandDispatcher::default();
        let mut registry = ModuleRegistry::new();
        assert_eq!(dispatcher.system_status(), INITIAL_SYSTEM_STATUS);

        dispatcher.on_message("GNS:RUNNING", &mut registry);

        assert_eq!(dispatcher.system_status(), "RUNNING");
        assert!(registry.is_empty());
        let entries = dispatcher.log_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, LogKind::SystemMessage);
        assert_eq!(entries[0].response.as_deref(), Some("RUNNING"));
    }

    #[test]
    fn test_log_line_message() {
        let mut dispatcher = CommandDispatcher::default();
        let mut registry = ModuleRegistry::new();

        dispatcher.on_message("MSJ:calibration done", &mut registry);
        dispatcher.on_message("free text", &mut registry);

        let entries = dispatcher.log_entries();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.kind == LogKind::Info));
        assert_eq!(entries[0].response.as_deref(), Some("calibration done"));
        assert_eq!(entries[1].response.as_deref(), Some("free text"));
    }

    #[test]
    fn test_tick_expires_once() {
        let mut dispatcher = CommandDispatcher::default();
        let mut writer = BufferWriter::ready();
        let start = Instant::now();
        dispatcher.send("get_status", &mut writer, start).unwrap();
        dispatcher.send("stop_system", &mut writer, start + secs(5)).unwrap();

        assert_eq!(dispatcher.tick(start + secs(10)), 0);
        assert_eq!(dispatcher.tick(start + secs(11)), 1);
        assert_eq!(dispatcher.tick(start + secs(12)), 0);
        assert_eq!(dispatcher.pending_count(), 1);

        let timeouts: Vec<_> = dispatcher
            .log_entries()
            .into_iter()
            .filter(|e| e.kind == LogKind::ResponseReceived && e.status == LogStatus::Timeout)
            .collect();
        assert_eq!(timeouts.len(), 1);
        assert_eq!(timeouts[0].command.as_deref(), Some("get_status"));
        assert_eq!(dispatcher.log_entries()[0].status, LogStatus::Timeout);
    }

    #[test]
    fn test_out_of_order_clock_keeps_queue_ordered() {
        let mut dispatcher = CommandDispatcher::default();
        let mut writer = BufferWriter::ready();
        let start = Instant::now();
        dispatcher.send("get_status", &mut writer, start + secs(5)).unwrap();
        dispatcher.send("stop_system", &mut writer, start).unwrap();

        // Both count from the later send time.
        assert_eq!(dispatcher.tick(start + secs(12)), 0);
        assert_eq!(dispatcher.pending_count(), 2);
        assert_eq!(dispatcher.tick(start + secs(16)), 2);
        assert_eq!(dispatcher.pending_count(), 0);
    }

    #[test]
    fn test_disconnect_fails_pending() {
        let mut dispatcher = CommandDispatcher::default();
        let mut writer = BufferWriter::ready();
        let now = Instant::now();
        dispatcher.send("start_system", &mut writer, now).unwrap();
        dispatcher.send("CAN1:get_log", &mut writer, now).unwrap();

        assert_eq!(dispatcher.on_disconnect(), 2);

        assert_eq!(dispatcher.pending_count(), 0);
        let entries = dispatcher.log_entries();
        assert_eq!(entries[0].status, LogStatus::NoResponse);
        assert_eq!(entries[1].status, LogStatus::NoResponse);
        assert_eq!(entries.len(), 4);
        assert_eq!(dispatcher.tick(now + secs(60)), 0);
    }

    #[test]
    fn test_disconnect_leaves_pending_when_configured() {
        let mut dispatcher = CommandDispatcher::new(DispatcherConfig {
            fail_pending_on_disconnect: false,
            ..Default::default()
        });
        let mut writer = BufferWriter::ready();
        let now = Instant::now();
        dispatcher.send("start_system", &mut writer, now).unwrap();

        assert_eq!(dispatcher.on_disconnect(), 0);
        assert_eq!(dispatcher.pending_count(), 1);
        assert_eq!(dispatcher.tick(now + secs(11)), 1);
    }

    #[test]
    fn test_clear_is_idempotent() {
        let mut dispatcher = CommandDispatcher::default();
        let mut writer = BufferWriter::ready();
        dispatcher.send("start_system", &mut writer, Instant::now()).unwrap();

        dispatcher.clear();
        dispatcher.clear();

        assert!(dispatcher.log_entries().is_empty());
        assert_eq!(dispatcher.pending_count(), 0);
        assert_eq!(dispatcher.statistics(), LogStatistics::default());
    }
}
