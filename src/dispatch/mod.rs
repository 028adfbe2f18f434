//! Dispatch module - outgoing commands and what became of them.
//!
//! Provides:
//! - [`CommandDispatcher`] - sends commands, correlates responses, expires stale ones
//! - [`ProtocolLog`] - bounded log of everything that happened on the protocol
//! - [`RateLimiter`] - fixed-window command quota
//!
//! # Example
//!
//! ```
//! use iac_link::dispatch::{CommandDispatcher, CommandWriter, LogStatus};
//! use iac_link::registry::ModuleRegistry;
//! use bytes::Bytes;
//! use tokio::time::Instant;
//!
//! struct Lines(Vec<Bytes>);
//!
//! impl CommandWriter for Lines {
//!     fn is_ready(&self) -> bool { true }
//!     fn write_line(&mut self, line: Bytes) -> iac_link::Result<()> {
//!         self.0.push(line);
//!         Ok(())
//!     }
//! }
//!
//! let mut dispatcher = CommandDispatcher::default();
//! let mut registry = ModuleRegistry::new();
//! let mut lines = Lines(Vec::new());
//!
//! dispatcher.send("CAN1:get_durum", &mut lines, Instant::now()).unwrap();
//! dispatcher.on_message("CAN1:get_durum ok", &mut registry);
//!
//! assert_eq!(dispatcher.log_entries()[0].status, LogStatus::Success);
//! ```

mod dispatcher;
mod log;
mod rate_limit;

pub use dispatcher::{
    CommandDispatcher, CommandWriter, DispatcherConfig, PendingCommand, DEFAULT_COMMAND_TIMEOUT,
    DEFAULT_SINK, INITIAL_SYSTEM_STATUS,
};
pub use log::{
    LogEntry, LogFilter, LogKind, LogStatistics, LogStatus, ProtocolLog, DEFAULT_LOG_CAPACITY,
};
pub use rate_limit::{RateLimitPolicy, RateLimiter, DEFAULT_MAX_COMMANDS, DEFAULT_WINDOW};
