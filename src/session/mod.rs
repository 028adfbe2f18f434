//! Session - one device link and everything derived from it.
//!
//! A [`Session`] owns the connection state machine (and through it the
//! transport and line buffer), the command dispatcher, the module registry and
//! the error history. All of it changes through `&mut self`, so a session is
//! either driven directly or moved into its own task with [`spawn`] and used
//! through a [`SessionHandle`].
//!
//! # Example
//!
//! ```ignore
//! use iac_link::session::SessionBuilder;
//! use iac_link::transport::TcpEndpoint;
//!
//! #[tokio::main]
//! async fn main() -> iac_link::Result<()> {
//!     let (handle, task) = SessionBuilder::new()
//!         .endpoint(TcpEndpoint::new("Bench board", "127.0.0.1:7000".parse().unwrap()))
//!         .start_tcp();
//!
//!     handle.start_scan().await?;
//!     handle.connect("127.0.0.1:7000").await?;
//!     handle.send_command("start_system").await?;
//!
//!     let snapshot = handle.snapshot().await?;
//!     println!("{} ({})", snapshot.state, snapshot.system_status);
//!
//!     handle.shutdown().await?;
//!     let _ = task.await;
//!     Ok(())
//! }
//! ```

mod builder;
mod handle;
mod history;

pub use builder::SessionBuilder;
pub use handle::{spawn, SessionHandle};
pub use history::{ErrorHistory, ErrorRecord, DEFAULT_ERROR_HISTORY_CAPACITY};

use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::config::SessionConfig;
use crate::connection::{ConnectionMachine, ConnectionOutput, ConnectionState};
use crate::dispatch::{CommandDispatcher, LogEntry, LogFilter, LogStatistics};
use crate::error::Result;
use crate::protocol::{ModuleCommand, SystemCommand};
use crate::registry::{ModuleRegistry, ModuleStatus};
use crate::transport::{DiscoveredEndpoint, LinkState, Transport, TransportEvent};

/// Point-in-time copy of everything a session exposes.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub state: ConnectionState,
    pub link_state: Option<LinkState>,
    pub endpoints: Vec<DiscoveredEndpoint>,
    pub connected_endpoint: Option<String>,
    pub system_status: String,
    /// Sorted by module id.
    pub modules: Vec<ModuleStatus>,
    pub active_modules: usize,
    pub error_modules: usize,
    /// Oldest first.
    pub log: Vec<LogEntry>,
    pub statistics: LogStatistics,
    /// Newest first.
    pub errors: Vec<ErrorRecord>,
}

/// A device session over transport `T`.
pub struct Session<T> {
    connection: ConnectionMachine<T>,
    dispatcher: CommandDispatcher,
    registry: ModuleRegistry,
    errors: ErrorHistory,
    tick_interval: Duration,
    request_queue_capacity: usize,
}

impl<T: Transport> Session<T> {
    pub fn new(transport: T, config: &SessionConfig) -> Self {
        Self {
            connection: ConnectionMachine::new(transport, config.connection.clone()),
            dispatcher: CommandDispatcher::new(config.dispatcher.clone()),
            registry: ModuleRegistry::new(),
            errors: ErrorHistory::default(),
            tick_interval: config.tick_interval,
            request_queue_capacity: config.request_queue_capacity,
        }
    }

    /// Feed one event from the transport.
    pub fn handle_transport_event(&mut self, event: TransportEvent, now: Instant) {
        let outputs = self.connection.handle_event(event, now);
        self.apply(outputs);
    }

    fn apply(&mut self, outputs: Vec<ConnectionOutput>) {
        for output in outputs {
            match output {
                ConnectionOutput::Messages(lines) => {
                    for line in &lines {
                        self.dispatcher.on_message(line, &mut self.registry);
                    }
                }
                ConnectionOutput::LinkLost => {
                    self.dispatcher.on_disconnect();
                }
                ConnectionOutput::Fault(error) => {
                    self.dispatcher.log_error(&error);
                    self.errors.record(&error);
                }
            }
        }
    }

    /// Send raw command text. Returns the command's correlation id.
    pub fn send_command(&mut self, command: &str, now: Instant) -> Result<u64> {
        let result = self.dispatcher.send(command, &mut self.connection, now);
        self.record(result)
    }

    pub fn send_system_command(&mut self, command: SystemCommand, now: Instant) -> Result<u64> {
        self.send_command(command.as_str(), now)
    }

    pub fn send_module_command(
        &mut self,
        module_id: &str,
        command: ModuleCommand,
        now: Instant,
    ) -> Result<u64> {
        let text = self.record(command.render(module_id))?;
        self.send_command(&text, now)
    }

    /// Periodic work: expire stale commands, run connection timers.
    ///
    /// Returns the number of commands that timed out.
    pub fn tick(&mut self, now: Instant) -> usize {
        let expired = self.dispatcher.tick(now);
        let outputs = self.connection.poll_timers(now);
        self.apply(outputs);
        expired
    }

    pub fn start_scan(&mut self, now: Instant) -> Result<()> {
        let result = self.connection.start_scan(now);
        self.record(result)
    }

    pub fn stop_scan(&mut self) {
        self.connection.stop_scan();
    }

    pub fn connect(&mut self, endpoint_id: &str) -> Result<()> {
        let result = self.connection.connect(endpoint_id);
        self.record(result)
    }

    /// Drop the current link. Pending commands are resolved as the dispatcher
    /// is configured to. Returns false when there was no link.
    pub fn disconnect(&mut self) -> bool {
        if !self.connection.disconnect() {
            return false;
        }
        self.dispatcher.on_disconnect();
        true
    }

    /// Empty the protocol log and forget pending commands.
    pub fn clear_log(&mut self) {
        self.dispatcher.clear();
    }

    pub fn clear_errors(&mut self) {
        self.errors.clear();
    }

    fn record<R>(&mut self, result: Result<R>) -> Result<R> {
        if let Err(e) = &result {
            self.errors.record(e);
        }
        result
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.connection.state(),
            link_state: self.connection.link_state(),
            endpoints: self.connection.endpoints().to_vec(),
            connected_endpoint: self.connection.connected_endpoint().map(str::to_string),
            system_status: self.dispatcher.system_status().to_string(),
            modules: self.registry.modules(),
            active_modules: self.registry.active_count(),
            error_modules: self.registry.error_count(),
            log: self.dispatcher.log_entries(),
            statistics: self.dispatcher.statistics(),
            errors: self.errors.records(),
        }
    }

    /// Log entries matching `filter` and containing `search`.
    pub fn filtered_log(&self, filter: LogFilter, search: &str) -> Vec<LogEntry> {
        self.dispatcher.log().filtered(filter, search)
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn connection(&self) -> &ConnectionMachine<T> {
        &self.connection
    }

    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub fn errors(&self) -> &ErrorHistory {
        &self.errors
    }

    pub fn transport(&self) -> &T {
        self.connection.transport()
    }
}
