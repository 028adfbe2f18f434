//! Fluent session configuration.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{spawn, Session, SessionHandle};
use crate::config::SessionConfig;
use crate::dispatch::RateLimitPolicy;
use crate::transport::{TcpEndpoint, TcpTransport, Transport, TransportEvent};

/// Builder for configuring and creating a [`Session`].
///
/// Starts from [`SessionConfig::default`] (or a loaded config) and overrides
/// single values.
#[derive(Debug, Clone, Default)]
pub struct SessionBuilder {
    config: SessionConfig,
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration, e.g. one read with
    /// [`SessionConfig::from_file`].
    pub fn from_config(config: SessionConfig) -> Self {
        Self { config }
    }

    /// Set how long a command may stay unanswered.
    ///
    /// Default: 10 seconds
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.config.dispatcher.command_timeout = timeout;
        self
    }

    /// Default: 512
    pub fn max_command_len(mut self, len: usize) -> Self {
        self.config.dispatcher.max_command_len = len;
        self
    }

    /// Set how many entries the protocol log keeps.
    ///
    /// Default: 1000
    pub fn log_capacity(mut self, capacity: usize) -> Self {
        self.config.dispatcher.log_capacity = capacity;
        self
    }

    /// Set the outgoing command quota.
    ///
    /// Default: 60 commands per 60 seconds
    pub fn rate_limit(mut self, max_commands: u32, window: Duration) -> Self {
        self.config.dispatcher.rate_limit = RateLimitPolicy {
            max_commands,
            window,
        };
        self
    }

    /// Resolve pending commands as unanswered when the link drops.
    ///
    /// Default: true
    pub fn fail_pending_on_disconnect(mut self, enabled: bool) -> Self {
        self.config.dispatcher.fail_pending_on_disconnect = enabled;
        self
    }

    /// Default: 15 seconds
    pub fn scan_duration(mut self, duration: Duration) -> Self {
        self.config.connection.scan_duration = duration;
        self
    }

    /// Set the delay before scanning once the transport is ready.
    ///
    /// Default: 1 second
    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.config.connection.retry_backoff = backoff;
        self
    }

    /// Default: true
    pub fn auto_scan(mut self, enabled: bool) -> Self {
        self.config.connection.auto_scan = enabled;
        self
    }

    /// Set the longest incomplete line kept while waiting for a newline.
    ///
    /// Default: 16 KiB
    pub fn max_line_len(mut self, len: usize) -> Self {
        self.config.connection.max_line_len = len;
        self
    }

    /// Set the period of the timeout sweep.
    ///
    /// Default: 1 second
    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.config.tick_interval = interval;
        self
    }

    /// Default: 32
    pub fn request_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.request_queue_capacity = capacity;
        self
    }

    /// Add a device for TCP discovery.
    pub fn endpoint(mut self, endpoint: TcpEndpoint) -> Self {
        self.config.endpoints.push(endpoint);
        self
    }

    /// Set the TCP connect timeout.
    ///
    /// Default: 15 seconds
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.tcp.connect_timeout = timeout;
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Build a session over `transport` without starting a task.
    pub fn build<T: Transport>(self, transport: T) -> Session<T> {
        Session::new(transport, &self.config)
    }

    /// Build a session and run it in its own task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start<T: Transport>(
        self,
        transport: T,
        events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> (SessionHandle, JoinHandle<Session<T>>) {
        spawn(self.build(transport), events)
    }

    /// Start a session over a [`TcpTransport`] for the configured endpoints.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start_tcp(self) -> (SessionHandle, JoinHandle<Session<TcpTransport>>) {
        let (transport, events) =
            TcpTransport::new(self.config.endpoints.clone(), self.config.tcp.clone());
        self.start(transport, events)
    }
}
