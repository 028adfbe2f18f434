//! Connection state machine.
//!
//! Owns the transport, the discovered-endpoint set and the line buffer of the
//! current link, and is the only place that changes [`ConnectionState`].
//!
//! ```text
//!  Disconnected ──start_scan──► Scanning ──connect──► Connecting ──Connected──► Connected
//!       ▲                          │ scan timer            │ ConnectFailed          │
//!       └──────────────────────────┘                       ▼                        │
//!       ◄──────────── PoweredOn (+ retry scan) ───── Error(reason) ◄── link fault ──┤
//!       ◄────────────────────────────── disconnect / link lost ─────────────────────┘
//! ```
//!
//! Transport events go through [`ConnectionMachine::handle_event`]; timers
//! (scan deadline, scan retry) are checked by [`ConnectionMachine::poll_timers`].

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::dispatch::CommandWriter;
use crate::error::{LinkError, Result};
use crate::protocol::{LineBuffer, DEFAULT_MAX_LINE_LEN};
use crate::transport::{DiscoveredEndpoint, LinkState, Transport, TransportEvent};

/// Default time a scan runs before stopping itself.
pub const DEFAULT_SCAN_DURATION: Duration = Duration::from_secs(15);

/// Default delay before scanning again once the transport is back.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// The one authoritative connection status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Scanning,
    Connecting,
    Connected,
    Error(String),
}

impl ConnectionState {
    pub fn is_error(&self) -> bool {
        matches!(self, ConnectionState::Error(_))
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Scanning => write!(f, "Scanning for devices..."),
            ConnectionState::Connecting => write!(f, "Connecting..."),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Error(reason) => write!(f, "Error: {}", reason),
        }
    }
}

/// Configuration for [`ConnectionMachine`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// How long a scan runs unless stopped.
    #[serde(rename = "scan_duration_ms", with = "crate::config::duration_ms")]
    pub scan_duration: Duration,
    /// Delay before the automatic scan after the transport reports ready.
    #[serde(rename = "retry_backoff_ms", with = "crate::config::duration_ms")]
    pub retry_backoff: Duration,
    /// Scan automatically when the transport becomes ready.
    pub auto_scan: bool,
    /// Longest incomplete line held while waiting for a newline.
    pub max_line_len: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            scan_duration: DEFAULT_SCAN_DURATION,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            auto_scan: true,
            max_line_len: DEFAULT_MAX_LINE_LEN,
        }
    }
}

/// What the rest of the session has to act on after an event.
#[derive(Debug)]
pub enum ConnectionOutput {
    /// Complete lines from the link, in arrival order.
    Messages(Vec<String>),
    /// The link went away.
    LinkLost,
    /// Something failed that the caller should hear about.
    Fault(LinkError),
}

/// Connection lifecycle around a [`Transport`].
pub struct ConnectionMachine<T> {
    transport: T,
    config: ConnectionConfig,
    state: watch::Sender<ConnectionState>,
    /// Last power state reported by the transport.
    link: Option<LinkState>,
    endpoints: Vec<DiscoveredEndpoint>,
    /// Endpoint being connected to or connected.
    connected_endpoint: Option<String>,
    /// Write channel discovered on the current link.
    services_ready: bool,
    scanning: bool,
    scan_deadline: Option<Instant>,
    retry_at: Option<Instant>,
    /// The transport reported `Unsupported`; no automatic scans until an
    /// explicit `start_scan`.
    unsupported: bool,
    buffer: LineBuffer,
}

impl<T: Transport> ConnectionMachine<T> {
    pub fn new(transport: T, config: ConnectionConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let buffer = LineBuffer::with_max_line_len(config.max_line_len);
        Self {
            transport,
            config,
            state,
            link: None,
            endpoints: Vec::new(),
            connected_endpoint: None,
            services_ready: false,
            scanning: false,
            scan_deadline: None,
            retry_at: None,
            unsupported: false,
            buffer,
        }
    }

    /// Current state (copy).
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Receiver that sees every state change.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn set_state(&mut self, next: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            tracing::info!("Connection state: {} -> {}", current, next);
            *current = next;
            true
        });
    }

    fn is_linked(&self) -> bool {
        matches!(
            *self.state.borrow(),
            ConnectionState::Connecting | ConnectionState::Connected
        )
    }

    /// Start discovering endpoints.
    ///
    /// Clears the discovered set. A no-op while a scan is running.
    ///
    /// # Errors
    ///
    /// - [`LinkError::TransportFault`] / [`LinkError::NotReady`] when the transport is
    ///   not powered on; the state becomes `Error`
    /// - [`LinkError::AlreadyConnected`] while connecting or connected
    pub fn start_scan(&mut self, now: Instant) -> Result<()> {
        self.unsupported = false;
        self.begin_scan(now)
    }

    fn begin_scan(&mut self, now: Instant) -> Result<()> {
        match self.link {
            Some(LinkState::PoweredOn) => {}
            Some(link) => {
                self.set_state(ConnectionState::Error(link.describe().to_string()));
                return Err(LinkError::TransportFault(link, link.describe().to_string()));
            }
            None => {
                self.set_state(ConnectionState::Error(
                    "transport state unknown".to_string(),
                ));
                return Err(LinkError::NotReady);
            }
        }

        if self.scanning {
            return Ok(());
        }
        if self.is_linked() {
            return Err(LinkError::AlreadyConnected);
        }

        self.endpoints.clear();
        if let Err(e) = self.transport.start_discovery() {
            self.set_state(ConnectionState::Error(e.to_string()));
            return Err(e);
        }

        self.scanning = true;
        self.scan_deadline = Some(now + self.config.scan_duration);
        self.retry_at = None;
        self.set_state(ConnectionState::Scanning);
        Ok(())
    }

    /// Stop discovering. Returns to `Disconnected` if the state was `Scanning`.
    pub fn stop_scan(&mut self) {
        if !self.scanning {
            return;
        }
        self.transport.stop_discovery();
        self.scanning = false;
        self.scan_deadline = None;
        if *self.state.borrow() == ConnectionState::Scanning {
            self.set_state(ConnectionState::Disconnected);
        }
    }

    /// Connect to a discovered endpoint. Stops scanning first.
    pub fn connect(&mut self, endpoint_id: &str) -> Result<()> {
        if self.connected_endpoint.is_some() {
            return Err(LinkError::AlreadyConnected);
        }
        if !self.endpoints.iter().any(|e| e.id == endpoint_id) {
            return Err(LinkError::UnknownEndpoint(endpoint_id.to_string()));
        }

        self.stop_scan();
        self.retry_at = None;
        if let Err(e) = self.transport.connect(endpoint_id) {
            self.set_state(ConnectionState::Error(e.to_string()));
            return Err(e);
        }

        self.connected_endpoint = Some(endpoint_id.to_string());
        self.set_state(ConnectionState::Connecting);
        Ok(())
    }

    /// Tear down the current link. Returns false when there was none.
    pub fn disconnect(&mut self) -> bool {
        let Some(endpoint_id) = self.connected_endpoint.clone() else {
            return false;
        };
        self.transport.disconnect(&endpoint_id);
        self.cleanup();
        self.set_state(ConnectionState::Disconnected);
        true
    }

    /// Forget everything tied to the current link.
    fn cleanup(&mut self) {
        self.connected_endpoint = None;
        self.services_ready = false;
        self.buffer.clear();
    }

    /// Apply one transport event.
    pub fn handle_event(&mut self, event: TransportEvent, now: Instant) -> Vec<ConnectionOutput> {
        let mut outputs = Vec::new();

        match event {
            TransportEvent::LinkState(LinkState::PoweredOn) => {
                self.link = Some(LinkState::PoweredOn);
                if !self.is_linked() {
                    self.set_state(ConnectionState::Disconnected);
                }
                if self.config.auto_scan
                    && !self.unsupported
                    && !self.scanning
                    && !self.is_linked()
                    && self.endpoints.is_empty()
                {
                    self.retry_at = Some(now + self.config.retry_backoff);
                }
            }

            TransportEvent::LinkState(fault) => {
                tracing::warn!("Transport fault: {}", fault.describe());
                self.link = Some(fault);
                self.retry_at = None;
                if !fault.is_recoverable() {
                    self.unsupported = true;
                }
                self.stop_scan();
                if let Some(endpoint_id) = self.connected_endpoint.clone() {
                    self.transport.disconnect(&endpoint_id);
                    self.cleanup();
                    outputs.push(ConnectionOutput::LinkLost);
                }
                self.set_state(ConnectionState::Error(fault.describe().to_string()));
                outputs.push(ConnectionOutput::Fault(LinkError::TransportFault(
                    fault,
                    fault.describe().to_string(),
                )));
            }

            TransportEvent::Discovered(endpoint) => {
                if !self.scanning {
                    tracing::trace!("Ignoring discovery of {} outside a scan", endpoint.id);
                } else if !self.endpoints.contains(&endpoint) {
                    tracing::debug!(
                        "Discovered {} ({}), signal {:?}",
                        endpoint.name,
                        endpoint.id,
                        endpoint.signal_strength
                    );
                    self.endpoints.push(endpoint);
                }
            }

            TransportEvent::Connected { endpoint_id } => {
                if self.connected_endpoint.as_deref() == Some(endpoint_id.as_str())
                    && *self.state.borrow() == ConnectionState::Connecting
                {
                    self.set_state(ConnectionState::Connected);
                    self.transport.discover_services();
                } else {
                    tracing::warn!("Unexpected connect from {}", endpoint_id);
                }
            }

            TransportEvent::ConnectFailed {
                endpoint_id,
                reason,
            } => {
                if self.connected_endpoint.as_deref() == Some(endpoint_id.as_str()) {
                    tracing::warn!("Connection to {} failed: {}", endpoint_id, reason);
                    self.cleanup();
                    self.set_state(ConnectionState::Error(format!(
                        "connection failed: {}",
                        reason
                    )));
                    outputs.push(ConnectionOutput::Fault(LinkError::ConnectFailed(reason)));
                }
            }

            TransportEvent::ServicesReady => {
                if *self.state.borrow() == ConnectionState::Connected {
                    tracing::info!("Write channel ready");
                    self.services_ready = true;
                }
            }

            TransportEvent::Disconnected {
                endpoint_id,
                reason,
            } => {
                if self.connected_endpoint.as_deref() == Some(endpoint_id.as_str()) {
                    match reason {
                        Some(reason) => tracing::warn!("Link to {} lost: {}", endpoint_id, reason),
                        None => tracing::info!("Link to {} closed", endpoint_id),
                    }
                    self.cleanup();
                    if !self.state.borrow().is_error() {
                        self.set_state(ConnectionState::Disconnected);
                    }
                    outputs.push(ConnectionOutput::LinkLost);
                }
            }

            TransportEvent::Data(chunk) => {
                if self.connected_endpoint.is_none() {
                    tracing::debug!("Dropping {} bytes received without a link", chunk.len());
                } else {
                    match self.buffer.feed(&chunk) {
                        Ok(lines) if lines.is_empty() => {}
                        Ok(lines) => outputs.push(ConnectionOutput::Messages(lines)),
                        Err(e) => {
                            tracing::warn!("Dropped {} received bytes: {}", chunk.len(), e);
                            outputs.push(ConnectionOutput::Fault(e));
                        }
                    }
                }
            }

            TransportEvent::WriteAck => {
                tracing::trace!("Write acknowledged");
            }

            TransportEvent::WriteFailed { reason } => {
                tracing::warn!("Write failed: {}", reason);
                outputs.push(ConnectionOutput::Fault(LinkError::SendFailed(reason)));
            }
        }

        outputs
    }

    /// Run due timers: end an expired scan, start a scheduled retry.
    pub fn poll_timers(&mut self, now: Instant) -> Vec<ConnectionOutput> {
        let mut outputs = Vec::new();

        if matches!(self.scan_deadline, Some(deadline) if now >= deadline) {
            tracing::info!("Scan finished, {} endpoints found", self.endpoints.len());
            self.stop_scan();
        }

        if matches!(self.retry_at, Some(at) if now >= at) {
            self.retry_at = None;
            if !self.scanning && !self.is_linked() {
                tracing::debug!("Starting scheduled scan");
                if let Err(e) = self.begin_scan(now) {
                    outputs.push(ConnectionOutput::Fault(e));
                }
            }
        }

        outputs
    }

    /// Endpoints seen in the current (or last) scan, in discovery order.
    pub fn endpoints(&self) -> &[DiscoveredEndpoint] {
        &self.endpoints
    }

    pub fn connected_endpoint(&self) -> Option<&str> {
        self.connected_endpoint.as_deref()
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    pub fn link_state(&self) -> Option<LinkState> {
        self.link
    }

    /// Bytes of an incomplete line held for the current link.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}

impl<T: Transport> CommandWriter for ConnectionMachine<T> {
    fn is_ready(&self) -> bool {
        self.services_ready && *self.state.borrow() == ConnectionState::Connected
    }

    fn write_line(&mut self, line: Bytes) -> Result<()> {
        if !self.is_ready() {
            return Err(LinkError::NotReady);
        }
        self.transport.write(line)
    }
}
