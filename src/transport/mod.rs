//! Transport module - the byte-stream link underneath the protocol.
//!
//! A transport takes requests (discover, connect, write, ...) and reports
//! everything that happens as [`TransportEvent`]s on a channel handed out at
//! construction. Requests never wait for the network.
//!
//! Provides:
//! - [`Transport`] - the interface the session drives
//! - [`TcpTransport`] - a transport over TCP sockets

mod event;
#[cfg(test)]
pub(crate) mod mock;
mod tcp;

pub use event::{DiscoveredEndpoint, LinkState, TransportEvent, UNKNOWN_ENDPOINT_NAME};
pub use tcp::{TcpEndpoint, TcpTransport, TcpTransportConfig};

use bytes::Bytes;

use crate::error::Result;

/// Requests the session issues to a transport.
///
/// Outcomes are reported asynchronously through the transport's event
/// channel; only immediate refusals are returned here.
pub trait Transport: Send + 'static {
    /// Begin reporting [`TransportEvent::Discovered`] until stopped.
    fn start_discovery(&mut self) -> Result<()>;

    /// Stop discovery. No-op when not discovering.
    fn stop_discovery(&mut self);

    /// Start connecting. Reports `Connected` or `ConnectFailed`.
    fn connect(&mut self, endpoint_id: &str) -> Result<()>;

    /// Tear the link down. Safe to call when not connected.
    fn disconnect(&mut self, endpoint_id: &str);

    /// Look up the write/notify channels. Reports `ServicesReady`.
    fn discover_services(&mut self);

    /// Queue bytes for delivery. Reports `WriteAck` or `WriteFailed` later.
    fn write(&mut self, data: Bytes) -> Result<()>;
}
