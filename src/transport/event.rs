//! Events reported by a transport.

use bytes::Bytes;
use serde::Serialize;

/// Name used when the transport reports an endpoint without one.
pub const UNKNOWN_ENDPOINT_NAME: &str = "Unknown device";

/// Power / authorization state of the underlying link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    PoweredOn,
    PoweredOff,
    Unauthorized,
    Unsupported,
    Resetting,
}

impl LinkState {
    /// Human-readable description used as the `Error` state reason.
    pub fn describe(&self) -> &'static str {
        match self {
            LinkState::PoweredOn => "transport ready",
            LinkState::PoweredOff => "transport powered off",
            LinkState::Unauthorized => "transport access not authorized",
            LinkState::Unsupported => "transport not supported",
            LinkState::Resetting => "transport resetting",
        }
    }

    /// Faults that clear on their own once the platform reports `PoweredOn`.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, LinkState::Unsupported)
    }
}

/// A remote device seen during discovery.
///
/// Two endpoints are the same endpoint when their ids match.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveredEndpoint {
    /// Opaque, stable identity assigned by the transport.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Signal strength, when the transport has one (dBm on radio links).
    pub signal_strength: Option<i16>,
}

impl DiscoveredEndpoint {
    pub fn new(id: impl Into<String>, name: Option<String>, signal_strength: Option<i16>) -> Self {
        Self {
            id: id.into(),
            name: name.unwrap_or_else(|| UNKNOWN_ENDPOINT_NAME.to_string()),
            signal_strength,
        }
    }
}

impl PartialEq for DiscoveredEndpoint {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for DiscoveredEndpoint {}

/// Everything a transport can report, as one tagged stream.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Link power / permission state changed.
    LinkState(LinkState),
    /// An endpoint was seen while discovering.
    Discovered(DiscoveredEndpoint),
    /// Connection to `endpoint_id` is up.
    Connected { endpoint_id: String },
    /// Connection attempt failed.
    ConnectFailed { endpoint_id: String, reason: String },
    /// Capability discovery finished; the write channel is usable.
    ServicesReady,
    /// Link to `endpoint_id` is gone.
    Disconnected {
        endpoint_id: String,
        reason: Option<String>,
    },
    /// Raw bytes from the remote side. Boundaries carry no meaning.
    Data(Bytes),
    /// A write was delivered.
    WriteAck,
    /// A write failed after it was queued.
    WriteFailed { reason: String },
}
