//! Error types for iac-link.

use std::time::Duration;

use thiserror::Error;

use crate::transport::LinkState;

/// Main error type for all link operations.
#[derive(Debug, Error)]
pub enum LinkError {
    /// Command text rejected before it reached the transport.
    #[error("Invalid command: {0}")]
    Validation(String),

    /// Sender exceeded its command quota for the current window.
    #[error("Rate limit exceeded: at most {limit} commands per {window:?}")]
    RateLimited { limit: u32, window: Duration },

    /// No active write channel (not connected or services not discovered yet).
    #[error("Write channel not ready")]
    NotReady,

    /// Link-level fault reported by the transport.
    #[error("Transport fault ({0:?}): {1}")]
    TransportFault(LinkState, String),

    /// A line grew past the limit without a delimiter; the partial line was dropped.
    #[error("Line exceeds {max} bytes without a newline ({len} buffered)")]
    LineTooLong { len: usize, max: usize },

    /// Received bytes were not valid UTF-8; the chunk was dropped.
    #[error("Encoding error: {0}")]
    Encoding(#[from] std::str::Utf8Error),

    /// Connection attempt failed.
    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    /// Transport refused or failed to deliver a write.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Endpoint id is not in the discovered set.
    #[error("Unknown endpoint: {0}")]
    UnknownEndpoint(String),

    /// A connection is already established or in progress.
    #[error("Already connected or connecting")]
    AlreadyConnected,

    /// The session task is gone.
    #[error("Session closed")]
    SessionClosed,

    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (config and log export).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LinkError {
    /// Short hint for the operator on how to get out of this error.
    pub fn recovery_hint(&self) -> &'static str {
        match self {
            LinkError::TransportFault(LinkState::PoweredOff, _) => {
                "Turn the radio back on in the system settings."
            }
            LinkError::TransportFault(LinkState::Unauthorized, _) => {
                "Grant the application access to the radio in the system settings."
            }
            LinkError::TransportFault(LinkState::Unsupported, _) => {
                "This host does not support the transport."
            }
            LinkError::TransportFault(..) => "Wait for the transport to become ready and retry.",
            LinkError::ConnectFailed(_) | LinkError::UnknownEndpoint(_) => {
                "Move closer to the device, make sure it is powered and retry."
            }
            LinkError::NotReady => "Connect to a device before sending commands.",
            LinkError::RateLimited { .. } => "Wait a moment before sending more commands.",
            LinkError::Validation(_) => "Check the command format.",
            LinkError::SendFailed(_) | LinkError::Io(_) => "Check the connection and retry.",
            LinkError::Encoding(_) => "Make sure the device firmware sends ASCII text.",
            LinkError::LineTooLong { .. } => {
                "Make sure the device firmware ends every message with a newline."
            }
            LinkError::AlreadyConnected => "Disconnect first.",
            LinkError::SessionClosed | LinkError::Json(_) => "Restart the session.",
        }
    }
}

/// Result type alias using LinkError.
pub type Result<T> = std::result::Result<T, LinkError>;
