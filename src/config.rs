//! Session configuration.
//!
//! Every field has a default, so a JSON document only needs the values it
//! changes. Durations are written in milliseconds under a `_ms` key.
//!
//! ```json
//! {
//!   "tick_interval_ms": 500,
//!   "dispatcher": { "command_timeout_ms": 5000, "rate_limit": { "max_commands": 10 } },
//!   "connection": { "auto_scan": false },
//!   "endpoints": [ { "name": "Bench board", "addr": "127.0.0.1:7000" } ]
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::connection::ConnectionConfig;
use crate::dispatch::DispatcherConfig;
use crate::error::Result;
use crate::transport::{TcpEndpoint, TcpTransportConfig};

/// Default period of the session's timeout sweep.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Default capacity of the session request queue.
pub const DEFAULT_REQUEST_QUEUE_CAPACITY: usize = 32;

/// Everything a session needs besides its transport.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub dispatcher: DispatcherConfig,
    pub connection: ConnectionConfig,
    /// How often pending commands are checked for timeouts.
    #[serde(rename = "tick_interval_ms", with = "duration_ms")]
    pub tick_interval: Duration,
    /// Requests queued to the session task before callers wait.
    pub request_queue_capacity: usize,
    /// Settings for [`crate::transport::TcpTransport`].
    pub tcp: TcpTransportConfig,
    /// Devices offered by TCP discovery.
    pub endpoints: Vec<TcpEndpoint>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            dispatcher: DispatcherConfig::default(),
            connection: ConnectionConfig::default(),
            tick_interval: DEFAULT_TICK_INTERVAL,
            request_queue_capacity: DEFAULT_REQUEST_QUEUE_CAPACITY,
            tcp: TcpTransportConfig::default(),
            endpoints: Vec::new(),
        }
    }
}

impl SessionConfig {
    /// Parse a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}

/// `Duration` as an integer number of milliseconds.
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
