//! Recording transport for unit tests.

use std::sync::{Arc, Mutex};

use bytes::Bytes;

use super::Transport;
use crate::error::{LinkError, Result};

/// A request the session made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    StartDiscovery,
    StopDiscovery,
    Connect(String),
    Disconnect(String),
    DiscoverServices,
}

#[derive(Debug, Default)]
pub(crate) struct Recorded {
    pub calls: Vec<Call>,
    pub writes: Vec<Bytes>,
    pub refuse_writes: bool,
}

/// Transport that records every request. Clones share the record.
#[derive(Debug, Clone, Default)]
pub(crate) struct RecordingTransport {
    pub recorded: Arc<Mutex<Recorded>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.recorded.lock().unwrap().calls.clone()
    }

    pub fn writes(&self) -> Vec<Bytes> {
        self.recorded.lock().unwrap().writes.clone()
    }

    pub fn refuse_writes(&self, refuse: bool) {
        self.recorded.lock().unwrap().refuse_writes = refuse;
    }

    fn record(&self, call: Call) {
        self.recorded.lock().unwrap().calls.push(call);
    }
}

impl Transport for RecordingTransport {
    fn start_discovery(&mut self) -> Result<()> {
        self.record(Call::StartDiscovery);
        Ok(())
    }

    fn stop_discovery(&mut self) {
        self.record(Call::StopDiscovery);
    }

    fn connect(&mut self, endpoint_id: &str) -> Result<()> {
        self.record(Call::Connect(endpoint_id.to_string()));
        Ok(())
    }

    fn disconnect(&mut self, endpoint_id: &str) {
        self.record(Call::Disconnect(endpoint_id.to_string()));
    }

    fn discover_services(&mut self) {
        self.record(Call::DiscoverServices);
    }

    fn write(&mut self, data: Bytes) -> Result<()> {
        let mut recorded = self.recorded.lock().unwrap();
        if recorded.refuse_writes {
            return Err(LinkError::SendFailed("write queue full".to_string()));
        }
        recorded.writes.push(data);
        Ok(())
    }
}
