//! TCP transport.
//!
//! Endpoints are a fixed list of socket addresses; "discovery" reports each of
//! them. A connected link runs as one task that owns the socket: it forwards
//! reads as [`TransportEvent::Data`] and drains a bounded write queue.
//!
//! # Example
//!
//! ```ignore
//! use iac_link::transport::{TcpEndpoint, TcpTransport, TcpTransportConfig};
//!
//! let board = TcpEndpoint::new("Bench board", "127.0.0.1:7000".parse()?);
//! let (transport, events) = TcpTransport::new(vec![board], TcpTransportConfig::default());
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{DiscoveredEndpoint, LinkState, Transport, TransportEvent};
use crate::error::{LinkError, Result};

/// Default connection timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default capacity of the outgoing write queue.
pub const DEFAULT_WRITE_QUEUE_CAPACITY: usize = 64;

/// Default socket read size.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 4 * 1024;

/// A reachable device.
#[derive(Debug, Clone, Deserialize)]
pub struct TcpEndpoint {
    /// Display name.
    pub name: String,
    /// Socket address; its string form is the endpoint id.
    pub addr: SocketAddr,
}

impl TcpEndpoint {
    pub fn new(name: impl Into<String>, addr: SocketAddr) -> Self {
        Self {
            name: name.into(),
            addr,
        }
    }

    /// Endpoint id as reported in discovery.
    pub fn id(&self) -> String {
        self.addr.to_string()
    }
}

/// Configuration for [`TcpTransport`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TcpTransportConfig {
    /// How long a connection attempt may take.
    #[serde(rename = "connect_timeout_ms", with = "crate::config::duration_ms")]
    pub connect_timeout: Duration,
    /// Writes queued beyond this are refused.
    pub write_queue_capacity: usize,
    /// Bytes requested per socket read.
    pub read_buffer_size: usize,
}

impl Default for TcpTransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            write_queue_capacity: DEFAULT_WRITE_QUEUE_CAPACITY,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }
}

/// The link task and its write queue.
struct Link {
    endpoint_id: String,
    writes: mpsc::Sender<Bytes>,
    task: JoinHandle<()>,
}

/// Transport over TCP sockets.
pub struct TcpTransport {
    endpoints: Vec<TcpEndpoint>,
    config: TcpTransportConfig,
    events: mpsc::UnboundedSender<TransportEvent>,
    discovering: bool,
    link: Option<Link>,
}

impl TcpTransport {
    /// Create a transport and the event stream it reports on.
    ///
    /// A TCP stack has no power state, so `PoweredOn` is reported right away.
    pub fn new(
        endpoints: Vec<TcpEndpoint>,
        config: TcpTransportConfig,
    ) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let _ = events.send(TransportEvent::LinkState(LinkState::PoweredOn));

        let transport = Self {
            endpoints,
            config,
            events,
            discovering: false,
            link: None,
        };

        (transport, rx)
    }

    /// Whether discovery is running.
    pub fn is_discovering(&self) -> bool {
        self.discovering
    }

    /// Id of the endpoint with a live (or starting) link.
    pub fn linked_endpoint(&self) -> Option<&str> {
        self.link.as_ref().map(|l| l.endpoint_id.as_str())
    }

    fn emit(&self, event: TransportEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("Transport event dropped, receiver is gone");
        }
    }
}

impl Transport for TcpTransport {
    fn start_discovery(&mut self) -> Result<()> {
        self.discovering = true;
        for endpoint in &self.endpoints {
            self.emit(TransportEvent::Discovered(DiscoveredEndpoint::new(
                endpoint.id(),
                Some(endpoint.name.clone()),
                None,
            )));
        }
        Ok(())
    }

    fn stop_discovery(&mut self) {
        self.discovering = false;
    }

    fn connect(&mut self, endpoint_id: &str) -> Result<()> {
        let endpoint = self
            .endpoints
            .iter()
            .find(|e| e.id() == endpoint_id)
            .ok_or_else(|| LinkError::UnknownEndpoint(endpoint_id.to_string()))?;

        if let Some(old) = self.link.take() {
            old.task.abort();
        }

        let (writes, write_rx) = mpsc::channel(self.config.write_queue_capacity.max(1));
        let task = tokio::spawn(run_link(
            endpoint.addr,
            endpoint_id.to_string(),
            self.config.clone(),
            self.events.clone(),
            write_rx,
        ));

        self.link = Some(Link {
            endpoint_id: endpoint_id.to_string(),
            writes,
            task,
        });
        Ok(())
    }

    fn disconnect(&mut self, endpoint_id: &str) {
        match self.link.take() {
            Some(link) if link.endpoint_id == endpoint_id => {
                tracing::debug!("Closing link to {}", endpoint_id);
                link.task.abort();
            }
            other => self.link = other,
        }
    }

    fn discover_services(&mut self) {
        // A socket is its own write/notify channel.
        self.emit(TransportEvent::ServicesReady);
    }

    fn write(&mut self, data: Bytes) -> Result<()> {
        let link = self.link.as_ref().ok_or(LinkError::NotReady)?;
        link.writes.try_send(data).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                LinkError::SendFailed("write queue full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => LinkError::NotReady,
        })
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        if let Some(link) = self.link.take() {
            link.task.abort();
        }
    }
}

/// Connect, then pump reads and queued writes until either side closes.
async fn run_link(
    addr: SocketAddr,
    endpoint_id: String,
    config: TcpTransportConfig,
    events: mpsc::UnboundedSender<TransportEvent>,
    mut writes: mpsc::Receiver<Bytes>,
) {
    let stream = match tokio::time::timeout(config.connect_timeout, TcpStream::connect(addr)).await
    {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            let _ = events.send(TransportEvent::ConnectFailed {
                endpoint_id,
                reason: e.to_string(),
            });
            return;
        }
        Err(_) => {
            let _ = events.send(TransportEvent::ConnectFailed {
                endpoint_id,
                reason: format!("timed out after {:?}", config.connect_timeout),
            });
            return;
        }
    };

    tracing::info!("Connected to {}", addr);
    let _ = events.send(TransportEvent::Connected {
        endpoint_id: endpoint_id.clone(),
    });

    let (mut reader, mut writer) = stream.into_split();
    // A zero-length read would look like EOF.
    let mut buf = vec![0u8; config.read_buffer_size.max(1)];

    let reason = loop {
        tokio::select! {
            read = reader.read(&mut buf) => match read {
                Ok(0) => break None,
                Ok(n) => {
                    let _ = events.send(TransportEvent::Data(Bytes::copy_from_slice(&buf[..n])));
                }
                Err(e) => break Some(e.to_string()),
            },
            queued = writes.recv() => {
                let Some(data) = queued else { break None };
                let written = async {
                    writer.write_all(&data).await?;
                    writer.flush().await
                };
                match written.await {
                    Ok(()) => {
                        let _ = events.send(TransportEvent::WriteAck);
                    }
                    Err(e) => {
                        tracing::warn!("Write to {} failed: {}", addr, e);
                        let _ = events.send(TransportEvent::WriteFailed {
                            reason: e.to_string(),
                        });
                        break Some(e.to_string());
                    }
                }
            }
        }
    };

    tracing::info!("Link to {} closed", addr);
    let _ = events.send(TransportEvent::Disconnected {
        endpoint_id,
        reason,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<TransportEvent>) -> TransportEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("event within timeout")
            .expect("channel open")
    }

    #[tokio::test]
    async fn test_reports_powered_on_at_creation() {
        let (_transport, mut events) = TcpTransport::new(vec![], TcpTransportConfig::default());

        assert_eq!(
            next_event(&mut events).await,
            TransportEvent::LinkState(LinkState::PoweredOn)
        );
    }

    #[tokio::test]
    async fn test_discovery_reports_configured_endpoints() {
        let board = TcpEndpoint::new("Board", "127.0.0.1:7000".parse().unwrap());
        let (mut transport, mut events) =
            TcpTransport::new(vec![board], TcpTransportConfig::default());
        next_event(&mut events).await;

        transport.start_discovery().unwrap();
        assert!(transport.is_discovering());

        match next_event(&mut events).await {
            TransportEvent::Discovered(endpoint) => {
                assert_eq!(endpoint.id, "127.0.0.1:7000");
                assert_eq!(endpoint.name, "Board");
            }
            other => panic!("unexpected event {:?}", other),
        }

        transport.stop_discovery();
        assert!(!transport.is_discovering());
    }

    #[tokio::test]
    async fn test_write_without_link_not_ready() {
        let (mut transport, _events) = TcpTransport::new(vec![], TcpTransportConfig::default());

        let result = transport.write(Bytes::from_static(b"get_status\n"));

        assert!(matches!(result, Err(LinkError::NotReady)));
    }

    #[tokio::test]
    async fn test_connect_unknown_endpoint() {
        let (mut transport, _events) = TcpTransport::new(vec![], TcpTransportConfig::default());

        let result = transport.connect("10.0.0.1:1");

        assert!(matches!(result, Err(LinkError::UnknownEndpoint(_))));
    }

    #[tokio::test]
    async fn test_connect_write_and_read() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let board = TcpEndpoint::new("Board", addr);
        let (mut transport, mut events) =
            TcpTransport::new(vec![board.clone()], TcpTransportConfig::default());
        next_event(&mut events).await;

        transport.connect(&board.id()).unwrap();
        let (mut socket, _) = listener.accept().await.unwrap();

        assert_eq!(
            next_event(&mut events).await,
            TransportEvent::Connected {
                endpoint_id: board.id()
            }
        );

        transport.write(Bytes::from_static(b"get_status\n")).unwrap();
        let mut received = [0u8; 11];
        socket.read_exact(&mut received).await.unwrap();
        assert_eq!(&received, b"get_status\n");
        assert_eq!(next_event(&mut events).await, TransportEvent::WriteAck);

        socket.write_all(b"GNS:READY\n").await.unwrap();
        match next_event(&mut events).await {
            TransportEvent::Data(data) => assert_eq!(&data[..], b"GNS:READY\n"),
            other => panic!("unexpected event {:?}", other),
        }

        drop(socket);
        assert_eq!(
            next_event(&mut events).await,
            TransportEvent::Disconnected {
                endpoint_id: board.id(),
                reason: None
            }
        );
    }

    #[tokio::test]
    async fn test_zero_sizes_are_clamped() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let board = TcpEndpoint::new("Board", addr);
        let config = TcpTransportConfig {
            write_queue_capacity: 0,
            read_buffer_size: 0,
            ..Default::default()
        };
        let (mut transport, mut events) = TcpTransport::new(vec![board.clone()], config);
        next_event(&mut events).await;

        transport.connect(&board.id()).unwrap();
        let (mut socket, _) = listener.accept().await.unwrap();
        assert_eq!(
            next_event(&mut events).await,
            TransportEvent::Connected {
                endpoint_id: board.id()
            }
        );

        transport.write(Bytes::from_static(b"reset\n")).unwrap();
        let mut received = [0u8; 6];
        socket.read_exact(&mut received).await.unwrap();
        assert_eq!(&received, b"reset\n");
        assert_eq!(next_event(&mut events).await, TransportEvent::WriteAck);

        socket.write_all(b"GNS:READY\n").await.unwrap();
        let mut data = Vec::new();
        while data.len() < 10 {
            match next_event(&mut events).await {
                TransportEvent::Data(chunk) => data.extend_from_slice(&chunk),
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert_eq!(&data[..], b"GNS:READY\n");
    }

    #[tokio::test]
    async fn test_connect_refused_reports_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let board = TcpEndpoint::new("Gone", addr);
        let (mut transport, mut events) =
            TcpTransport::new(vec![board.clone()], TcpTransportConfig::default());
        next_event(&mut events).await;

        transport.connect(&board.id()).unwrap();

        match next_event(&mut events).await {
            TransportEvent::ConnectFailed { endpoint_id, .. } => {
                assert_eq!(endpoint_id, board.id())
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
