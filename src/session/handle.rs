//! Session task and its handle.
//!
//! # Architecture
//!
//! ```text
//! Transport ── TransportEvent ──┐
//! SessionHandle ─── Request ────┼─► Session task (&mut Session) ─► Transport
//! interval(tick) ───────────────┘
//! ```
//!
//! The task handles one input at a time: transport events first, then timer
//! ticks, then client requests. Requests are answered over a oneshot channel
//! and never wait for the network.

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use super::{Session, SessionSnapshot};
use crate::connection::ConnectionState;
use crate::error::{LinkError, Result};
use crate::protocol::{ModuleCommand, SystemCommand};
use crate::transport::{Transport, TransportEvent};

type Reply<R> = oneshot::Sender<R>;

enum Request {
    Send {
        command: String,
        reply: Reply<Result<u64>>,
    },
    SendSystem {
        command: SystemCommand,
        reply: Reply<Result<u64>>,
    },
    SendModule {
        module_id: String,
        command: ModuleCommand,
        reply: Reply<Result<u64>>,
    },
    StartScan {
        reply: Reply<Result<()>>,
    },
    StopScan {
        reply: Reply<()>,
    },
    Connect {
        endpoint_id: String,
        reply: Reply<Result<()>>,
    },
    Disconnect {
        reply: Reply<bool>,
    },
    ClearLog {
        reply: Reply<()>,
    },
    ClearErrors {
        reply: Reply<()>,
    },
    Snapshot {
        reply: Reply<SessionSnapshot>,
    },
    Shutdown,
}

/// Move `session` into a task that consumes `events` and client requests.
///
/// The task ends on [`SessionHandle::shutdown`] or once every handle is
/// dropped; it disconnects and hands the session back through the
/// `JoinHandle`. Must be called from within a Tokio runtime.
pub fn spawn<T: Transport>(
    session: Session<T>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
) -> (SessionHandle, JoinHandle<Session<T>>) {
    let (tx, rx) = mpsc::channel(session.request_queue_capacity.max(1));
    let handle = SessionHandle {
        requests: tx,
        state: session.subscribe_state(),
    };
    let task = tokio::spawn(run(session, events, rx));
    (handle, task)
}

async fn run<T: Transport>(
    mut session: Session<T>,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    mut requests: mpsc::Receiver<Request>,
) -> Session<T> {
    let period = session.tick_interval.max(time::Duration::from_millis(1));
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut events_open = true;

    tracing::debug!("Session task started");

    loop {
        tokio::select! {
            biased;

            event = events.recv(), if events_open => match event {
                Some(event) => session.handle_transport_event(event, Instant::now()),
                None => {
                    tracing::warn!("Transport event channel closed");
                    events_open = false;
                }
            },

            _ = ticker.tick() => {
                let expired = session.tick(Instant::now());
                if expired > 0 {
                    tracing::debug!("{} commands timed out", expired);
                }
            }

            request = requests.recv() => match request {
                Some(Request::Shutdown) | None => break,
                Some(request) => handle_request(&mut session, request),
            },
        }
    }

    session.disconnect();
    tracing::debug!("Session task stopped");
    session
}

fn handle_request<T: Transport>(session: &mut Session<T>, request: Request) {
    let now = Instant::now();
    // A dropped reply receiver means the caller gave up; nothing to do.
    match request {
        Request::Send { command, reply } => {
            let _ = reply.send(session.send_command(&command, now));
        }
        Request::SendSystem { command, reply } => {
            let _ = reply.send(session.send_system_command(command, now));
        }
        Request::SendModule {
            module_id,
            command,
            reply,
        } => {
            let _ = reply.send(session.send_module_command(&module_id, command, now));
        }
        Request::StartScan { reply } => {
            let _ = reply.send(session.start_scan(now));
        }
        Request::StopScan { reply } => {
            session.stop_scan();
            let _ = reply.send(());
        }
        Request::Connect { endpoint_id, reply } => {
            let _ = reply.send(session.connect(&endpoint_id));
        }
        Request::Disconnect { reply } => {
            let _ = reply.send(session.disconnect());
        }
        Request::ClearLog { reply } => {
            session.clear_log();
            let _ = reply.send(());
        }
        Request::ClearErrors { reply } => {
            session.clear_errors();
            let _ = reply.send(());
        }
        Request::Snapshot { reply } => {
            let _ = reply.send(session.snapshot());
        }
        Request::Shutdown => {}
    }
}

/// Cloneable handle to a running session task.
///
/// Every call fails with [`LinkError::SessionClosed`] once the task is gone.
#[derive(Clone)]
pub struct SessionHandle {
    requests: mpsc::Sender<Request>,
    state: watch::Receiver<ConnectionState>,
}

impl SessionHandle {
    async fn call<R>(&self, request: impl FnOnce(Reply<R>) -> Request) -> Result<R> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(request(tx))
            .await
            .map_err(|_| LinkError::SessionClosed)?;
        rx.await.map_err(|_| LinkError::SessionClosed)
    }

    /// Send raw command text. Returns the command's correlation id.
    pub async fn send_command(&self, command: &str) -> Result<u64> {
        let command = command.to_string();
        self.call(|reply| Request::Send { command, reply }).await?
    }

    pub async fn send_system_command(&self, command: SystemCommand) -> Result<u64> {
        self.call(|reply| Request::SendSystem { command, reply }).await?
    }

    /// Send `MODULE:COMMAND`. Fails with a validation error for bad module ids.
    pub async fn send_module_command(
        &self,
        module_id: &str,
        command: ModuleCommand,
    ) -> Result<u64> {
        let module_id = module_id.to_string();
        self.call(|reply| Request::SendModule {
            module_id,
            command,
            reply,
        })
        .await?
    }

    pub async fn start_scan(&self) -> Result<()> {
        self.call(|reply| Request::StartScan { reply }).await?
    }

    pub async fn stop_scan(&self) -> Result<()> {
        self.call(|reply| Request::StopScan { reply }).await
    }

    pub async fn connect(&self, endpoint_id: &str) -> Result<()> {
        let endpoint_id = endpoint_id.to_string();
        self.call(|reply| Request::Connect { endpoint_id, reply }).await?
    }

    /// Returns false when there was no link to drop.
    pub async fn disconnect(&self) -> Result<bool> {
        self.call(|reply| Request::Disconnect { reply }).await
    }

    pub async fn clear_log(&self) -> Result<()> {
        self.call(|reply| Request::ClearLog { reply }).await
    }

    pub async fn clear_errors(&self) -> Result<()> {
        self.call(|reply| Request::ClearErrors { reply }).await
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot> {
        self.call(|reply| Request::Snapshot { reply }).await
    }

    /// Receiver that sees every connection state change.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Connection state as last published.
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Ask the task to disconnect and stop.
    pub async fn shutdown(&self) -> Result<()> {
        self.requests
            .send(Request::Shutdown)
            .await
            .map_err(|_| LinkError::SessionClosed)
    }

    /// Whether the session task has stopped.
    pub fn is_closed(&self) -> bool {
        self.requests.is_closed()
    }
}
