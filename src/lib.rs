//! # iac-link
//!
//! Client driver for the IAC device protocol: newline-terminated ASCII lines
//! of the form `MODULE:ACTION[:VALUE]` over a byte-stream link.
//!
//! ## Architecture
//!
//! - **Transport** ([`transport`]): discovery, connect, raw writes; reports
//!   everything as [`transport::TransportEvent`]s
//! - **Connection** ([`connection`]): the one state machine over the transport
//!   plus line reassembly
//! - **Dispatch** ([`dispatch`]): validation, rate limiting, response
//!   correlation, timeouts and the protocol log
//! - **Registry** ([`registry`]): per-module status derived from responses
//! - **Session** ([`session`]): owns all of the above, optionally in its own task
//!
//! ## Example
//!
//! ```ignore
//! use iac_link::protocol::SystemCommand;
//! use iac_link::session::SessionBuilder;
//! use iac_link::transport::TcpEndpoint;
//!
//! #[tokio::main]
//! async fn main() -> iac_link::Result<()> {
//!     let (session, _task) = SessionBuilder::new()
//!         .endpoint(TcpEndpoint::new("Bench board", "127.0.0.1:7000".parse().unwrap()))
//!         .start_tcp();
//!
//!     session.start_scan().await?;
//!     session.connect("127.0.0.1:7000").await?;
//!     session.send_system_command(SystemCommand::StartSystem).await?;
//!
//!     for module in session.snapshot().await?.modules {
//!         println!("{}: active={}", module.name, module.is_active);
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod transport;

pub use config::SessionConfig;
pub use connection::ConnectionState;
pub use error::{LinkError, Result};
pub use session::{Session, SessionBuilder, SessionHandle, SessionSnapshot};
