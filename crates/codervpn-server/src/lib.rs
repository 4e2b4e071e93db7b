//! Listening side of codervpn IPC.
//!
//! This crate provides:
//! - [`SocketServer`] (Unix) and [`PipeServer`] (Windows) listeners, both
//!   reachable by every local user
//! - [`ServiceHost`], which runs a [`ServiceHandler`] behind a listener
//! - [`LoopbackService`], an in-memory handler for debugging clients
//! - [`SignalHandler`] for graceful shutdown
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use codervpn_server::{LoopbackService, ServerConfig, ServiceHost, SignalHandler, SocketServer};
//! use codervpn_speaker::SpeakerConfig;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let listener = SocketServer::new(ServerConfig::default()).await?;
//!     let signals = SignalHandler::new();
//!     signals.spawn_listener()?;
//!
//!     let host = Arc::new(ServiceHost::new(LoopbackService::new(), SpeakerConfig::default()));
//!     host.serve(&listener, signals.shutdown()).await?;
//!     Ok(())
//! }
//! ```

mod config;
mod connection;
mod error;
mod listener;
#[cfg(windows)]
mod pipe;
mod service;
mod signals;
#[cfg(unix)]
mod socket;

pub use config::{DEFAULT_PIPE_NAME, DEFAULT_SOCKET_MODE, DEFAULT_SOCKET_PATH, ServerConfig};
pub use connection::Connection;
pub use error::{ServerError, ServerResult};
pub use listener::Listener;
#[cfg(windows)]
pub use pipe::PipeServer;
pub use service::{LoopbackService, ServiceHandler, ServiceHost, dispatch};
pub use signals::SignalHandler;
#[cfg(unix)]
pub use socket::SocketServer;
