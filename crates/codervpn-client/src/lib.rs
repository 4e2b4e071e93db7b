//! Client side of codervpn IPC and the `codervpn` debug CLI.
//!
//! - [`transport`] opens the socket or pipe to the service
//! - [`VpnClient`] performs the handshake and wraps the start, stop and
//!   status requests
//! - [`console`] is the interactive debug console

pub mod cli;
pub mod commands;
pub mod config;
pub mod console;
pub mod error;
pub mod secret;
pub mod session;
pub mod transport;

pub use cli::Cli;
pub use error::{ClientError, ClientResult};
pub use session::VpnClient;
pub use transport::Endpoint;
