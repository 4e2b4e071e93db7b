//! Server error types.

use std::io;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// IO error (socket, pipe, file, etc.).
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Handshake or messaging error on a connection.
    #[error("connection error: {0}")]
    Speaker(#[from] codervpn_speaker::SpeakerError),

    /// Socket path already in use by a live server.
    #[error("socket path already in use: {path}")]
    SocketInUse { path: String },

    /// Socket path cannot be used.
    #[error("invalid socket path: {path}")]
    SocketPathInvalid { path: String },

    /// Configuration error.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// Shutdown requested.
    #[error("server shutdown requested")]
    Shutdown,
}

impl ServerError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a socket in use error.
    pub fn socket_in_use(path: impl Into<String>) -> Self {
        Self::SocketInUse { path: path.into() }
    }

    /// Creates a socket path invalid error.
    pub fn socket_path_invalid(path: impl Into<String>) -> Self {
        Self::SocketPathInvalid { path: path.into() }
    }
}
