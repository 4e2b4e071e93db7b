//! Client error types.

use std::fmt;

use codervpn_speaker::SpeakerError;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur in the client.
#[derive(Debug)]
pub enum ClientError {
    /// Configuration error.
    Config(String),
    /// IO error.
    Io(std::io::Error),
    /// Connection to the service failed.
    Connection(String),
    /// Handshake or messaging error.
    Speaker(SpeakerError),
    /// Connect or request timed out.
    Timeout(String),
    /// The service answered with the wrong message type.
    UnexpectedResponse(String),
    /// The service refused the request.
    Rejected(String),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {}", msg),
            Self::Io(err) => write!(f, "IO error: {}", err),
            Self::Connection(msg) => write!(f, "connection error: {}", msg),
            Self::Speaker(err) => write!(f, "{}", err),
            Self::Timeout(msg) => write!(f, "timeout: {}", msg),
            Self::UnexpectedResponse(msg) => write!(f, "unexpected response: {}", msg),
            Self::Rejected(msg) => write!(f, "request rejected: {}", msg),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Speaker(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<SpeakerError> for ClientError {
    fn from(err: SpeakerError) -> Self {
        Self::Speaker(err)
    }
}
