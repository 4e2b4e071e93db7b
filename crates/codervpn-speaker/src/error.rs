//! Speaker error types.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use codervpn_protocol::{ProtocolError, Role, RpcVersionList};
use thiserror::Error;

/// Result type for speaker operations.
pub type SpeakerResult<T> = Result<T, SpeakerError>;

/// Errors raised by a [`Speaker`](crate::Speaker).
#[derive(Debug, Error)]
pub enum SpeakerError {
    /// Framing, encoding or header format error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// IO error on the underlying stream.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The peer announced a role this side does not talk to.
    #[error("incompatible role: expected {expected}, peer is {found}")]
    IncompatibleRole { expected: Role, found: Role },

    /// No major version is shared with the peer.
    #[error("incompatible versions: local {local}, remote {remote}")]
    IncompatibleVersion {
        local: RpcVersionList,
        remote: RpcVersionList,
    },

    /// The peer did not complete the handshake in time.
    #[error("handshake timed out after {timeout:?}")]
    HandshakeTimeout { timeout: Duration },

    /// The peer's header line did not end within the length cap.
    #[error("peer header exceeds {max} bytes")]
    HeaderTooLong { max: usize },

    /// The peer closed the connection.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// The connection failed earlier; the cause is shared by every caller.
    #[error("connection faulted: {0}")]
    Faulted(Arc<SpeakerError>),

    /// The speaker was disposed.
    #[error("speaker disposed")]
    Disposed,

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// `start` was called more than once.
    #[error("speaker already started")]
    AlreadyStarted,

    /// The speaker has not completed its handshake.
    #[error("speaker is not running")]
    NotRunning,
}

impl SpeakerError {
    /// Returns the innermost error, looking through [`SpeakerError::Faulted`].
    pub fn root(&self) -> &SpeakerError {
        match self {
            SpeakerError::Faulted(inner) => inner.root(),
            other => other,
        }
    }

    /// Returns true if the error ended the connection.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SpeakerError::Faulted(_) | SpeakerError::Disposed | SpeakerError::ConnectionClosed
        )
    }

    /// Rebuilds the error a caller sees once the connection is gone.
    pub(crate) fn replay(shared: &Arc<SpeakerError>) -> SpeakerError {
        match shared.as_ref() {
            SpeakerError::Disposed => SpeakerError::Disposed,
            _ => SpeakerError::Faulted(Arc::clone(shared)),
        }
    }
}
