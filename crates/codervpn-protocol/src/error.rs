//! Protocol error types.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Malformed version, version list or handshake header.
///
/// These are raised while parsing text, before any I/O happens.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    /// A version is not `major.minor` with a major of at least 1.
    #[error("invalid version {input:?}: {reason}")]
    InvalidVersion { input: String, reason: &'static str },

    /// A version list contained no versions.
    #[error("version list is empty")]
    EmptyVersionList,

    /// A version has major 0.
    #[error("version {version} has major 0")]
    ZeroMajor { version: String },

    /// Two entries of a version list share a major.
    #[error("duplicate major version {major} in version list")]
    DuplicateMajor { major: u64 },

    /// Majors of a version list are not in ascending order.
    #[error("version list majors are not ascending: {previous} followed by {next}")]
    UnsortedMajors { previous: u64, next: u64 },

    /// A header line did not have exactly three tokens.
    #[error("header must have 3 space-separated tokens, found {count}")]
    HeaderTokenCount { count: usize },

    /// A header line did not start with the protocol preamble.
    #[error("header preamble {found:?} is not {expected:?}")]
    HeaderPreamble { found: String, expected: &'static str },

    /// A header named a role that does not exist.
    #[error("unknown role {role:?}")]
    UnknownRole { role: String },

    /// A header line was not valid UTF-8.
    #[error("header is not valid UTF-8")]
    HeaderEncoding,
}

/// Errors that can occur during protocol operations.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Malformed version or header text.
    #[error(transparent)]
    Format(#[from] FormatError),

    /// Message exceeds maximum allowed size.
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: u64, max: u32 },

    /// Failed to serialize an outbound message.
    #[error("serialization failed: {0}")]
    Serialization(#[source] serde_json::Error),

    /// A received frame could not be decoded into a message.
    #[error("invalid payload: {0}")]
    InvalidPayload(#[source] serde_json::Error),

    /// IO error during read/write.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Incomplete message (connection closed before full message received).
    #[error("incomplete message: expected {expected} bytes, got {received}")]
    IncompleteMessage { expected: usize, received: usize },

    /// Empty message received.
    #[error("empty message")]
    EmptyMessage,
}

impl ProtocolError {
    /// Returns true if the error came from the byte stream rather than
    /// from the content of a frame.
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}
