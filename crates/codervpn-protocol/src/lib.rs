//! Wire protocol for codervpn inter-process messaging.
//!
//! This crate defines everything that travels over the stream between a
//! VPN service and its clients, or between a manager and its tunnel:
//!
//! # Handshake
//!
//! When a connection opens, both sides send one [`Header`] line:
//!
//! ```text
//! codervpn <role> <major.minor>[,<major.minor>...]\n
//! ```
//!
//! Each side checks the peer announced the expected [`Role`] and picks the
//! newest common version with [`RpcVersionList::is_compatible_with`].
//!
//! # Messages
//!
//! After the handshake, messages are sent as length-prefixed JSON:
//! - 4 bytes: message length (u32, big-endian)
//! - N bytes: JSON [`Envelope`]
//!
//! Every envelope carries an [`Rpc`] control block used to correlate
//! replies with requests, and exactly one payload of the sender's
//! [`Payload`] type.
//!
//! # Example
//!
//! ```rust
//! use codervpn_protocol::{ClientMessage, Envelope, StatusRequest, decode_message, encode_message};
//!
//! let request = Envelope::request(1, ClientMessage::Status(StatusRequest {}));
//! let bytes = encode_message(&request).unwrap();
//! let decoded: Envelope<ClientMessage> = decode_message(&bytes).unwrap();
//! assert_eq!(decoded, request);
//! ```

mod error;
mod framing;
mod header;
mod role;
mod types;
mod version;

pub use error::{FormatError, ProtocolError, ProtocolResult};
pub use framing::{FrameReader, FrameWriter, decode_message, encode_message};
pub use header::{HEADER_PREAMBLE, Header, MAX_HEADER_LEN};
pub use role::Role;
pub use types::{
    Agent, ClientMessage, DownloadProgress, Envelope, HttpHeader, Lifecycle, Log, LogField,
    LogLevel, ManagerMessage, Payload, PeerUpdate, Rpc, ServiceMessage, StartProgress,
    StartProgressStage, StartRequest, StartResponse, Status, StatusRequest, StopRequest,
    StopResponse, TunnelMessage, Workspace, WorkspaceStatus,
};
pub use version::{RpcVersion, RpcVersionList};

/// Maximum message size (16 MiB).
pub const MAX_MESSAGE_SIZE: u32 = 0x100_0000;
