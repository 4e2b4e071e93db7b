//! Request/reply messaging over a single duplex stream.
//!
//! A [`Speaker`] performs the codervpn header exchange on a freshly opened
//! stream and then multiplexes requests, replies and pushes over it:
//!
//! - one reader task per connection decodes frames and routes replies to
//!   the request waiting for them;
//! - messages that are not replies arrive on the [`Inbound`] channel and
//!   can be answered with [`InboundMessage::reply`];
//! - any number of tasks may send at the same time.
//!
//! Any I/O or framing failure ends the connection: every pending request
//! fails with the same [`SpeakerError::Faulted`] cause and
//! [`Speaker::closed`] reports it.

mod config;
mod error;
pub mod handshake;
mod speaker;

use tokio::io::{AsyncRead, AsyncWrite};

pub use config::{DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_INBOUND_CAPACITY, SpeakerConfig};
pub use error::{SpeakerError, SpeakerResult};
pub use speaker::{Inbound, InboundMessage, Speaker, SpeakerState};

/// A connected byte stream a [`Speaker`] can run on.
pub trait Connection: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Connection for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Type-erased connection, as returned by the transports.
pub type BoxConnection = Box<dyn Connection>;
