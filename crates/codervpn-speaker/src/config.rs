//! Speaker configuration.

use std::time::Duration;

use codervpn_protocol::RpcVersionList;

/// Default time allowed for the header exchange.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default number of unanswered inbound messages buffered before the reader
/// stops reading from the connection.
pub const DEFAULT_INBOUND_CAPACITY: usize = 32;

/// Configuration for a [`Speaker`](crate::Speaker).
#[derive(Debug, Clone)]
pub struct SpeakerConfig {
    /// Time allowed for the header exchange.
    pub handshake_timeout: Duration,
    /// Capacity of the inbound message channel.
    pub inbound_capacity: usize,
    /// Versions announced to the peer.
    pub versions: RpcVersionList,
}

impl Default for SpeakerConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            inbound_capacity: DEFAULT_INBOUND_CAPACITY,
            versions: RpcVersionList::current(),
        }
    }
}

impl SpeakerConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the handshake timeout.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Sets the inbound channel capacity. Zero is raised to one.
    pub fn with_inbound_capacity(mut self, capacity: usize) -> Self {
        self.inbound_capacity = capacity.max(1);
        self
    }

    /// Overrides the announced versions.
    pub fn with_versions(mut self, versions: RpcVersionList) -> Self {
        self.versions = versions;
        self
    }
}
