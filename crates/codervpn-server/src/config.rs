//! Server configuration.

use std::path::PathBuf;
use std::time::Duration;

use codervpn_speaker::{DEFAULT_HANDSHAKE_TIMEOUT, SpeakerConfig};

use crate::error::{ServerError, ServerResult};

/// Default Unix socket path of the VPN service.
pub const DEFAULT_SOCKET_PATH: &str = "/run/coder-desktop/vpn.sock";

/// Default named pipe of the VPN service.
pub const DEFAULT_PIPE_NAME: &str = r"\\.\pipe\Coder.Desktop.Vpn";

/// Permissions applied to the socket file so every local user can connect.
pub const DEFAULT_SOCKET_MODE: u32 = 0o666;

/// Time allowed for the live-server check on an existing socket.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Path to the Unix socket.
    pub socket_path: PathBuf,

    /// Name of the Windows named pipe.
    pub pipe_name: String,

    /// Time allowed for the connect attempt that detects a live server on an
    /// existing socket.
    pub probe_timeout: Duration,

    /// Maximum concurrent connections.
    pub max_connections: usize,

    /// Whether to remove stale socket on startup.
    pub cleanup_stale_socket: bool,

    /// Mode bits applied to the socket file after binding.
    pub socket_mode: u32,

    /// Time allowed for each connection's header exchange.
    pub handshake_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            pipe_name: DEFAULT_PIPE_NAME.to_string(),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            max_connections: 100,
            cleanup_stale_socket: true,
            socket_mode: DEFAULT_SOCKET_MODE,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }
}

impl ServerConfig {
    /// Creates a new server configuration with the given socket path.
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            ..Default::default()
        }
    }

    /// Builder: set pipe name.
    pub fn with_pipe_name(mut self, name: impl Into<String>) -> Self {
        self.pipe_name = name.into();
        self
    }

    /// Builder: set probe timeout.
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Builder: set max connections.
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Builder: set cleanup stale socket.
    pub fn with_cleanup_stale_socket(mut self, cleanup: bool) -> Self {
        self.cleanup_stale_socket = cleanup;
        self
    }

    /// Builder: set socket mode.
    pub fn with_socket_mode(mut self, mode: u32) -> Self {
        self.socket_mode = mode;
        self
    }

    /// Builder: set handshake timeout.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Checks the settings before a listener is bound.
    pub fn validate(&self) -> ServerResult<()> {
        if self.max_connections == 0 {
            return Err(ServerError::config("max_connections must be at least 1"));
        }
        if self.socket_mode > 0o777 {
            return Err(ServerError::config(format!(
                "socket_mode {:o} has bits outside 0o777",
                self.socket_mode
            )));
        }
        if self.pipe_name.is_empty() {
            return Err(ServerError::config("pipe_name is empty"));
        }
        if self.probe_timeout.is_zero() {
            return Err(ServerError::config("probe_timeout must be non-zero"));
        }
        if self.handshake_timeout.is_zero() {
            return Err(ServerError::config("handshake_timeout must be non-zero"));
        }
        Ok(())
    }

    /// Speaker settings for accepted connections.
    pub fn speaker_config(&self) -> SpeakerConfig {
        SpeakerConfig::default().with_handshake_timeout(self.handshake_timeout)
    }
}
