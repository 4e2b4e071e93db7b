//! Opening a connection to the service.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use codervpn_server::{DEFAULT_PIPE_NAME, DEFAULT_SOCKET_PATH};
use codervpn_speaker::BoxConnection;
use tracing::debug;

use crate::error::{ClientError, ClientResult};

/// Where the service listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Unix domain socket.
    UnixSocket(PathBuf),
    /// Windows named pipe.
    NamedPipe(String),
}

impl Endpoint {
    /// The service's default endpoint on this platform.
    pub fn platform_default() -> Self {
        if cfg!(windows) {
            Self::NamedPipe(DEFAULT_PIPE_NAME.to_string())
        } else {
            Self::UnixSocket(PathBuf::from(DEFAULT_SOCKET_PATH))
        }
    }

    /// Picks the endpoint from the first source that names one.
    ///
    /// Socket paths only count on Unix and pipe names only on Windows.
    pub fn select(socket_path: Option<PathBuf>, pipe_name: Option<String>) -> Self {
        if cfg!(windows) {
            pipe_name.map_or_else(Self::platform_default, Self::NamedPipe)
        } else {
            socket_path.map_or_else(Self::platform_default, Self::UnixSocket)
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnixSocket(path) => write!(f, "unix:{}", path.display()),
            Self::NamedPipe(name) => write!(f, "pipe:{}", name),
        }
    }
}

/// Connects to `endpoint`, giving up after `timeout`.
pub async fn connect(endpoint: &Endpoint, timeout: Duration) -> ClientResult<BoxConnection> {
    debug!(%endpoint, "connecting to service");
    tokio::time::timeout(timeout, open(endpoint))
        .await
        .map_err(|_| {
            ClientError::Timeout(format!(
                "connecting to {} took longer than {}s",
                endpoint,
                timeout.as_secs_f32()
            ))
        })?
}

async fn open(endpoint: &Endpoint) -> ClientResult<BoxConnection> {
    match endpoint {
        Endpoint::UnixSocket(path) => open_socket(path).await,
        Endpoint::NamedPipe(name) => open_pipe(name).await,
    }
}

#[cfg(unix)]
async fn open_socket(path: &std::path::Path) -> ClientResult<BoxConnection> {
    let stream = tokio::net::UnixStream::connect(path).await.map_err(|e| {
        ClientError::Connection(format!("failed to connect to {}: {}", path.display(), e))
    })?;
    Ok(Box::new(stream))
}

#[cfg(not(unix))]
async fn open_socket(path: &std::path::Path) -> ClientResult<BoxConnection> {
    Err(ClientError::Connection(format!(
        "unix sockets are not supported on this platform ({})",
        path.display()
    )))
}

/// Opens the pipe, waiting while every server instance is busy.
#[cfg(windows)]
async fn open_pipe(name: &str) -> ClientResult<BoxConnection> {
    use tokio::net::windows::named_pipe::ClientOptions;
    use windows_sys::Win32::Foundation::ERROR_PIPE_BUSY;

    const BUSY_RETRY: Duration = Duration::from_millis(50);

    loop {
        match ClientOptions::new().open(name) {
            Ok(pipe) => return Ok(Box::new(pipe)),
            Err(e) if e.raw_os_error() == Some(ERROR_PIPE_BUSY as i32) => {
                debug!(pipe = name, "pipe busy, retrying");
            }
            Err(e) => {
                return Err(ClientError::Connection(format!(
                    "failed to open {}: {}",
                    name, e
                )));
            }
        }
        tokio::time::sleep(BUSY_RETRY).await;
    }
}

#[cfg(not(windows))]
async fn open_pipe(name: &str) -> ClientResult<BoxConnection> {
    Err(ClientError::Connection(format!(
        "named pipes are not supported on this platform ({})",
        name
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_display() {
        assert_eq!(
            Endpoint::UnixSocket(PathBuf::from("/run/x.sock")).to_string(),
            "unix:/run/x.sock"
        );
        assert_eq!(
            Endpoint::NamedPipe(r"\\.\pipe\X".to_string()).to_string(),
            r"pipe:\\.\pipe\X"
        );
    }

    #[cfg(unix)]
    #[test]
    fn select_prefers_override() {
        assert_eq!(
            Endpoint::select(None, None),
            Endpoint::UnixSocket(PathBuf::from("/run/coder-desktop/vpn.sock"))
        );
        assert_eq!(
            Endpoint::select(Some(PathBuf::from("/tmp/a.sock")), Some("ignored".into())),
            Endpoint::UnixSocket(PathBuf::from("/tmp/a.sock"))
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn connect_to_missing_socket_fails() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = Endpoint::UnixSocket(dir.path().join("absent.sock"));
        let result = connect(&endpoint, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(ClientError::Connection(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn connect_to_listening_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vpn.sock");
        let _listener = tokio::net::UnixListener::bind(&path).unwrap();

        let endpoint = Endpoint::UnixSocket(path);
        assert!(connect(&endpoint, Duration::from_secs(1)).await.is_ok());
    }
}
