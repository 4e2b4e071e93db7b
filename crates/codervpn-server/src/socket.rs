//! Unix socket listener.
//!
//! The socket is world-connectable (`0o666`) so unprivileged desktop apps can
//! reach a service running as root.

use std::fs::Permissions;
use std::io::ErrorKind;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;

use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::error::{ServerError, ServerResult};
use crate::listener::Listener;

/// Unix socket server for handling client connections.
pub struct SocketServer {
    /// Server configuration.
    config: ServerConfig,
    /// Unix socket listener.
    listener: UnixListener,
    /// Semaphore for limiting concurrent connections.
    connection_semaphore: Arc<Semaphore>,
}

impl SocketServer {
    /// Binds the socket described by `config`.
    ///
    /// The parent directory is created if missing. An existing socket file
    /// is probed: a refused connection marks it stale and it is removed
    /// (when `cleanup_stale_socket` is set). An accepted, pending or timed
    /// out connection means a server owns it and binding fails with
    /// [`ServerError::SocketInUse`].
    pub async fn new(config: ServerConfig) -> ServerResult<Self> {
        config.validate()?;
        let socket_path = &config.socket_path;

        let Some(parent) = socket_path.parent() else {
            return Err(ServerError::socket_path_invalid(
                socket_path.to_string_lossy().to_string(),
            ));
        };
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
            debug!(path = %parent.display(), "created socket directory");
        }

        if socket_path.exists() && socket_is_stale(&config).await? {
            info!(path = %socket_path.display(), "removing stale socket");
            match std::fs::remove_file(socket_path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        let listener = UnixListener::bind(socket_path)?;
        std::fs::set_permissions(socket_path, Permissions::from_mode(config.socket_mode))?;
        info!(
            path = %socket_path.display(),
            mode = format_args!("{:o}", config.socket_mode),
            "socket server listening"
        );

        let connection_semaphore = Arc::new(Semaphore::new(config.max_connections));

        Ok(Self {
            config,
            listener,
            connection_semaphore,
        })
    }

    /// Returns the socket path.
    pub fn socket_path(&self) -> &Path {
        &self.config.socket_path
    }
}

/// Returns `Ok(true)` when nothing listens on the existing socket file and
/// cleanup is enabled.
async fn socket_is_stale(config: &ServerConfig) -> ServerResult<bool> {
    let socket_path = &config.socket_path;
    let in_use = || ServerError::socket_in_use(socket_path.to_string_lossy().to_string());

    match tokio::time::timeout(config.probe_timeout, UnixStream::connect(socket_path)).await {
        Ok(Ok(_)) => Err(in_use()),
        Ok(Err(e)) if e.kind() == ErrorKind::ConnectionRefused => {
            if config.cleanup_stale_socket {
                Ok(true)
            } else {
                Err(in_use())
            }
        }
        Ok(Err(e)) if e.kind() == ErrorKind::NotFound => Ok(false),
        // Backlog full: a live server is not keeping up.
        Ok(Err(e)) if e.kind() == ErrorKind::WouldBlock => Err(in_use()),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => {
            warn!(path = %socket_path.display(), "socket probe timed out");
            Err(in_use())
        }
    }
}

impl Listener for SocketServer {
    async fn accept(&self) -> ServerResult<Connection> {
        let permit = self
            .connection_semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ServerError::Shutdown)?;

        let (stream, _addr) = self.listener.accept().await?;
        debug!("accepted new connection");

        Ok(Connection::new(Box::new(stream), permit))
    }
}

impl Drop for SocketServer {
    fn drop(&mut self) {
        // Clean up the socket file
        if self.config.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.config.socket_path) {
                warn!(
                    path = %self.config.socket_path.display(),
                    error = %e,
                    "failed to remove socket file"
                );
            } else {
                debug!(
                    path = %self.config.socket_path.display(),
                    "removed socket file"
                );
            }
        }
    }
}
