//! Shutdown signal handling for the service host.
//!
//! SIGTERM and SIGINT (Ctrl+C on Windows) cancel a shared token; everything
//! that should stop on shutdown watches a clone of it.

use std::io;

use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tracing::{debug, info};

/// Turns process signals into a cancellation.
#[derive(Debug, Clone, Default)]
pub struct SignalHandler {
    token: CancellationToken,
}

impl SignalHandler {
    /// Creates a new signal handler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a handler that also fires when `parent` is cancelled.
    pub fn with_parent(parent: &CancellationToken) -> Self {
        Self {
            token: parent.child_token(),
        }
    }

    /// Installs the signal handlers and spawns the listener task.
    ///
    /// Handlers are installed before this returns, so a signal arriving
    /// right after the call is not missed.
    #[cfg(unix)]
    pub fn spawn_listener(&self) -> io::Result<()> {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let token = self.token.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
                _ = sigint.recv() => info!("received SIGINT, shutting down"),
                _ = token.cancelled() => {}
            }
            token.cancel();
            debug!("signal listener stopped");
        });
        Ok(())
    }

    /// Installs the Ctrl+C handler and spawns the listener task.
    #[cfg(not(unix))]
    pub fn spawn_listener(&self) -> io::Result<()> {
        let token = self.token.clone();

        tokio::spawn(async move {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if result.is_ok() {
                        info!("received Ctrl+C, shutting down");
                    }
                }
                _ = token.cancelled() => {}
            }
            token.cancel();
            debug!("signal listener stopped");
        });
        Ok(())
    }

    /// Returns a future that completes when shutdown is signaled.
    pub fn shutdown(&self) -> WaitForCancellationFutureOwned {
        self.token.clone().cancelled_owned()
    }

    /// Returns true if shutdown has been signaled.
    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Programmatically triggers a shutdown.
    pub fn trigger_shutdown(&self) {
        self.token.cancel();
    }

    /// Returns the token cancelled on shutdown.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}
