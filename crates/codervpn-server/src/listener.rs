//! Accept loop shared by the socket and pipe servers.

use std::future::Future;

use tracing::{error, info};

use crate::connection::Connection;
use crate::error::{ServerError, ServerResult};

/// A server endpoint that hands out client connections.
pub trait Listener: Send + Sync {
    /// Accepts a single connection.
    ///
    /// Waits while the connection limit is reached.
    fn accept(&self) -> impl Future<Output = ServerResult<Connection>> + Send;

    /// Runs the accept loop, spawning `handler` for each connection.
    ///
    /// Accept errors are logged and the loop keeps going.
    fn run<F, Fut>(&self, handler: F) -> impl Future<Output = ServerResult<()>> + Send
    where
        F: Fn(Connection) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        async move {
            loop {
                match self.accept().await {
                    Ok(connection) => {
                        tokio::spawn(handler(connection));
                    }
                    Err(ServerError::Shutdown) => return Ok(()),
                    Err(e) => {
                        error!(error = %e, "failed to accept connection");
                    }
                }
            }
        }
    }

    /// Runs the accept loop until `shutdown` completes.
    fn run_until_shutdown<F, Fut, S>(
        &self,
        handler: F,
        shutdown: S,
    ) -> impl Future<Output = ServerResult<()>> + Send
    where
        F: Fn(Connection) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
        S: Future<Output = ()> + Send,
    {
        async move {
            tokio::select! {
                result = self.run(handler) => result,
                _ = shutdown => {
                    info!("shutdown signal received");
                    Ok(())
                }
            }
        }
    }
}
