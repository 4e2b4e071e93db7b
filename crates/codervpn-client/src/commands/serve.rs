//! Serve command: runs the loopback service in the foreground.
//!
//! Wires together:
//! - the platform listener (Unix socket or named pipe)
//! - the signal handler (SIGTERM/SIGINT, Ctrl-C on Windows)
//! - a [`ServiceHost`] answering requests with a [`LoopbackService`]

use std::sync::Arc;

use tracing::info;

use codervpn_server::{LoopbackService, ServerConfig, ServiceHost, SignalHandler};

use crate::cli::Cli;
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::transport::Endpoint;

/// Serves until a shutdown signal arrives.
pub async fn run(cli: &Cli, config: &ClientConfig) -> ClientResult<()> {
    let server_config = server_config(cli, config);

    let signals = SignalHandler::new();
    signals.spawn_listener()?;

    let host = Arc::new(ServiceHost::new(
        LoopbackService::new(),
        server_config.speaker_config(),
    ));

    listen(&host, server_config, &signals).await?;

    info!("loopback service stopped");
    Ok(())
}

type LoopbackHost = Arc<ServiceHost<LoopbackService>>;

#[cfg(unix)]
async fn listen(
    host: &LoopbackHost,
    server_config: ServerConfig,
    signals: &SignalHandler,
) -> ClientResult<()> {
    let listener = codervpn_server::SocketServer::new(server_config)
        .await
        .map_err(|e| ClientError::Config(format!("failed to start socket server: {}", e)))?;
    info!(path = %listener.socket_path().display(), "loopback service listening");
    Arc::clone(host)
        .serve(&listener, signals.shutdown())
        .await
        .map_err(|e| ClientError::Connection(format!("server error: {}", e)))
}

#[cfg(windows)]
async fn listen(
    host: &LoopbackHost,
    server_config: ServerConfig,
    signals: &SignalHandler,
) -> ClientResult<()> {
    let listener = codervpn_server::PipeServer::new(server_config)
        .map_err(|e| ClientError::Config(format!("failed to start pipe server: {}", e)))?;
    info!(pipe = listener.pipe_name(), "loopback service listening");
    Arc::clone(host)
        .serve(&listener, signals.shutdown())
        .await
        .map_err(|e| ClientError::Connection(format!("server error: {}", e)))
}

#[cfg(not(any(unix, windows)))]
async fn listen(
    _host: &LoopbackHost,
    _server_config: ServerConfig,
    _signals: &SignalHandler,
) -> ClientResult<()> {
    Err(ClientError::Config(
        "no IPC transport on this platform".to_string(),
    ))
}

/// Builds the listener settings from flags and the config file.
fn server_config(cli: &Cli, config: &ClientConfig) -> ServerConfig {
    let mut server_config = ServerConfig::default().with_handshake_timeout(cli.timeout(config));
    match cli.endpoint(config) {
        Endpoint::UnixSocket(path) => server_config.socket_path = path,
        Endpoint::NamedPipe(name) => server_config = server_config.with_pipe_name(name),
    }
    server_config
}
