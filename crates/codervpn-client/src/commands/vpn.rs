//! One-shot requests to the service.

use codervpn_protocol::StartRequest;

use crate::cli::Cli;
use crate::config::ClientConfig;
use crate::console::{format_status, run_console};
use crate::error::{ClientError, ClientResult};
use crate::session::VpnClient;

async fn connect(cli: &Cli, config: &ClientConfig) -> ClientResult<VpnClient> {
    VpnClient::connect(&cli.endpoint(config), cli.timeout(config)).await
}

/// Brings the tunnel up with credentials from flags or the config file.
pub async fn start(
    cli: &Cli,
    config: &ClientConfig,
    url: Option<&str>,
    token: Option<&str>,
) -> ClientResult<()> {
    let (url, token) = config
        .credentials
        .resolve(url, token)
        .map_err(ClientError::Config)?;

    let client = connect(cli, config).await?;
    let result = client.start(StartRequest::new(url.as_str(), token)).await;
    client.close().await;
    result?;

    println!("Tunnel started.");
    Ok(())
}

/// Brings the tunnel down.
pub async fn stop(cli: &Cli, config: &ClientConfig) -> ClientResult<()> {
    let client = connect(cli, config).await?;
    let result = client.stop().await;
    client.close().await;
    result?;

    println!("Tunnel stopped.");
    Ok(())
}

/// Prints the service status.
pub async fn status(cli: &Cli, config: &ClientConfig) -> ClientResult<()> {
    let client = connect(cli, config).await?;
    let result = client.status().await;
    client.close().await;

    println!("{}", format_status(&result?));
    Ok(())
}

/// Opens the interactive console.
pub async fn console(cli: &Cli, config: &ClientConfig) -> ClientResult<()> {
    let client = connect(cli, config).await?;
    run_console(client).await
}
