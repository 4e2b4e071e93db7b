//! codervpn CLI entry point.

use std::process::ExitCode;

use clap::Parser;

use codervpn_client::cli::{Cli, Command, ConfigAction};
use codervpn_client::commands;
use codervpn_client::config::ClientConfig;
use codervpn_client::error::{ClientError, ClientResult};
use codervpn_core::{TracingConfig, init_tracing};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let tracing_config = match (&cli.command, cli.debug) {
        (_, true) => TracingConfig::cli_debug(),
        (Command::Serve, false) => TracingConfig::daemon(),
        _ => TracingConfig::cli(),
    };
    if let Err(e) = init_tracing(tracing_config) {
        eprintln!("warning: failed to initialize logging: {}", e);
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> ClientResult<()> {
    let config = match cli.config {
        Some(ref path) => ClientConfig::load_from(path).map_err(ClientError::Config)?,
        None => ClientConfig::load().map_err(ClientError::Config)?,
    };

    match cli.command {
        Command::Start { ref url, ref token } => {
            commands::vpn::start(&cli, &config, url.as_deref(), token.as_deref()).await
        }
        Command::Stop => commands::vpn::stop(&cli, &config).await,
        Command::Status => commands::vpn::status(&cli, &config).await,
        Command::Console => commands::vpn::console(&cli, &config).await,
        Command::Serve => commands::serve::run(&cli, &config).await,
        Command::Config { ref action } => match action {
            ConfigAction::Dump => commands::config::dump(&config),
            ConfigAction::Validate => commands::config::validate(&config),
            ConfigAction::Path => commands::config::path(),
        },
    }
}
