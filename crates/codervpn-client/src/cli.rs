//! Command-line interface definition.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::ClientConfig;
use crate::transport::Endpoint;

/// codervpn - talk to the Coder VPN service over its local IPC channel
#[derive(Debug, Parser)]
#[command(name = "codervpn")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, short, env = "CODERVPN_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, short = 'v', global = true)]
    pub debug: bool,

    /// Path to the service socket (Unix)
    #[arg(long, env = "CODERVPN_SOCKET", global = true)]
    pub socket_path: Option<PathBuf>,

    /// Name of the service pipe (Windows)
    #[arg(long, env = "CODERVPN_PIPE", global = true)]
    pub pipe_name: Option<String>,

    /// Connect, handshake and request timeout in seconds
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Returns the endpoint, preferring flags over the config file.
    pub fn endpoint(&self, config: &ClientConfig) -> Endpoint {
        Endpoint::select(
            self.socket_path
                .clone()
                .or_else(|| config.connection.socket_path.clone()),
            self.pipe_name
                .clone()
                .or_else(|| config.connection.pipe_name.clone()),
        )
    }

    /// Returns the timeout, preferring the flag over the config file.
    pub fn timeout(&self, config: &ClientConfig) -> std::time::Duration {
        self.timeout
            .map(std::time::Duration::from_secs)
            .unwrap_or_else(|| config.connection.timeout())
    }
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Ask the service to bring the tunnel up
    Start {
        /// Deployment URL (defaults to [credentials] coder_url)
        #[arg(long)]
        url: Option<String>,

        /// Session token, `env::VAR` or `pass::path` (defaults to [credentials] api_token)
        #[arg(long)]
        token: Option<String>,
    },

    /// Ask the service to bring the tunnel down
    Stop,

    /// Show the service status
    Status,

    /// Interactive console
    Console,

    /// Run the loopback service in the foreground
    Serve,

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Configuration actions.
#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Dump current configuration
    Dump,

    /// Validate configuration
    Validate,

    /// Show configuration file path
    Path,
}
