//! Configuration commands.

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};

/// Dump the current configuration to stdout.
pub fn dump(config: &ClientConfig) -> ClientResult<()> {
    let toml_str = toml::to_string_pretty(config)
        .map_err(|e| ClientError::Config(format!("failed to serialize config: {}", e)))?;
    println!("# config.toml ({})", ClientConfig::default_path().display());
    println!("{}", toml_str);

    Ok(())
}

/// Validate the configuration.
///
/// Credentials are optional, but when a URL is set it must parse and the
/// token reference must resolve.
pub fn validate(config: &ClientConfig) -> ClientResult<()> {
    if config.connection.timeout == 0 {
        return Err(ClientError::Config(
            "[connection] timeout must be at least 1 second".to_string(),
        ));
    }

    if config.credentials.coder_url.is_some() || config.credentials.api_token.is_some() {
        config
            .credentials
            .resolve(None, None)
            .map_err(|e| ClientError::Config(format!("invalid credentials: {}", e)))?;
        println!("Credentials are valid.");
    }

    println!("Configuration is valid.");
    Ok(())
}

/// Show the configuration file path.
pub fn path() -> ClientResult<()> {
    let config_path = ClientConfig::default_path();
    println!("config: {}", config_path.display());
    Ok(())
}
