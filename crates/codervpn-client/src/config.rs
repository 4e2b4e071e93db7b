//! Client configuration.
//!
//! All settings live in a single `config.toml` file at
//! `~/.config/codervpn/config.toml` by default:
//!
//! ```toml
//! [connection]
//! socket_path = "/run/coder-desktop/vpn.sock"
//! timeout = 5
//!
//! [credentials]
//! coder_url = "https://coder.example.com"
//! api_token = "env::CODER_SESSION_TOKEN"
//! ```
//!
//! `api_token` supports secret references, see [`crate::secret`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the codervpn client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Where and how to reach the service.
    pub connection: ConnectionSettings,

    /// Deployment to connect the tunnel to.
    pub credentials: CredentialSettings,
}

/// Connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Path to the service socket (Unix).
    pub socket_path: Option<PathBuf>,

    /// Name of the service pipe (Windows).
    pub pipe_name: Option<String>,

    /// Connect and handshake timeout in seconds.
    pub timeout: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            socket_path: None,
            pipe_name: None,
            timeout: 5,
        }
    }
}

impl ConnectionSettings {
    /// Returns the timeout as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

/// Deployment credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialSettings {
    /// Control-plane URL.
    pub coder_url: Option<String>,

    /// Session token (supports `pass::` and `env::` prefixes).
    pub api_token: Option<String>,
}

impl CredentialSettings {
    /// Returns the URL and resolved token, preferring the overrides.
    ///
    /// The URL must parse; the token may be a secret reference.
    pub fn resolve(
        &self,
        url_override: Option<&str>,
        token_override: Option<&str>,
    ) -> Result<(url::Url, String), String> {
        let raw_url = url_override
            .or(self.coder_url.as_deref())
            .ok_or_else(|| {
                format!(
                    "no deployment URL. Pass --url or add to {}:\n  \
                     [credentials]\n  \
                     coder_url = \"https://coder.example.com\"",
                    ClientConfig::default_path().display()
                )
            })?;
        let url = url::Url::parse(raw_url)
            .map_err(|e| format!("invalid coder_url {:?}: {}", raw_url, e))?;

        let raw_token = token_override
            .or(self.api_token.as_deref())
            .ok_or_else(|| "no API token. Pass --token or set [credentials] api_token".to_string())?;
        let token = crate::secret::resolve(raw_token)
            .map_err(|e| format!("failed to resolve api_token: {}", e))?;
        if token.is_empty() {
            return Err("api_token is empty".to_string());
        }

        Ok((url, token))
    }
}

impl ClientConfig {
    /// Loads configuration from the default path.
    pub fn load() -> Result<Self, String> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Loads configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, String> {
        let content =
            std::fs::read_to_string(path).map_err(|e| format!("failed to read config: {}", e))?;
        toml::from_str(&content).map_err(|e| format!("failed to parse config: {}", e))
    }

    /// Returns the default configuration file path.
    pub fn default_path() -> PathBuf {
        Self::default_config_dir().join("config.toml")
    }

    /// Returns the default configuration directory.
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("codervpn")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config: ClientConfig = toml::from_str("").unwrap();
        assert!(config.connection.socket_path.is_none());
        assert_eq!(config.connection.timeout(), Duration::from_secs(5));
        assert!(config.credentials.coder_url.is_none());
    }

    #[test]
    fn parse_full_file() {
        let content = r#"
[connection]
socket_path = "/tmp/vpn.sock"
pipe_name = '\\.\pipe\Test'
timeout = 10

[credentials]
coder_url = "https://coder.example.com"
api_token = "plain-token"
"#;
        let config: ClientConfig = toml::from_str(content).unwrap();
        assert_eq!(
            config.connection.socket_path,
            Some(PathBuf::from("/tmp/vpn.sock"))
        );
        assert_eq!(config.connection.pipe_name.as_deref(), Some(r"\\.\pipe\Test"));
        assert_eq!(config.connection.timeout, 10);

        let (url, token) = config.credentials.resolve(None, None).unwrap();
        assert_eq!(url.as_str(), "https://coder.example.com/");
        assert_eq!(token, "plain-token");
    }

    #[test]
    fn overrides_win() {
        let credentials = CredentialSettings {
            coder_url: Some("https://old.example.com".to_string()),
            api_token: Some("old".to_string()),
        };
        let (url, token) = credentials
            .resolve(Some("https://new.example.com"), Some("new"))
            .unwrap();
        assert_eq!(url.host_str(), Some("new.example.com"));
        assert_eq!(token, "new");
    }

    #[test]
    fn token_env_reference() {
        unsafe {
            std::env::set_var("_CODERVPN_CONFIG_TEST_TOKEN", "env-token");
        }
        let credentials = CredentialSettings {
            coder_url: Some("https://coder.example.com".to_string()),
            api_token: Some("env::_CODERVPN_CONFIG_TEST_TOKEN".to_string()),
        };
        let (_, token) = credentials.resolve(None, None).unwrap();
        assert_eq!(token, "env-token");
        unsafe {
            std::env::remove_var("_CODERVPN_CONFIG_TEST_TOKEN");
        }
    }

    #[test]
    fn missing_or_bad_credentials() {
        let empty = CredentialSettings::default();
        assert!(empty.resolve(None, None).unwrap_err().contains("no deployment URL"));

        let bad_url = CredentialSettings {
            coder_url: Some("not a url".to_string()),
            api_token: Some("t".to_string()),
        };
        assert!(bad_url.resolve(None, None).unwrap_err().contains("invalid coder_url"));

        let no_token = CredentialSettings {
            coder_url: Some("https://coder.example.com".to_string()),
            api_token: None,
        };
        assert!(no_token.resolve(None, None).unwrap_err().contains("no API token"));
    }

    #[test]
    fn load_from_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = ClientConfig::default();
        config.connection.socket_path = Some(PathBuf::from("/tmp/x.sock"));
        config.credentials.coder_url = Some("https://coder.example.com".to_string());
        std::fs::write(&path, toml::to_string_pretty(&config).unwrap()).unwrap();

        let loaded = ClientConfig::load_from(&path).unwrap();
        assert_eq!(loaded.connection.socket_path, config.connection.socket_path);
        assert_eq!(loaded.credentials.coder_url, config.credentials.coder_url);

        assert!(ClientConfig::load_from(&dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn default_path_is_namespaced() {
        let path = ClientConfig::default_path();
        assert!(path.ends_with("codervpn/config.toml"));
    }
}
