//! Secret references in configuration values.
//!
//! The API token in `config.toml` (or on the command line) does not have to
//! be written out in plain text:
//!
//! - `pass::path/in/store` runs `pass show path/in/store` and uses the first line
//! - `env::VAR_NAME` reads `$VAR_NAME`
//! - anything else is used as-is

use std::process::Command;

/// Where a configured value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretRef<'a> {
    /// Entry in the `pass` password store.
    Pass(&'a str),
    /// Environment variable.
    Env(&'a str),
    /// The value itself.
    Plain(&'a str),
}

impl<'a> SecretRef<'a> {
    /// Classifies a configured value by its prefix.
    pub fn parse(value: &'a str) -> Self {
        if let Some(path) = value.strip_prefix("pass::") {
            Self::Pass(path)
        } else if let Some(var) = value.strip_prefix("env::") {
            Self::Env(var)
        } else {
            Self::Plain(value)
        }
    }

    /// Produces the secret.
    pub fn resolve(self) -> Result<String, String> {
        match self {
            Self::Pass(path) => from_pass(path),
            Self::Env(var) => {
                std::env::var(var).map_err(|_| format!("environment variable `{}` is not set", var))
            }
            Self::Plain(value) => Ok(value.to_string()),
        }
    }
}

/// Resolves a value that may be a secret reference.
pub fn resolve(value: &str) -> Result<String, String> {
    SecretRef::parse(value).resolve()
}

fn from_pass(path: &str) -> Result<String, String> {
    let output = Command::new("pass")
        .arg("show")
        .arg(path)
        .output()
        .map_err(|e| format!("failed to run `pass show {}`: {}", path, e))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!(
            "`pass show {}` failed ({}): {}",
            path,
            output.status,
            stderr.trim()
        ));
    }

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .map(str::to_string)
        .ok_or_else(|| format!("`pass show {}` produced no output", path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_prefixes() {
        assert_eq!(SecretRef::parse("pass::coder/token"), SecretRef::Pass("coder/token"));
        assert_eq!(SecretRef::parse("env::CODER_TOKEN"), SecretRef::Env("CODER_TOKEN"));
        assert_eq!(SecretRef::parse("abc-123"), SecretRef::Plain("abc-123"));
        // Only a leading prefix counts.
        assert_eq!(
            SecretRef::parse("token-env::X"),
            SecretRef::Plain("token-env::X")
        );
    }

    #[test]
    fn plain_text_passthrough() {
        assert_eq!(resolve("session-token").unwrap(), "session-token");
        assert_eq!(resolve("").unwrap(), "");
    }

    #[test]
    fn env_prefix_resolves() {
        unsafe {
            std::env::set_var("_CODERVPN_TEST_SECRET", "from-env");
        }
        assert_eq!(resolve("env::_CODERVPN_TEST_SECRET").unwrap(), "from-env");
        unsafe {
            std::env::remove_var("_CODERVPN_TEST_SECRET");
        }
    }

    #[test]
    fn env_prefix_missing_var_errors() {
        let result = resolve("env::_CODERVPN_NONEXISTENT_VAR_12345");
        assert!(result.unwrap_err().contains("not set"));
    }

    #[test]
    fn pass_prefix_missing_entry_errors() {
        // Fails whether or not `pass` is installed.
        assert!(resolve("pass::codervpn/nonexistent/entry/12345").is_err());
    }
}
