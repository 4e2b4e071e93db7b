//! The handshake header line.
//!
//! ```text
//! codervpn <role> <major.minor>[,<major.minor>...]\n
//! ```

use std::fmt;
use std::str::FromStr;

use crate::error::FormatError;
use crate::role::Role;
use crate::version::RpcVersionList;

/// Literal first token of every header.
pub const HEADER_PREAMBLE: &str = "codervpn";

/// Longest header line accepted from a peer, newline included.
pub const MAX_HEADER_LEN: usize = 256;

/// What one peer announces about itself when a connection opens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    role: Role,
    versions: RpcVersionList,
}

impl Header {
    /// Creates a header.
    pub fn new(role: Role, versions: RpcVersionList) -> Self {
        Self { role, versions }
    }

    /// Returns the announced role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Returns the announced versions.
    pub fn versions(&self) -> &RpcVersionList {
        &self.versions
    }

    /// Parses a header line. A single trailing `\n` is accepted.
    pub fn parse(line: &str) -> Result<Self, FormatError> {
        let line = line.strip_suffix('\n').unwrap_or(line);

        let tokens: Vec<&str> = line.split(' ').collect();
        let [preamble, role, versions] = tokens[..] else {
            return Err(FormatError::HeaderTokenCount {
                count: tokens.len(),
            });
        };

        if preamble != HEADER_PREAMBLE {
            return Err(FormatError::HeaderPreamble {
                found: preamble.to_string(),
                expected: HEADER_PREAMBLE,
            });
        }

        let role: Role = role.parse()?;
        let versions = RpcVersionList::parse(versions)?;

        Ok(Self { role, versions })
    }

    /// Parses a header from raw bytes read off the wire.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FormatError> {
        let line = std::str::from_utf8(bytes).map_err(|_| FormatError::HeaderEncoding)?;
        Self::parse(line)
    }

    /// Returns the line to put on the wire, newline included.
    pub fn to_line(&self) -> String {
        format!("{self}\n")
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", HEADER_PREAMBLE, self.role, self.versions)
    }
}

impl FromStr for Header {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
