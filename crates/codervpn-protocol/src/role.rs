//! Participant roles.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::FormatError;

/// The identity a process takes on one connection.
///
/// Roles come in fixed pairs: a manager talks to a tunnel, a client talks
/// to a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Controls a tunnel process.
    Manager,
    /// The tunnel process itself.
    Tunnel,
    /// The privileged background service.
    Service,
    /// An unprivileged client of the service (GUI, debug console).
    Client,
}

impl Role {
    /// All roles, in wire order.
    pub const ALL: [Role; 4] = [Role::Manager, Role::Tunnel, Role::Service, Role::Client];

    /// Returns the only role this role may talk to.
    pub fn peer(self) -> Role {
        match self {
            Role::Manager => Role::Tunnel,
            Role::Tunnel => Role::Manager,
            Role::Service => Role::Client,
            Role::Client => Role::Service,
        }
    }

    /// Returns the wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Manager => "manager",
            Role::Tunnel => "tunnel",
            Role::Service => "service",
            Role::Client => "client",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| FormatError::UnknownRole {
                role: s.to_string(),
            })
    }
}
