//! Subcommand implementations.

pub mod config;
pub mod serve;
pub mod vpn;
