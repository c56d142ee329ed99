//! Command-line front ends
//!
//! This module is only available when the "cli" feature is enabled.

pub mod bridge;
mod config;
pub mod host;

pub use bridge::{BridgeCli, Runtime};
pub use host::{CliCardinality, CliMode, HostCli};
