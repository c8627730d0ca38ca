//! The `calsync` command-line client.
//!
//! Wires the engine from `calsync-providers` to a TOML configuration and a
//! file-backed store, and exposes it as subcommands.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod poller;
pub mod secret;

pub use cli::Cli;
pub use config::ClientConfig;
pub use error::{ClientError, ClientResult};
pub use poller::{Poller, PollerConfig};
