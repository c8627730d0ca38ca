//! calsync CLI entry point.

use std::process::ExitCode;

use calsync_core::{TracingConfig, init_tracing};
use clap::Parser;

use calsync_client::cli::{Cli, Command};
use calsync_client::commands;
use calsync_client::config::ClientConfig;
use calsync_client::error::ClientResult;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let tracing = if cli.debug {
        TracingConfig::cli_debug()
    } else if matches!(cli.command, Command::Watch { .. }) {
        TracingConfig::poller()
    } else {
        TracingConfig::default()
    };
    if let Err(e) = init_tracing(tracing) {
        eprintln!("warning: {e}");
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> ClientResult<()> {
    let config = match cli.config {
        Some(ref path) => ClientConfig::load_from(path)?,
        None => ClientConfig::load()?,
    };

    match cli.command {
        Command::Auth { provider, force } => commands::auth::run(&config, provider, force).await,
        Command::Events { hours, json } => commands::events::run(&config, hours, json).await,
        Command::Calendars { provider, select } => {
            commands::calendars::run(&config, provider, select).await
        }
        Command::Link {
            event_id,
            notes_id,
            provider,
        } => commands::link::link(&config, &event_id, &notes_id, provider).await,
        Command::Lookup(ref args) => commands::link::lookup(&config, args).await,
        Command::Watch { interval } => commands::watch::run(&config, interval).await,
        Command::Logout { provider } => commands::logout::run(&config, provider).await,
    }
}
