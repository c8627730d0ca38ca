//! Command-line interface definition.

use std::path::PathBuf;

use calsync_core::ProviderKind;
use clap::{Args, Parser, Subcommand};

/// calsync - your calendars, merged, with notes attached
#[derive(Debug, Parser)]
#[command(name = "calsync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, short, env = "CALSYNC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, short = 'v')]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Connect a calendar account through the browser
    Auth {
        /// google or microsoft
        provider: ProviderKind,

        /// Reconnect even if a token is already stored
        #[arg(long, short)]
        force: bool,
    },

    /// List upcoming meetings from every connected account
    Events {
        /// How many hours ahead to look
        #[arg(long)]
        hours: Option<i64>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List a provider's calendars, or choose which ones to fetch
    Calendars {
        provider: ProviderKind,

        /// Calendar ids to fetch from now on (empty selection means primary)
        #[arg(long, num_args = 0.., value_delimiter = ',')]
        select: Option<Vec<String>>,
    },

    /// Link a calendar event to a notes document
    Link {
        event_id: String,
        notes_id: String,

        /// Provider the event belongs to
        #[arg(long, short)]
        provider: ProviderKind,
    },

    /// Find the notes for an event, or the event for a notes document
    Lookup(LookupArgs),

    /// Poll every connected calendar until interrupted
    Watch {
        /// Seconds between polls
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Forget the stored token for a provider
    Logout { provider: ProviderKind },
}

#[derive(Debug, Args)]
#[group(required = true, multiple = false)]
pub struct LookupArgs {
    /// Calendar event id
    #[arg(long)]
    pub event: Option<String>,

    /// Notes document id
    #[arg(long)]
    pub notes: Option<String>,
}
