//! Command-line interface definitions for fixonce-relay.
//!
//! Uses clap's derive API for type-safe argument parsing.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Error relay for the FixOnce memory service.
///
/// fixonce-relay receives errors captured in monitored processes, filters
/// them by origin, and delivers them in batches to the local memory service.
#[derive(Parser, Debug)]
#[command(name = "fixonce-relay")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Commands,

    /// Path to additional config file.
    ///
    /// Merged on top of system and user configs, giving it the highest
    /// priority except for CLI flags.
    #[arg(short = 'c', long = "config", value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Memory service port to try (repeatable).
    ///
    /// When given, these replace the configured candidate ports.
    #[arg(short = 'p', long = "port", value_name = "PORT", global = true)]
    pub ports: Vec<u16>,

    /// Relay socket path.
    #[arg(long = "socket", value_name = "PATH", global = true)]
    pub socket: Option<PathBuf>,

    /// Admission state file.
    #[arg(long = "state", value_name = "PATH", global = true)]
    pub state: Option<PathBuf>,

    /// Increase log verbosity.
    ///
    /// Can be specified multiple times:
    /// -v    = info level
    /// -vv   = debug level
    /// -vvv  = trace level
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

/// Subcommands for fixonce-relay.
#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Run the relay daemon.
    ///
    /// Listens on the relay socket, admits records by origin and delivers
    /// them to the memory service until interrupted.
    Run,

    /// Show the admission decision for an origin.
    Check {
        /// Origin or URL, e.g. `http://localhost:3000` or `example.com`.
        origin: String,
    },

    /// Enable capture for an origin.
    Allow {
        /// Origin or URL.
        origin: String,

        /// Only until the next `run` starts.
        #[arg(long)]
        session: bool,
    },

    /// Disable capture for an origin.
    Disallow {
        /// Origin or URL.
        origin: String,
    },

    /// Print the whitelists.
    List,

    /// Look for the memory service and report its port.
    Ping,
}
