//! fixonce-relay: error relay between instrumented pages and the FixOnce memory service
//!
//! This is the main entry point for the fixonce-relay binary. It handles CLI
//! argument parsing, configuration loading, telemetry initialization, and
//! dispatches to the selected command.
//!
//! # I/O Architecture
//!
//! - **Audit logging**: Goes to syslog, falling back to a null logger when
//!   syslog is unavailable
//! - **Debug logging**: stderr, filtered by `-v`, `RUST_LOG`, or the
//!   configured `log_level`
//! - **Command output**: stdout, for the one-shot commands only

use anyhow::{Context, Result};
use clap::Parser;
use fixonce_relay::{
    cli::Cli,
    cli_handler,
    config::ConfigLoader,
    telemetry::{self, AuditLogger},
};
use tracing::{debug, warn};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Config comes first so its log_level can seed the filter.
    let config = ConfigLoader::new()
        .load(&cli)
        .context("Failed to load configuration")?;

    init_tracing(cli.verbose, &config.general.log_level)?;

    debug!("Parsed CLI arguments: {:?}", cli);
    debug!("Loaded configuration: {:?}", config);

    // Syslog is optional for a developer tool
    if let Err(e) = telemetry::init_logger() {
        warn!("Audit logging disabled: {}", e);
        telemetry::install(AuditLogger::new_null())
            .context("Failed to initialize telemetry")?;
    }

    cli_handler::handle_command(&cli, &config)
}

/// Initialize the tracing subscriber for debug/development logging.
///
/// This is separate from the audit telemetry which goes to syslog.
///
/// # Verbosity Levels
/// - 0 (default): `RUST_LOG`, else the configured level
/// - 1 (-v): Info level
/// - 2 (-vv): Debug level
/// - 3+ (-vvv): Trace level
fn init_tracing(verbose: u8, configured: &str) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(configured)),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    Ok(())
}
