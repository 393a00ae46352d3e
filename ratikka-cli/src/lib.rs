//! Command-line interface for Ratikka's real-time feed tooling.
#![forbid(unsafe_code)]

use clap::{Parser, Subcommand};

mod error;
mod probe;

pub use error::CliError;
use probe::ProbeArgs;

pub(crate) const ARG_PROBE_URL: &str = "url";
pub(crate) const ARG_PROBE_FEED_ID: &str = "feed-id";
pub(crate) const ARG_PROBE_FEATURE_TYPE: &str = "feature-type";
pub(crate) const ARG_PROBE_TIMEOUT: &str = "timeout-secs";
pub(crate) const ARG_PROBE_AT: &str = "at";
pub(crate) const ENV_PROBE_URL: &str = "RATIKKA_CMDS_PROBE_URL";

/// Run the Ratikka CLI with the current process arguments and environment.
pub fn run() -> Result<(), CliError> {
    let cli = Cli::try_parse().map_err(CliError::ArgumentParsing)?;
    match cli.command {
        Command::Probe(args) => probe::run_probe(args),
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "ratikka",
    about = "Real-time feed utilities for the Ratikka trip planner",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fetch one snapshot from a WFS feed and list the alerts it would raise.
    Probe(ProbeArgs),
}

#[cfg(test)]
mod tests;
