//! Error types emitted by the Ratikka CLI.
//!
//! Keep this error type reasonably small, as many CLI helpers return
//! `Result<_, CliError>` and the workspace enables `clippy::result_large_err`.

use std::sync::Arc;

use ratikka_updater::{FeedError, UpdaterError};
use thiserror::Error;

/// Errors emitted by the Ratikka CLI.
#[derive(Debug, Error)]
pub enum CliError {
    /// Provided arguments failed Clap validation.
    #[error(transparent)]
    ArgumentParsing(#[from] clap::Error),
    /// Configuration layering failed (files, env, CLI).
    #[error("failed to load configuration: {0}")]
    Configuration(#[from] Arc<ortho_config::OrthoError>),
    /// A required option is missing after configuration merging.
    #[error("missing {field} (set --{field} or {env})")]
    MissingArgument {
        field: &'static str,
        env: &'static str,
    },
    /// The updater rejected its configuration or failed to set up.
    #[error(transparent)]
    Updater(#[from] UpdaterError),
    /// Fetching the feed snapshot failed.
    #[error("failed to fetch {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: FeedError,
    },
    /// Building the async runtime failed.
    #[error("failed to start async runtime: {0}")]
    Runtime(#[source] std::io::Error),
    /// Serializing the probe report failed.
    #[error("failed to serialize probe report: {0}")]
    SerializeReport(#[source] serde_json::Error),
    /// Writing the probe report failed.
    #[error("failed to write probe report: {0}")]
    WriteReport(#[source] std::io::Error),
}
