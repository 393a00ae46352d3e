//! Probe command implementation for the Ratikka CLI.

use std::io::Write;

use chrono::{DateTime, Utc};
use clap::Parser;
use log::info;
use ortho_config::{OrthoConfig, SubcmdConfigMerge};
use ratikka_updater::{
    AlertConvergence, Feature, FeedSource, PollingUpdater, PollingUpdaterConfig, WfsFeed,
};
use serde::{Deserialize, Serialize};

use crate::{
    ARG_PROBE_AT, ARG_PROBE_FEATURE_TYPE, ARG_PROBE_FEED_ID, ARG_PROBE_TIMEOUT, ARG_PROBE_URL,
    CliError, ENV_PROBE_URL,
};

/// CLI arguments for the `probe` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    long_about = "Configure and set up one feed updater, fetch a single \
                 snapshot and print the features that are active at the \
                 evaluation instant as JSON. Nothing is written to a graph.",
    about = "Probe a street-works WFS feed"
)]
#[ortho_config(prefix = "RATIKKA")]
pub(crate) struct ProbeArgs {
    /// WFS endpoint, e.g. "https://kartta.hel.fi/ws/geoserver/avoindata/wfs".
    #[arg(long = ARG_PROBE_URL, value_name = "url")]
    #[serde(default)]
    pub(crate) url: Option<String>,
    /// Feed identifier used in alert source tags.
    #[arg(long = ARG_PROBE_FEED_ID, value_name = "id")]
    #[serde(default)]
    pub(crate) feed_id: Option<String>,
    /// Feature type to request (defaults to "hkr:winkki_works").
    #[arg(long = ARG_PROBE_FEATURE_TYPE, value_name = "name")]
    #[serde(default)]
    pub(crate) feature_type: Option<String>,
    /// Per-request HTTP timeout in seconds.
    #[arg(long = ARG_PROBE_TIMEOUT, value_name = "secs")]
    #[serde(default)]
    pub(crate) timeout_secs: Option<u64>,
    /// Evaluate validity at this RFC 3339 instant instead of now.
    #[arg(long = ARG_PROBE_AT, value_name = "timestamp")]
    #[serde(default)]
    pub(crate) at: Option<DateTime<Utc>>,
}

impl ProbeArgs {
    pub(crate) fn into_config(self) -> Result<ProbeConfig, CliError> {
        let merged = self.load_and_merge().map_err(CliError::Configuration)?;
        ProbeConfig::try_from(merged)
    }
}

/// Resolved `probe` command configuration.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ProbeConfig {
    /// Updater options for the probed feed.
    pub(crate) updater: PollingUpdaterConfig,
    /// Evaluation instant; `None` means the time of the fetch.
    pub(crate) at: Option<DateTime<Utc>>,
}

impl TryFrom<ProbeArgs> for ProbeConfig {
    type Error = CliError;

    fn try_from(args: ProbeArgs) -> Result<Self, Self::Error> {
        let url = args.url.ok_or(CliError::MissingArgument {
            field: ARG_PROBE_URL,
            env: ENV_PROBE_URL,
        })?;
        let mut updater = PollingUpdaterConfig::new(url);
        if let Some(feed_id) = args.feed_id {
            updater.feed_id = feed_id;
        }
        if let Some(feature_type) = args.feature_type {
            updater.feature_type = feature_type;
        }
        if let Some(timeout_secs) = args.timeout_secs {
            updater.request_timeout_secs = timeout_secs;
        }
        Ok(Self {
            updater,
            at: args.at,
        })
    }
}

/// One feature that would raise an alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct ProbeAlert {
    pub(crate) external_id: String,
    pub(crate) header: String,
    pub(crate) valid_from: Option<DateTime<Utc>>,
    pub(crate) valid_until: Option<DateTime<Utc>>,
}

/// Output of the `probe` command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct ProbeReport {
    pub(crate) feed_id: String,
    pub(crate) evaluated_at: DateTime<Utc>,
    pub(crate) fetched: usize,
    pub(crate) active: Vec<ProbeAlert>,
}

impl ProbeReport {
    fn new(convergence: &AlertConvergence, features: &[Feature], at: DateTime<Utc>) -> Self {
        let active = features
            .iter()
            .map(|feature| convergence.candidate_alert(feature))
            .filter(|alert| alert.is_active_at(at))
            .map(|alert| ProbeAlert {
                external_id: alert.source.external_id,
                header: alert.header,
                valid_from: alert.validity.start,
                valid_until: alert.validity.end,
            })
            .collect();
        Self {
            feed_id: convergence.feed_id().to_owned(),
            evaluated_at: at,
            fetched: features.len(),
            active,
        }
    }
}

/// Builds the feed probed by the current invocation.
pub(crate) trait ProbeFeedBuilder {
    type Feed: FeedSource;

    fn build(&self) -> Self::Feed;
}

pub(crate) struct DefaultProbeFeedBuilder;

impl ProbeFeedBuilder for DefaultProbeFeedBuilder {
    type Feed = WfsFeed;

    fn build(&self) -> Self::Feed {
        WfsFeed::new()
    }
}

pub(crate) fn run_probe(args: ProbeArgs) -> Result<(), CliError> {
    let mut stdout = std::io::stdout().lock();
    run_probe_with(args, &DefaultProbeFeedBuilder, &mut stdout)
}

pub(crate) fn run_probe_with<B: ProbeFeedBuilder>(
    args: ProbeArgs,
    builder: &B,
    writer: &mut dyn Write,
) -> Result<(), CliError> {
    let config = args.into_config()?;
    let report = execute_probe(config, builder.build())?;
    write_probe_report(writer, &report)
}

pub(crate) fn execute_probe<F: FeedSource>(
    config: ProbeConfig,
    feed: F,
) -> Result<ProbeReport, CliError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(CliError::Runtime)?;
    runtime.block_on(probe(config, feed))
}

async fn probe<F: FeedSource>(config: ProbeConfig, feed: F) -> Result<ProbeReport, CliError> {
    let convergence = AlertConvergence::from_config(&config.updater);
    let url = config.updater.url.clone();
    let mut updater = PollingUpdater::new(feed);
    updater.configure(config.updater)?;
    updater.setup().await?;
    let fetched = updater.feed().fetch().await;
    updater.teardown().await;
    let features = fetched.map_err(|source| CliError::Fetch { url, source })?;
    let at = config.at.unwrap_or_else(Utc::now);
    let report = ProbeReport::new(&convergence, &features, at);
    info!(
        "{} of {} features active at {at}",
        report.active.len(),
        report.fetched
    );
    Ok(report)
}

fn write_probe_report(writer: &mut dyn Write, report: &ProbeReport) -> Result<(), CliError> {
    let payload = serde_json::to_string_pretty(report).map_err(CliError::SerializeReport)?;
    writer
        .write_all(payload.as_bytes())
        .map_err(CliError::WriteReport)?;
    writer.write_all(b"\n").map_err(CliError::WriteReport)?;
    Ok(())
}

#[cfg(test)]
pub(crate) fn config_from_layers_for_test(
    layers: Vec<ortho_config::MergeLayer<'static>>,
) -> Result<ProbeConfig, CliError> {
    let merged = ProbeArgs::merge_from_layers(layers).map_err(CliError::from)?;
    ProbeConfig::try_from(merged)
}
