//! Real-time alert updaters for the Ratikka engine.
//!
//! Responsibilities:
//! - Fetch tagged geometric features from external feeds (WFS/GeoJSON).
//! - Turn each snapshot into one convergence task for the graph writer.
//! - Drive every feed through its polling lifecycle on a tokio interval.
//!
//! Boundaries:
//! - Never mutate the graph directly; every edit goes through the
//!   [`UpdateManager`](ratikka_core::UpdateManager) queue.
//! - Keep network I/O on the async runtime, never on the writer thread.
//!
//! Invariants:
//! - One updater per feed; feeds share nothing but the writer queue.
//! - A failed fetch never removes alerts that are already applied.

#![forbid(unsafe_code)]

mod config;
mod convergence;
mod feed;
mod polling;

pub use config::{
    AttributeMapping, ConfigError, DEFAULT_FEATURE_TYPE, DEFAULT_FEED_ID,
    DEFAULT_FREQUENCY_SECS, DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_SEARCH_RADIUS_M,
    PollingUpdaterConfig,
};
pub use convergence::{AlertConvergence, AssociationKey, AssociationSet, ConvergenceReport};
pub use feed::{
    DEFAULT_USER_AGENT, Feature, FeedError, FeedSource, WfsFeed, decode_feature_collection,
    parse_timestamp,
};
pub use polling::{PollOutcome, PollingHandle, PollingUpdater, UpdaterError, UpdaterState};

pub mod test_support;
