//! External feeds of tagged geometric features.
//!
//! A [`FeedSource`] is driven through a fixed lifecycle by the
//! [`PollingUpdater`](crate::PollingUpdater): `configure` once, `setup` once,
//! `fetch` every cycle, `teardown` at shutdown. [`WfsFeed`] is the shipped
//! implementation.

mod geojson;
mod wfs;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use geo::Geometry;
use serde_json::Value;
use thiserror::Error;

use crate::PollingUpdaterConfig;

pub use geojson::{decode_feature_collection, parse_timestamp};
pub use wfs::{DEFAULT_USER_AGENT, WfsFeed};

/// One feature from a feed snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    /// Stable identifier within the feed.
    pub external_id: String,
    /// Feature geometry in WGS84.
    pub geometry: Geometry<f64>,
    /// Every attribute the feed sent, keyed by name.
    pub attributes: BTreeMap<String, Value>,
    /// Start of validity, if the feed gave one.
    pub valid_from: Option<DateTime<Utc>>,
    /// End of validity, if the feed gave one.
    pub valid_until: Option<DateTime<Utc>>,
}

impl Feature {
    /// Feature without attributes or validity bounds.
    pub fn new(external_id: impl Into<String>, geometry: Geometry<f64>) -> Self {
        Self {
            external_id: external_id.into(),
            geometry,
            attributes: BTreeMap::new(),
            valid_from: None,
            valid_until: None,
        }
    }

    /// Add an attribute.
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Set the validity bounds.
    #[must_use]
    pub const fn with_validity(
        mut self,
        valid_from: Option<DateTime<Utc>>,
        valid_until: Option<DateTime<Utc>>,
    ) -> Self {
        self.valid_from = valid_from;
        self.valid_until = valid_until;
        self
    }

    /// Attribute rendered as plain text; strings are returned unquoted.
    pub fn attribute_text(&self, name: &str) -> Option<String> {
        self.attributes.get(name).and_then(value_text)
    }
}

/// Plain-text rendering of a JSON attribute value; `null` has none.
pub(crate) fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

/// Errors raised by feed sources.
///
/// Errors returned from `fetch` are transient: the polling updater logs
/// them and skips the cycle. Errors from `configure` and `setup` disable the
/// updater.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    /// The request could not be sent or the connection failed.
    #[error("network error contacting {url}: {message}")]
    Network {
        /// Requested URL.
        url: String,
        /// Transport error text.
        message: String,
    },
    /// The request exceeded its timeout.
    #[error("request to {url} timed out after {timeout_secs}s")]
    Timeout {
        /// Requested URL.
        url: String,
        /// Configured timeout.
        timeout_secs: u64,
    },
    /// The server answered with an error status.
    #[error("{url} answered with HTTP {status}")]
    Http {
        /// Requested URL.
        url: String,
        /// Status code.
        status: u16,
    },
    /// The response body could not be decoded.
    #[error("failed to decode feed response: {message}")]
    Parse {
        /// Decoder error text.
        message: String,
    },
    /// The service does not advertise the configured feature type.
    #[error("feature type {feature_type:?} is not offered by {url}")]
    UnknownFeatureType {
        /// Configured feature type.
        feature_type: String,
        /// Service endpoint.
        url: String,
    },
    /// The feed was used before `configure`.
    #[error("feed has not been configured")]
    NotConfigured,
    /// The feed could not build its client.
    #[error("failed to initialise feed client: {message}")]
    Client {
        /// Builder error text.
        message: String,
    },
}

/// Capability interface for one kind of external feed.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Take the updater's validated configuration.
    ///
    /// # Errors
    /// Fails when the feed cannot be configured from `config`.
    fn configure(&mut self, config: &PollingUpdaterConfig) -> Result<(), FeedError>;

    /// Open the feed and probe its capabilities once.
    ///
    /// # Errors
    /// Any error is fatal to the updater.
    async fn setup(&mut self) -> Result<(), FeedError>;

    /// Fetch the current snapshot.
    ///
    /// # Errors
    /// Errors are treated as transient.
    async fn fetch(&self) -> Result<Vec<Feature>, FeedError>;

    /// Release feed resources.
    async fn teardown(&mut self) {}
}
