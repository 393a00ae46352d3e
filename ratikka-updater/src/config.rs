//! Polling updater configuration.
//!
//! The configuration is plain data that deserialises from any serde format.
//! [`PollingUpdaterConfig::validate`] runs once, when the updater moves from
//! `Created` to `Configured`; nothing is re-checked afterwards.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Feature type published by the Helsinki street-works WFS.
pub const DEFAULT_FEATURE_TYPE: &str = "hkr:winkki_works";

/// Default feed identifier used in alert source tags.
pub const DEFAULT_FEED_ID: &str = "winkki";

/// Default snapping tolerance between feed geometry and edges, in meters.
pub const DEFAULT_SEARCH_RADIUS_M: f64 = 30.0;

/// Default HTTP timeout per feed request.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default polling period.
pub const DEFAULT_FREQUENCY_SECS: i64 = 60;

/// Names of the feature attributes the updater reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttributeMapping {
    /// Attribute holding the feature's stable identifier.
    pub id: String,
    /// Attribute used as the alert header.
    pub header: String,
    /// Attribute holding the start of validity.
    pub valid_from: String,
    /// Attribute holding the end of validity.
    pub valid_until: String,
}

impl Default for AttributeMapping {
    fn default() -> Self {
        Self {
            id: "event_identifier".to_owned(),
            header: "licence_type".to_owned(),
            valid_from: "licence_startdate".to_owned(),
            valid_until: "licence_enddate".to_owned(),
        }
    }
}

/// Options for one polling updater.
///
/// # Examples
/// ```
/// use ratikka_updater::PollingUpdaterConfig;
///
/// let config: PollingUpdaterConfig = serde_json::from_str(
///     r#"{ "url": "https://kartta.hel.fi/ws/geoserver/avoindata/wfs", "frequency_secs": 300 }"#,
/// )?;
/// config.validate()?;
/// assert_eq!(config.feature_type, "hkr:winkki_works");
/// assert_eq!(config.period().as_secs(), 300);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollingUpdaterConfig {
    /// Identifier stamped on every alert this updater produces.
    #[serde(default = "default_feed_id")]
    pub feed_id: String,
    /// WFS endpoint.
    pub url: String,
    /// Feature type to request.
    #[serde(default = "default_feature_type")]
    pub feature_type: String,
    /// Seconds between poll starts. Must be positive.
    #[serde(default = "default_frequency_secs")]
    pub frequency_secs: i64,
    /// Snapping tolerance in meters.
    #[serde(default = "default_search_radius_m")]
    pub search_radius_m: f64,
    /// Attribute names to read from each feature.
    #[serde(default)]
    pub mapping: AttributeMapping,
    /// Per-request HTTP timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_feed_id() -> String {
    DEFAULT_FEED_ID.to_owned()
}

fn default_feature_type() -> String {
    DEFAULT_FEATURE_TYPE.to_owned()
}

const fn default_frequency_secs() -> i64 {
    DEFAULT_FREQUENCY_SECS
}

const fn default_search_radius_m() -> f64 {
    DEFAULT_SEARCH_RADIUS_M
}

const fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

/// Reasons a configuration is rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// The feed identifier is blank.
    #[error("feed id must not be empty")]
    EmptyFeedId,
    /// The feature type name is blank.
    #[error("feature type must not be empty")]
    EmptyFeatureType,
    /// The endpoint does not parse as a URL.
    #[error("invalid feed url {url:?}: {source}")]
    InvalidUrl {
        /// Rejected value.
        url: String,
        /// Parser error.
        #[source]
        source: url::ParseError,
    },
    /// The endpoint is not HTTP(S).
    #[error("feed url {url:?} must use http or https")]
    UnsupportedScheme {
        /// Rejected value.
        url: String,
    },
    /// Polling period of zero or less.
    #[error("polling period must be positive, got {0} seconds")]
    NonPositivePeriod(i64),
    /// Negative or non-finite radius.
    #[error("search radius must be a non-negative number of meters, got {0}")]
    InvalidRadius(f64),
    /// Request timeout of zero.
    #[error("request timeout must be positive")]
    ZeroTimeout,
    /// An attribute mapping entry is blank.
    #[error("attribute mapping for {role} must not be empty")]
    EmptyAttribute {
        /// Which mapping entry is blank.
        role: &'static str,
    },
}

impl PollingUpdaterConfig {
    /// Configuration for `url` with every other option at its default.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            feed_id: default_feed_id(),
            url: url.into(),
            feature_type: default_feature_type(),
            frequency_secs: DEFAULT_FREQUENCY_SECS,
            search_radius_m: DEFAULT_SEARCH_RADIUS_M,
            mapping: AttributeMapping::default(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }

    /// Check every option.
    ///
    /// # Errors
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.feed_id.trim().is_empty() {
            return Err(ConfigError::EmptyFeedId);
        }
        if self.feature_type.trim().is_empty() {
            return Err(ConfigError::EmptyFeatureType);
        }
        self.endpoint()?;
        if self.frequency_secs <= 0 {
            return Err(ConfigError::NonPositivePeriod(self.frequency_secs));
        }
        if !self.search_radius_m.is_finite() || self.search_radius_m < 0.0 {
            return Err(ConfigError::InvalidRadius(self.search_radius_m));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        let mapping = &self.mapping;
        for (role, name) in [
            ("id", &mapping.id),
            ("header", &mapping.header),
            ("valid_from", &mapping.valid_from),
            ("valid_until", &mapping.valid_until),
        ] {
            if name.trim().is_empty() {
                return Err(ConfigError::EmptyAttribute { role });
            }
        }
        Ok(())
    }

    /// Parsed feed endpoint.
    ///
    /// # Errors
    /// Fails when the URL does not parse or is not HTTP(S).
    pub fn endpoint(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.url).map_err(|source| ConfigError::InvalidUrl {
            url: self.url.clone(),
            source,
        })?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            _ => Err(ConfigError::UnsupportedScheme {
                url: self.url.clone(),
            }),
        }
    }

    /// Time between poll starts. Only meaningful once validated.
    pub const fn period(&self) -> Duration {
        Duration::from_secs(self.frequency_secs.unsigned_abs())
    }

    /// HTTP timeout per feed request.
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
