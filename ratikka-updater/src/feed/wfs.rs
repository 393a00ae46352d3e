//! OGC Web Feature Service adapter.
//!
//! [`WfsFeed`] speaks WFS 1.1.0 over HTTP. Setup issues one
//! `GetCapabilities` request and checks the configured feature type is
//! advertised; every fetch issues `GetFeature` asking for GeoJSON in
//! EPSG:4326 so coordinates arrive as longitude/latitude.
//!
//! # Example
//!
//! ```no_run
//! use ratikka_updater::{FeedSource, PollingUpdaterConfig, WfsFeed};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PollingUpdaterConfig::new("https://kartta.hel.fi/ws/geoserver/avoindata/wfs");
//! let mut feed = WfsFeed::new();
//! feed.configure(&config)?;
//! feed.setup().await?;
//! let features = feed.fetch().await?;
//! println!("{} street works", features.len());
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use reqwest::Client;
use roxmltree::Document;
use url::Url;

use super::{Feature, FeedError, FeedSource, decode_feature_collection};
use crate::{AttributeMapping, PollingUpdaterConfig};

/// Default user agent for feed requests.
pub const DEFAULT_USER_AGENT: &str = "ratikka-updater/0.1";

const WFS_VERSION: &str = "1.1.0";
const OUTPUT_FORMAT: &str = "application/json";
const SRS_NAME: &str = "EPSG:4326";

#[derive(Debug, Clone)]
struct Connection {
    client: Client,
    endpoint: Url,
    feature_type: String,
    mapping: AttributeMapping,
    timeout: Duration,
}

/// Feed source backed by a WFS endpoint.
#[derive(Debug, Clone)]
pub struct WfsFeed {
    user_agent: String,
    connection: Option<Connection>,
}

impl Default for WfsFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl WfsFeed {
    /// Unconfigured feed using [`DEFAULT_USER_AGENT`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            connection: None,
        }
    }

    /// Set the user agent string. Takes effect at the next `configure`.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// `GetCapabilities` URL, once configured.
    pub fn capabilities_url(&self) -> Option<Url> {
        self.connection.as_ref().map(|conn| {
            let mut url = conn.endpoint.clone();
            url.query_pairs_mut()
                .append_pair("service", "WFS")
                .append_pair("version", WFS_VERSION)
                .append_pair("request", "GetCapabilities");
            url
        })
    }

    /// `GetFeature` URL, once configured.
    pub fn get_feature_url(&self) -> Option<Url> {
        self.connection.as_ref().map(|conn| {
            let mut url = conn.endpoint.clone();
            url.query_pairs_mut()
                .append_pair("service", "WFS")
                .append_pair("version", WFS_VERSION)
                .append_pair("request", "GetFeature")
                .append_pair("typeName", &conn.feature_type)
                .append_pair("outputFormat", OUTPUT_FORMAT)
                .append_pair("srsName", SRS_NAME);
            url
        })
    }

    fn connection(&self) -> Result<&Connection, FeedError> {
        self.connection.as_ref().ok_or(FeedError::NotConfigured)
    }

    async fn get(&self, url: &Url) -> Result<reqwest::Response, FeedError> {
        let conn = self.connection()?;
        conn.client
            .get(url.clone())
            .send()
            .await
            .map_err(|err| convert_reqwest_error(&err, url, conn.timeout))?
            .error_for_status()
            .map_err(|err| convert_reqwest_error(&err, url, conn.timeout))
    }
}

/// Map a transport error onto [`FeedError`].
fn convert_reqwest_error(error: &reqwest::Error, url: &Url, timeout: Duration) -> FeedError {
    if error.is_timeout() {
        return FeedError::Timeout {
            url: url.to_string(),
            timeout_secs: timeout.as_secs(),
        };
    }

    if let Some(status) = error.status() {
        return FeedError::Http {
            url: url.to_string(),
            status: status.as_u16(),
        };
    }

    FeedError::Network {
        url: url.to_string(),
        message: error.to_string(),
    }
}

#[async_trait]
impl FeedSource for WfsFeed {
    fn configure(&mut self, config: &PollingUpdaterConfig) -> Result<(), FeedError> {
        let endpoint = config.endpoint().map_err(|err| FeedError::Client {
            message: err.to_string(),
        })?;
        let timeout = config.request_timeout();
        let client = Client::builder()
            .user_agent(&self.user_agent)
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(|err| FeedError::Client {
                message: err.to_string(),
            })?;
        self.connection = Some(Connection {
            client,
            endpoint,
            feature_type: config.feature_type.clone(),
            mapping: config.mapping.clone(),
            timeout,
        });
        Ok(())
    }

    async fn setup(&mut self) -> Result<(), FeedError> {
        let url = self.capabilities_url().ok_or(FeedError::NotConfigured)?;
        let body = self
            .get(&url)
            .await?
            .text()
            .await
            .map_err(|err| FeedError::Parse {
                message: err.to_string(),
            })?;
        let conn = self.connection()?;
        if !advertises(&body, &conn.feature_type)? {
            return Err(FeedError::UnknownFeatureType {
                feature_type: conn.feature_type.clone(),
                url: conn.endpoint.to_string(),
            });
        }
        info!("wfs feed {} offers {}", conn.endpoint, conn.feature_type);
        Ok(())
    }

    async fn fetch(&self) -> Result<Vec<Feature>, FeedError> {
        let url = self.get_feature_url().ok_or(FeedError::NotConfigured)?;
        let body = self
            .get(&url)
            .await?
            .bytes()
            .await
            .map_err(|err| FeedError::Parse {
                message: err.to_string(),
            })?;
        debug!("fetched {} bytes from {url}", body.len());
        decode_feature_collection(&body, &self.connection()?.mapping)
    }

    async fn teardown(&mut self) {
        if self.connection.take().is_some() {
            debug!("wfs feed connection released");
        }
    }
}

/// Whether a capabilities document lists `feature_type`.
///
/// Servers may advertise the type with or without its namespace prefix, so
/// the local name is accepted too.
fn advertises(capabilities: &str, feature_type: &str) -> Result<bool, FeedError> {
    let document = Document::parse(capabilities).map_err(|err| FeedError::Parse {
        message: format!("capabilities document: {err}"),
    })?;
    let local = feature_type
        .rsplit_once(':')
        .map_or(feature_type, |(_, local)| local);
    Ok(document
        .descendants()
        .filter(|node| node.has_tag_name("FeatureType"))
        .filter_map(|node| node.children().find(|child| child.has_tag_name("Name")))
        .filter_map(|name| name.text())
        .map(str::trim)
        .any(|name| name == feature_type || name == local))
}
