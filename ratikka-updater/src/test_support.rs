//! Test utilities for polling updaters.
//!
//! [`StubFeed`] is a deterministic [`FeedSource`] that serves a scripted
//! snapshot without any network access. Clones share state, so a test can
//! hand one clone to an updater and keep another to change the snapshot or
//! read the call counters.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use geo::{Coord, Geometry, Point};

use crate::{Feature, FeedError, FeedSource, PollingUpdaterConfig};

#[derive(Debug, Clone)]
enum StubResponse {
    Features(Vec<Feature>),
    Error(FeedError),
}

#[derive(Debug)]
struct StubState {
    response: StubResponse,
    setup_error: Option<FeedError>,
    configured: Option<PollingUpdaterConfig>,
    setups: usize,
    fetches: usize,
    teardowns: usize,
}

/// Scripted feed for tests.
#[derive(Debug, Clone)]
pub struct StubFeed {
    state: Arc<Mutex<StubState>>,
}

impl Default for StubFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl StubFeed {
    /// Feed serving an empty snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::with_features(Vec::new())
    }

    /// Feed serving `features` on every fetch.
    #[must_use]
    pub fn with_features(features: Vec<Feature>) -> Self {
        Self {
            state: Arc::new(Mutex::new(StubState {
                response: StubResponse::Features(features),
                setup_error: None,
                configured: None,
                setups: 0,
                fetches: 0,
                teardowns: 0,
            })),
        }
    }

    /// Make `setup` fail with `error`.
    #[must_use]
    pub fn with_setup_error(self, error: FeedError) -> Self {
        self.lock().setup_error = Some(error);
        self
    }

    /// Serve `features` from the next fetch on.
    pub fn set_features(&self, features: Vec<Feature>) {
        self.lock().response = StubResponse::Features(features);
    }

    /// Fail every fetch with `error` from now on.
    pub fn set_error(&self, error: FeedError) {
        self.lock().response = StubResponse::Error(error);
    }

    /// Configuration received by `configure`.
    pub fn configured(&self) -> Option<PollingUpdaterConfig> {
        self.lock().configured.clone()
    }

    /// Number of `setup` calls.
    pub fn setups(&self) -> usize {
        self.lock().setups
    }

    /// Number of `fetch` calls.
    pub fn fetches(&self) -> usize {
        self.lock().fetches
    }

    /// Number of `teardown` calls.
    pub fn teardowns(&self) -> usize {
        self.lock().teardowns
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl FeedSource for StubFeed {
    fn configure(&mut self, config: &PollingUpdaterConfig) -> Result<(), FeedError> {
        self.lock().configured = Some(config.clone());
        Ok(())
    }

    async fn setup(&mut self) -> Result<(), FeedError> {
        let mut state = self.lock();
        state.setups += 1;
        state.setup_error.clone().map_or(Ok(()), Err)
    }

    async fn fetch(&self) -> Result<Vec<Feature>, FeedError> {
        let mut state = self.lock();
        state.fetches += 1;
        match &state.response {
            StubResponse::Features(features) => Ok(features.clone()),
            StubResponse::Error(error) => Err(error.clone()),
        }
    }

    async fn teardown(&mut self) {
        self.lock().teardowns += 1;
    }
}

/// A street-works feature at `location` carrying the default attribute
/// names of the Helsinki feed.
pub fn winkki_feature(
    external_id: &str,
    licence_type: &str,
    location: Coord<f64>,
    valid_from: Option<DateTime<Utc>>,
    valid_until: Option<DateTime<Utc>>,
) -> Feature {
    let mut feature = Feature::new(external_id, Geometry::Point(Point(location)))
        .with_attribute("event_identifier", external_id)
        .with_attribute("licence_type", licence_type)
        .with_validity(valid_from, valid_until);
    for (name, bound) in [
        ("licence_startdate", valid_from),
        ("licence_enddate", valid_until),
    ] {
        if let Some(bound) = bound {
            feature = feature.with_attribute(name, bound.to_rfc3339());
        }
    }
    feature
}
