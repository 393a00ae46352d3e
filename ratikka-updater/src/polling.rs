//! Polling updater: drives one feed through its lifecycle.
//!
//! ```text
//! Created -> Configured -> SetUp -> { Polling <-> Idle } -> TornDown
//!        \            \
//!         `-----------`--> Disabled
//! ```
//!
//! Every cycle fetches a snapshot and submits at most one convergence task
//! to the [`UpdateManager`](ratikka_core::UpdateManager). A cycle is skipped
//! while the previous task is still queued, and a failed fetch leaves the
//! previously applied alerts in place.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use ratikka_core::{TaskOutcome, TaskReceipt, UpdateHandle};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

use crate::{AlertConvergence, AssociationSet, ConfigError, FeedError, FeedSource, PollingUpdaterConfig};

/// Lifecycle state of a [`PollingUpdater`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdaterState {
    /// Constructed, not yet configured.
    Created,
    /// Options validated and handed to the feed.
    Configured,
    /// Feed opened and probed; ready to poll.
    SetUp,
    /// A cycle is fetching or submitting.
    Polling,
    /// Between cycles.
    Idle,
    /// Configuration or setup failed; the updater never polls.
    Disabled,
    /// Feed resources released.
    TornDown,
}

impl std::fmt::Display for UpdaterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Configured => "configured",
            Self::SetUp => "set up",
            Self::Polling => "polling",
            Self::Idle => "idle",
            Self::Disabled => "disabled",
            Self::TornDown => "torn down",
        };
        f.write_str(name)
    }
}

/// Result of one polling cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// A convergence task was queued.
    Submitted,
    /// The previous task had not finished; nothing was fetched.
    SkippedPending,
    /// The fetch failed; applied alerts are unchanged.
    FetchFailed(FeedError),
    /// The update manager refused the task because it is shutting down.
    Rejected,
}

/// Errors raised by the polling lifecycle.
#[derive(Debug, Error)]
pub enum UpdaterError {
    /// Options failed validation.
    #[error("invalid updater configuration: {0}")]
    Config(#[from] ConfigError),
    /// The feed could not be configured or set up.
    #[error("feed setup failed: {0}")]
    Setup(#[source] FeedError),
    /// The requested step is not allowed from the current state.
    #[error("cannot {action} while {from}")]
    InvalidTransition {
        /// State the updater was in.
        from: UpdaterState,
        /// Attempted step.
        action: &'static str,
    },
    /// The polling task stopped abnormally.
    #[error("polling task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Periodic driver for one [`FeedSource`].
#[derive(Debug)]
pub struct PollingUpdater<F> {
    feed: F,
    state: UpdaterState,
    config: Option<PollingUpdaterConfig>,
    convergence: Option<AlertConvergence>,
    applied: Arc<Mutex<AssociationSet>>,
    pending: Option<TaskReceipt>,
}

impl<F: FeedSource> PollingUpdater<F> {
    /// Wrap `feed` in a fresh updater.
    pub fn new(feed: F) -> Self {
        Self {
            feed,
            state: UpdaterState::Created,
            config: None,
            convergence: None,
            applied: Arc::new(Mutex::new(AssociationSet::new())),
            pending: None,
        }
    }

    /// Current lifecycle state.
    pub const fn state(&self) -> UpdaterState {
        self.state
    }

    /// The wrapped feed.
    pub const fn feed(&self) -> &F {
        &self.feed
    }

    /// Validated configuration, once configured.
    pub const fn config(&self) -> Option<&PollingUpdaterConfig> {
        self.config.as_ref()
    }

    /// Snapshot of the associations applied by the last successful cycle.
    pub fn associations(&self) -> AssociationSet {
        self.applied
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn expect_state(&self, allowed: &[UpdaterState], action: &'static str) -> Result<(), UpdaterError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(UpdaterError::InvalidTransition {
                from: self.state,
                action,
            })
        }
    }

    fn disable(&mut self) {
        self.state = UpdaterState::Disabled;
        self.pending = None;
    }

    /// Validate `config` and hand it to the feed.
    ///
    /// # Errors
    /// Any failure disables the updater.
    pub fn configure(&mut self, config: PollingUpdaterConfig) -> Result<(), UpdaterError> {
        self.expect_state(&[UpdaterState::Created], "configure")?;
        if let Err(err) = config.validate() {
            error!("feed {:?} disabled: {err}", config.feed_id);
            self.disable();
            return Err(err.into());
        }
        if let Err(err) = self.feed.configure(&config) {
            error!("feed {:?} disabled: {err}", config.feed_id);
            self.disable();
            return Err(UpdaterError::Setup(err));
        }
        info!(
            "feed {:?} configured: {} every {}s",
            config.feed_id, config.feature_type, config.frequency_secs
        );
        self.convergence = Some(AlertConvergence::from_config(&config));
        self.config = Some(config);
        self.state = UpdaterState::Configured;
        Ok(())
    }

    /// Open the feed and probe it once.
    ///
    /// # Errors
    /// A failed probe disables the updater permanently.
    pub async fn setup(&mut self) -> Result<(), UpdaterError> {
        self.expect_state(&[UpdaterState::Configured], "set up")?;
        match self.feed.setup().await {
            Ok(()) => {
                info!("feed {:?} set up", self.feed_id());
                self.state = UpdaterState::SetUp;
                Ok(())
            }
            Err(err) => {
                error!("feed {:?} disabled: {err}", self.feed_id());
                self.disable();
                Err(UpdaterError::Setup(err))
            }
        }
    }

    fn feed_id(&self) -> &str {
        self.config.as_ref().map_or("", |config| config.feed_id.as_str())
    }

    /// Run one cycle against the current wall clock.
    ///
    /// # Errors
    /// Fails only when the updater is not set up.
    pub async fn poll_once(&mut self, handle: &UpdateHandle) -> Result<PollOutcome, UpdaterError> {
        self.expect_state(
            &[UpdaterState::SetUp, UpdaterState::Idle],
            "poll",
        )?;
        if self.pending.as_mut().is_some_and(TaskReceipt::is_pending) {
            debug!("feed {:?}: previous task still queued, skipping cycle", self.feed_id());
            return Ok(PollOutcome::SkippedPending);
        }
        self.pending = None;
        self.state = UpdaterState::Polling;
        let fetched = self.feed.fetch().await;
        let outcome = match fetched {
            Ok(features) => self.submit(handle, features, Utc::now()),
            Err(err) => {
                warn!("feed {:?}: fetch failed, keeping current alerts: {err}", self.feed_id());
                PollOutcome::FetchFailed(err)
            }
        };
        self.state = UpdaterState::Idle;
        Ok(outcome)
    }

    fn submit(
        &mut self,
        handle: &UpdateHandle,
        features: Vec<crate::Feature>,
        now: DateTime<Utc>,
    ) -> PollOutcome {
        let Some(convergence) = self.convergence.clone() else {
            return PollOutcome::Rejected;
        };
        debug!("feed {:?}: {} features fetched", self.feed_id(), features.len());
        let task = convergence.into_task(features, now, Arc::clone(&self.applied));
        match handle.submit(task) {
            Ok(receipt) => {
                self.pending = Some(receipt);
                PollOutcome::Submitted
            }
            Err(err) => {
                warn!("feed {:?}: {err}", self.feed_id());
                PollOutcome::Rejected
            }
        }
    }

    /// Wait for the task submitted by the last cycle, if any.
    ///
    /// Returns `None` when nothing is pending or the task was discarded.
    pub async fn settle(&mut self) -> Option<TaskOutcome> {
        match self.pending.take() {
            Some(receipt) => receipt.wait().await,
            None => None,
        }
    }

    /// Release feed resources. Calling it again has no effect.
    pub async fn teardown(&mut self) {
        if self.state == UpdaterState::TornDown {
            return;
        }
        self.feed.teardown().await;
        self.pending = None;
        self.state = UpdaterState::TornDown;
        info!("feed {:?} torn down", self.feed_id());
    }
}

impl<F: FeedSource + 'static> PollingUpdater<F> {
    /// Poll on a tokio interval until cancelled.
    ///
    /// The first cycle runs immediately; later ones start one period after
    /// the previous start, and missed ticks are skipped. The loop also ends
    /// when the update manager stops accepting tasks.
    ///
    /// # Errors
    /// Fails when the updater has not been set up; the updater is dropped.
    pub fn spawn(self, handle: UpdateHandle) -> Result<PollingHandle<F>, UpdaterError> {
        self.expect_state(&[UpdaterState::SetUp, UpdaterState::Idle], "start polling")?;
        let period = self
            .config
            .as_ref()
            .map(PollingUpdaterConfig::period)
            .ok_or(UpdaterError::InvalidTransition {
                from: self.state,
                action: "start polling",
            })?;
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let join = tokio::spawn(async move {
            let mut updater = self;
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    () = cancelled.cancelled() => break,
                    _ = ticker.tick() => match updater.poll_once(&handle).await {
                        Ok(PollOutcome::Rejected) => {
                            info!("feed {:?}: update manager closed, polling stops", updater.feed_id());
                            break;
                        }
                        Ok(_) => {}
                        Err(err) => {
                            error!("feed {:?}: {err}", updater.feed_id());
                            break;
                        }
                    },
                }
            }
            updater
        });
        Ok(PollingHandle { token, join })
    }
}

/// Control handle for a spawned [`PollingUpdater`].
#[derive(Debug)]
pub struct PollingHandle<F> {
    token: CancellationToken,
    join: JoinHandle<PollingUpdater<F>>,
}

impl<F: FeedSource + 'static> PollingHandle<F> {
    /// Ask the loop to stop after the current cycle.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether the loop has ended.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Stop polling and hand the updater back.
    ///
    /// # Errors
    /// Fails when the polling task panicked.
    pub async fn stop(self) -> Result<PollingUpdater<F>, UpdaterError> {
        self.token.cancel();
        Ok(self.join.await?)
    }

    /// Stop polling and tear the updater down.
    ///
    /// # Errors
    /// Fails when the polling task panicked.
    pub async fn teardown(self) -> Result<PollingUpdater<F>, UpdaterError> {
        let mut updater = self.stop().await?;
        updater.teardown().await;
        Ok(updater)
    }
}
