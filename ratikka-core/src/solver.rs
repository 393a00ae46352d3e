//! Interface to the single-path shortest-path solver.
//!
//! The solver itself lives outside this crate. The orchestrator only needs
//! to start a run, ask it to search until a deadline, and raise the run's
//! itinerary target between subsearches.

use std::time::{Duration, Instant};

use crate::{RoutingRequest, ShortestPathTree};

/// Absolute point in time bounding a search phase.
///
/// `Deadline::NONE` never elapses.
///
/// # Examples
/// ```
/// use std::time::Duration;
/// use ratikka_core::Deadline;
///
/// assert!(!Deadline::NONE.is_elapsed());
/// assert!(Deadline::after(Some(Duration::ZERO)).is_elapsed());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// A deadline that never elapses.
    pub const NONE: Self = Self(None);

    /// Deadline at `instant`.
    pub const fn at(instant: Instant) -> Self {
        Self(Some(instant))
    }

    /// Deadline `budget` from now; `None` means unbounded.
    pub fn after(budget: Option<Duration>) -> Self {
        Self(budget.and_then(|budget| Instant::now().checked_add(budget)))
    }

    /// The instant, if bounded.
    pub const fn instant(self) -> Option<Instant> {
        self.0
    }

    /// Whether the deadline has passed.
    pub fn is_elapsed(self) -> bool {
        self.0.is_some_and(|instant| Instant::now() >= instant)
    }
}

/// Starts solver runs for routing requests.
///
/// Implementations must be `Send + Sync` so one solver can serve searches
/// on many threads.
pub trait PathSolver: Send + Sync {
    /// Per-search state produced by [`PathSolver::start_search`].
    type Run: SearchRun;

    /// Prepare a run for `request`, or `None` if the solver cannot start,
    /// for example because an endpoint could not be linked into the graph.
    ///
    /// The run keeps its own copy of the request; the orchestrator raises
    /// the copy's itinerary target between subsearches.
    fn start_search(&self, request: &RoutingRequest, deadline: Deadline) -> Option<Self::Run>;
}

/// A live solver run.
pub trait SearchRun {
    /// The request this run is answering.
    fn request(&self) -> &RoutingRequest;

    /// Mutable access to the request, used to raise the itinerary target.
    fn request_mut(&mut self) -> &mut RoutingRequest;

    /// Search until the tree is complete or `deadline` passes.
    ///
    /// Returns `None` when the run aborted before producing any tree.
    fn run_search(&mut self, deadline: Deadline) -> Option<ShortestPathTree>;
}
