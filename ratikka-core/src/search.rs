//! Iterative multi-itinerary search.
//!
//! [`ItinerarySearch`] asks a [`PathSolver`] for one itinerary first, then
//! keeps raising the run's target by one until it has enough distinct
//! itineraries, the caller aborts, the first-path budget runs out, or a
//! subsearch stops producing anything new.
//!
//! Two budgets bound the work. The first-path budget caps the latency of
//! returning any result at all. The multi-path budget is armed at the first
//! refinement and shared by every later subsearch.

use std::{
    cmp::Reverse,
    ops::{Deref, DerefMut},
    sync::Arc,
    time::Duration,
};

use log::{debug, info};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Deadline, Graph, GraphPath, PathSolver, RoutingRequest, SearchRun};

/// Errors returned by [`ItinerarySearch::find_itineraries`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SearchError {
    /// The solver could not initialise a run for the request.
    #[error("path search engine could not start")]
    SolverNotStarted,
    /// The search ran but found no itinerary.
    #[error("no itinerary found")]
    NoItineraries,
}

/// Time budgets for one search.
///
/// `None` means the phase is unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SearchTimeouts {
    /// Budget for finding the first itinerary.
    pub first_path: Option<Duration>,
    /// Budget shared by all refinement subsearches.
    pub multi_path: Option<Duration>,
}

impl SearchTimeouts {
    /// No deadlines at all.
    pub const UNBOUNDED: Self = Self {
        first_path: None,
        multi_path: None,
    };

    /// Build budgets from seconds; non-positive or non-finite values disable
    /// the corresponding deadline.
    ///
    /// # Examples
    /// ```
    /// use std::time::Duration;
    /// use ratikka_core::SearchTimeouts;
    ///
    /// let timeouts = SearchTimeouts::from_secs_f64(2.5, 0.0);
    /// assert_eq!(timeouts.first_path, Some(Duration::from_millis(2_500)));
    /// assert_eq!(timeouts.multi_path, None);
    /// ```
    pub fn from_secs_f64(first_path: f64, multi_path: f64) -> Self {
        Self {
            first_path: budget(first_path),
            multi_path: budget(multi_path),
        }
    }
}

fn budget(secs: f64) -> Option<Duration> {
    (secs > 0.0)
        .then(|| Duration::try_from_secs_f64(secs).ok())
        .flatten()
}

/// Restores the caller's request however the search exits.
///
/// The itinerary target is put back to its original value and a context
/// attached by the search is detached again, releasing its temporary links.
struct RequestScope<'r> {
    request: &'r mut RoutingRequest,
    original_target: usize,
    attached: bool,
}

impl<'r> RequestScope<'r> {
    fn enter(request: &'r mut RoutingRequest, graph: &Arc<Graph>) -> Self {
        let original_target = request.num_itineraries();
        let attached = request.context().is_none();
        if attached {
            request.attach_context(graph);
        }
        Self {
            request,
            original_target,
            attached,
        }
    }
}

impl Deref for RequestScope<'_> {
    type Target = RoutingRequest;

    fn deref(&self) -> &Self::Target {
        self.request
    }
}

impl DerefMut for RequestScope<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.request
    }
}

impl Drop for RequestScope<'_> {
    fn drop(&mut self) {
        self.request.set_num_itineraries(self.original_target);
        if self.attached {
            self.request.detach_context();
        }
    }
}

/// Drives a [`PathSolver`] to collect several distinct itineraries.
///
/// # Examples
/// ```
/// use std::sync::Arc;
/// use chrono::Utc;
/// use geo::Coord;
/// use ratikka_core::{
///     Deadline, Graph, ItinerarySearch, PathSolver, RoutingRequest, SearchError,
///     SearchRun, SearchTimeouts, ShortestPathTree,
/// };
///
/// struct Unreachable;
///
/// struct EmptyRun(RoutingRequest);
///
/// impl SearchRun for EmptyRun {
///     fn request(&self) -> &RoutingRequest { &self.0 }
///     fn request_mut(&mut self) -> &mut RoutingRequest { &mut self.0 }
///     fn run_search(&mut self, _deadline: Deadline) -> Option<ShortestPathTree> {
///         Some(ShortestPathTree::default())
///     }
/// }
///
/// impl PathSolver for Unreachable {
///     type Run = EmptyRun;
///     fn start_search(&self, request: &RoutingRequest, _deadline: Deadline) -> Option<EmptyRun> {
///         Some(EmptyRun(request.clone()))
///     }
/// }
///
/// let graph = Arc::new(Graph::builder().build());
/// let search = ItinerarySearch::new(graph, Unreachable, SearchTimeouts::UNBOUNDED);
/// let mut request = RoutingRequest::new(
///     Coord { x: 0.0, y: 0.0 },
///     Coord { x: 1.0, y: 1.0 },
///     Utc::now(),
/// );
/// assert_eq!(
///     search.find_itineraries(&mut request),
///     Err(SearchError::NoItineraries)
/// );
/// ```
#[derive(Debug)]
pub struct ItinerarySearch<S> {
    graph: Arc<Graph>,
    solver: S,
    timeouts: SearchTimeouts,
}

impl<S: PathSolver> ItinerarySearch<S> {
    /// Create an orchestrator over `graph`.
    pub const fn new(graph: Arc<Graph>, solver: S, timeouts: SearchTimeouts) -> Self {
        Self {
            graph,
            solver,
            timeouts,
        }
    }

    /// Configured budgets.
    pub const fn timeouts(&self) -> SearchTimeouts {
        self.timeouts
    }

    /// The wrapped solver.
    pub const fn solver(&self) -> &S {
        &self.solver
    }

    /// Collect up to `request.num_itineraries()` distinct itineraries.
    ///
    /// A target of zero is treated as one. The request is handed back with
    /// its target and context as the caller left them.
    ///
    /// Itineraries are ordered by arrival for depart-after requests and by
    /// latest departure first for arrive-by requests.
    ///
    /// # Errors
    /// [`SearchError::SolverNotStarted`] when the solver cannot start a run;
    /// [`SearchError::NoItineraries`] when the search ends empty-handed.
    pub fn find_itineraries(
        &self,
        request: &mut RoutingRequest,
    ) -> Result<Vec<GraphPath>, SearchError> {
        let mut scope = RequestScope::enter(request, &self.graph);
        let target = scope.original_target.max(1);
        scope.set_num_itineraries(1);

        let first_deadline = Deadline::after(self.timeouts.first_path);
        let Some(mut run) = self.solver.start_search(&scope, first_deadline) else {
            info!("path search engine could not start");
            return Err(SearchError::SolverNotStarted);
        };

        let mut itineraries = Vec::new();
        let mut deadline = first_deadline;
        let mut refinement_deadline = None;
        let mut subsearches = 0_usize;
        loop {
            subsearches += 1;
            let Some(tree) = run.run_search(deadline) else {
                debug!("subsearch {subsearches} aborted without a tree");
                break;
            };
            let added = append_new(&mut itineraries, tree.into_paths());
            debug!(
                "subsearch {subsearches} added {added} itineraries ({} of {target})",
                itineraries.len()
            );
            if itineraries.len() >= target {
                break;
            }
            if scope.is_aborted() {
                debug!("search aborted by caller");
                break;
            }
            if first_deadline.is_elapsed() {
                debug!("first-path budget spent");
                break;
            }
            if added == 0 {
                debug!("no new itineraries; stopping");
                break;
            }
            let next_target = run.request().num_itineraries() + 1;
            run.request_mut().set_num_itineraries(next_target);
            deadline = *refinement_deadline
                .get_or_insert_with(|| Deadline::after(self.timeouts.multi_path));
        }
        drop(run);

        if itineraries.is_empty() {
            return Err(SearchError::NoItineraries);
        }
        if scope.arrive_by {
            itineraries.sort_by_key(|path| Reverse(path.departure()));
        } else {
            itineraries.sort_by_key(GraphPath::arrival);
        }
        info!(
            "found {} itineraries in {subsearches} subsearches",
            itineraries.len()
        );
        Ok(itineraries)
    }
}

/// Append paths not already present and return how many were added.
fn append_new(itineraries: &mut Vec<GraphPath>, found: Vec<GraphPath>) -> usize {
    let before = itineraries.len();
    for path in found {
        if !itineraries.contains(&path) {
            itineraries.push(path);
        }
    }
    itineraries.len() - before
}
