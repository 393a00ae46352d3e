//! Routing requests and their per-search context.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use chrono::{DateTime, Utc};
use geo::Coord;
use log::debug;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{Graph, TemporaryLink};

/// How the traveller moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum TraverseMode {
    /// On foot.
    Walk,
    /// By bicycle.
    Bicycle,
    /// By car.
    Car,
    /// Public transport with walking transfers.
    #[default]
    Transit,
}

/// Per-search state linking the request endpoints into the graph.
///
/// Attaching a context snaps the origin and destination to their nearest
/// edges and registers the resulting [`TemporaryLink`]s with the graph. The
/// links are released when the last reference to the context is dropped.
#[derive(Debug)]
pub struct SearchContext {
    graph: Arc<Graph>,
    key: u64,
    origin: Option<TemporaryLink>,
    destination: Option<TemporaryLink>,
    aborted: AtomicBool,
}

impl SearchContext {
    /// Link `request`'s endpoints into `graph`.
    pub fn attach(graph: &Arc<Graph>, request: &RoutingRequest) -> Self {
        let link = |location: Coord<f64>| {
            graph.nearest_edge(location).map(|edge| TemporaryLink {
                edge: edge.id(),
                location,
            })
        };
        let origin = link(request.from);
        let destination = link(request.to);
        let key = graph.register_links(origin.into_iter().chain(destination).collect());
        debug!("attached search context {key} (origin {origin:?}, destination {destination:?})");
        Self {
            graph: Arc::clone(graph),
            key,
            origin,
            destination,
            aborted: AtomicBool::new(false),
        }
    }

    /// Graph the links were registered with.
    pub const fn graph(&self) -> &Arc<Graph> {
        &self.graph
    }

    /// Link from the origin to its nearest edge, if the graph has edges.
    pub const fn origin(&self) -> Option<TemporaryLink> {
        self.origin
    }

    /// Link from the destination to its nearest edge.
    pub const fn destination(&self) -> Option<TemporaryLink> {
        self.destination
    }

    /// Ask the running search to stop after the current subsearch.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
    }

    /// Whether [`SearchContext::abort`] has been called.
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }
}

impl Drop for SearchContext {
    fn drop(&mut self) {
        self.graph.release_links(self.key);
        debug!("released search context {}", self.key);
    }
}

/// A trip-planning query.
///
/// The itinerary target is the only field the search mutates; everything
/// else stays as the caller set it.
///
/// # Examples
/// ```
/// use chrono::Utc;
/// use geo::Coord;
/// use ratikka_core::{RoutingRequest, TraverseMode};
///
/// let request = RoutingRequest::new(
///     Coord { x: 24.93, y: 60.17 },
///     Coord { x: 24.96, y: 60.18 },
///     Utc::now(),
/// )
/// .with_mode(TraverseMode::Walk)
/// .with_num_itineraries(3);
/// assert_eq!(request.num_itineraries(), 3);
/// assert!(!request.arrive_by);
/// ```
#[derive(Debug, Clone)]
pub struct RoutingRequest {
    /// Origin in WGS84.
    pub from: Coord<f64>,
    /// Destination in WGS84.
    pub to: Coord<f64>,
    /// Whether `date_time` is the latest arrival rather than the earliest
    /// departure.
    pub arrive_by: bool,
    /// Travel mode.
    pub mode: TraverseMode,
    /// Departure or arrival time, depending on `arrive_by`.
    pub date_time: DateTime<Utc>,
    num_itineraries: usize,
    context: Option<Arc<SearchContext>>,
}

impl RoutingRequest {
    /// Depart-after request for one itinerary by transit.
    pub fn new(from: Coord<f64>, to: Coord<f64>, date_time: DateTime<Utc>) -> Self {
        Self {
            from,
            to,
            arrive_by: false,
            mode: TraverseMode::default(),
            date_time,
            num_itineraries: 1,
            context: None,
        }
    }

    /// Set the arrive-by flag.
    #[must_use]
    pub const fn with_arrive_by(mut self, arrive_by: bool) -> Self {
        self.arrive_by = arrive_by;
        self
    }

    /// Set the travel mode.
    #[must_use]
    pub const fn with_mode(mut self, mode: TraverseMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the number of itineraries wanted.
    #[must_use]
    pub const fn with_num_itineraries(mut self, count: usize) -> Self {
        self.num_itineraries = count;
        self
    }

    /// Number of itineraries currently requested.
    pub const fn num_itineraries(&self) -> usize {
        self.num_itineraries
    }

    /// Change the itinerary target.
    pub const fn set_num_itineraries(&mut self, count: usize) {
        self.num_itineraries = count;
    }

    /// The attached search context, if any.
    pub fn context(&self) -> Option<&Arc<SearchContext>> {
        self.context.as_ref()
    }

    /// Attach a fresh context built against `graph`, replacing any previous
    /// one, and return a handle to it.
    pub fn attach_context(&mut self, graph: &Arc<Graph>) -> Arc<SearchContext> {
        let context = Arc::new(SearchContext::attach(graph, self));
        self.context = Some(Arc::clone(&context));
        context
    }

    /// Detach the context; its links are released once no other handle
    /// keeps it alive.
    pub fn detach_context(&mut self) -> Option<Arc<SearchContext>> {
        self.context.take()
    }

    /// Whether the attached context has been aborted.
    pub fn is_aborted(&self) -> bool {
        self.context
            .as_ref()
            .is_some_and(|context| context.is_aborted())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};

    #[fixture]
    fn graph() -> Arc<Graph> {
        let mut builder = Graph::builder();
        let a = builder.add_vertex("A", Coord { x: 0.0, y: 0.0 });
        let b = builder.add_vertex("B", Coord { x: 1.0, y: 0.0 });
        let c = builder.add_vertex("C", Coord { x: 1.0, y: 1.0 });
        builder.add_straight_edge(a, b, "AB").expect("edge AB");
        builder.add_straight_edge(b, c, "BC").expect("edge BC");
        Arc::new(builder.build())
    }

    fn request() -> RoutingRequest {
        RoutingRequest::new(
            Coord { x: 0.2, y: 0.01 },
            Coord { x: 1.01, y: 0.9 },
            Utc::now(),
        )
    }

    #[rstest]
    fn attaching_links_endpoints_to_nearest_edges(graph: Arc<Graph>) {
        let mut request = request();
        let context = request.attach_context(&graph);

        assert_eq!(context.origin().map(|link| link.edge.index()), Some(0));
        assert_eq!(context.destination().map(|link| link.edge.index()), Some(1));
        assert_eq!(graph.temporary_link_count(), 2);
    }

    #[rstest]
    fn links_are_released_with_the_last_handle(graph: Arc<Graph>) {
        let mut request = request();
        let handle = request.attach_context(&graph);
        let detached = request.detach_context();
        drop(detached);
        assert_eq!(graph.temporary_link_count(), 2);

        drop(handle);
        assert_eq!(graph.temporary_link_count(), 0);
    }

    #[rstest]
    fn abort_is_visible_through_the_request(graph: Arc<Graph>) {
        let mut request = request();
        assert!(!request.is_aborted());
        let handle = request.attach_context(&graph);
        handle.abort();
        assert!(request.is_aborted());
    }

    #[rstest]
    fn empty_graph_attaches_without_links() {
        let graph = Arc::new(Graph::builder().build());
        let mut request = request();
        let context = request.attach_context(&graph);
        assert_eq!(context.origin(), None);
        assert_eq!(graph.temporary_link_count(), 0);
    }
}
