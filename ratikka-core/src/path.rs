//! Itineraries and the solver output they are read from.

use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::EdgeId;

/// Errors raised when constructing a [`GraphPath`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphPathError {
    /// A path needs at least one edge.
    #[error("path has no edges")]
    Empty,
    /// Arrival precedes departure.
    #[error("path arrives at {arrival} before departing at {departure}")]
    ArrivesBeforeDeparture {
        /// Departure time.
        departure: DateTime<Utc>,
        /// Arrival time.
        arrival: DateTime<Utc>,
    },
}

/// One origin-to-destination itinerary.
///
/// Equality and hashing only consider the edge sequence: two paths over the
/// same edges are the same itinerary whatever their timing.
///
/// # Examples
/// ```
/// use chrono::{Duration, Utc};
/// use ratikka_core::{EdgeId, GraphPath};
///
/// # fn main() -> Result<(), ratikka_core::GraphPathError> {
/// let departure = Utc::now();
/// let edges = vec![EdgeId::new(0), EdgeId::new(1)];
/// let first = GraphPath::new(edges.clone(), departure, departure + Duration::minutes(10))?;
/// let later = GraphPath::new(edges, departure, departure + Duration::minutes(12))?;
/// assert_eq!(first, later);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct GraphPath {
    edges: Vec<EdgeId>,
    departure: DateTime<Utc>,
    arrival: DateTime<Utc>,
}

impl GraphPath {
    /// Build a path, rejecting empty or time-reversed itineraries.
    pub fn new(
        edges: Vec<EdgeId>,
        departure: DateTime<Utc>,
        arrival: DateTime<Utc>,
    ) -> Result<Self, GraphPathError> {
        if edges.is_empty() {
            return Err(GraphPathError::Empty);
        }
        if arrival < departure {
            return Err(GraphPathError::ArrivesBeforeDeparture { departure, arrival });
        }
        Ok(Self {
            edges,
            departure,
            arrival,
        })
    }

    /// Edges in travel order.
    pub fn edges(&self) -> &[EdgeId] {
        &self.edges
    }

    /// Departure from the origin.
    pub const fn departure(&self) -> DateTime<Utc> {
        self.departure
    }

    /// Arrival at the destination.
    pub const fn arrival(&self) -> DateTime<Utc> {
        self.arrival
    }

    /// Time spent travelling.
    pub fn duration(&self) -> chrono::Duration {
        self.arrival - self.departure
    }
}

impl PartialEq for GraphPath {
    fn eq(&self, other: &Self) -> bool {
        self.edges == other.edges
    }
}

impl Eq for GraphPath {}

impl Hash for GraphPath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.edges.hash(state);
    }
}

/// Read-only result of one solver invocation.
#[derive(Debug, Clone, Default)]
pub struct ShortestPathTree {
    paths: Vec<GraphPath>,
    visited_vertices: usize,
}

impl ShortestPathTree {
    /// Wrap the paths found by a solver run.
    pub const fn new(paths: Vec<GraphPath>, visited_vertices: usize) -> Self {
        Self {
            paths,
            visited_vertices,
        }
    }

    /// Paths to the destination; empty when none was reached.
    pub fn paths(&self) -> &[GraphPath] {
        &self.paths
    }

    /// Consume the tree, yielding its paths.
    pub fn into_paths(self) -> Vec<GraphPath> {
        self.paths
    }

    /// Vertices settled while building the tree.
    pub const fn visited_vertices(&self) -> usize {
        self.visited_vertices
    }
}
