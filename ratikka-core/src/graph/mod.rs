//! The shared routing graph.
//!
//! The graph is built once and then shared behind an `Arc` between searches
//! and the update subsystem. Topology and geometry never change after
//! [`GraphBuilder::build`]; the only mutable state is each edge's alert set
//! and the registry of temporary search links.
//!
//! Alert sets are stored as immutable `Arc<[Alert]>` snapshots. Readers clone
//! the current snapshot and never see a partially edited set; writers replace
//! the snapshot as a unit through a [`GraphWriter`], which only the
//! [`UpdateManager`](crate::UpdateManager) worker can create.

mod spatial_index;

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, PoisonError, RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use geo::{Coord, LineString, Rect};
use rstar::RTree;
use thiserror::Error;

use crate::Alert;
use spatial_index::{IndexedEdge, build_edge_index, envelope_of};

/// Stable vertex identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VertexId(usize);

impl VertexId {
    /// Wrap a raw vertex index.
    pub const fn new(raw: usize) -> Self {
        Self(raw)
    }

    /// Position of the vertex inside the graph.
    pub const fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for VertexId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Stable edge identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeId(usize);

impl EdgeId {
    /// Wrap a raw edge index.
    pub const fn new(raw: usize) -> Self {
        Self(raw)
    }

    /// Position of the edge inside the graph.
    pub const fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for EdgeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// Errors raised while building or editing the graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// An edge referenced a vertex that does not exist.
    #[error("unknown vertex {0}")]
    UnknownVertex(VertexId),
    /// An edit referenced an edge that does not exist.
    #[error("unknown edge {0}")]
    UnknownEdge(EdgeId),
    /// Edge geometry needs at least two coordinates.
    #[error("edge {label:?} needs at least two coordinates")]
    DegenerateGeometry {
        /// Label of the rejected edge.
        label: String,
    },
}

/// A graph node.
#[derive(Debug, Clone, PartialEq)]
pub struct Vertex {
    id: VertexId,
    label: String,
    location: Coord<f64>,
}

impl Vertex {
    /// Vertex identity.
    pub const fn id(&self) -> VertexId {
        self.id
    }

    /// Human-readable label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// WGS84 position.
    pub const fn location(&self) -> Coord<f64> {
        self.location
    }
}

/// A directed edge with geometry and an alert set.
#[derive(Debug)]
pub struct Edge {
    id: EdgeId,
    from: VertexId,
    to: VertexId,
    label: String,
    geometry: LineString<f64>,
    alerts: RwLock<Arc<[Alert]>>,
}

impl Edge {
    /// Edge identity.
    pub const fn id(&self) -> EdgeId {
        self.id
    }

    /// Source vertex.
    pub const fn from(&self) -> VertexId {
        self.from
    }

    /// Target vertex.
    pub const fn to(&self) -> VertexId {
        self.to
    }

    /// Human-readable label, e.g. the street name.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Edge geometry in WGS84.
    pub const fn geometry(&self) -> &LineString<f64> {
        &self.geometry
    }

    /// Snapshot of the current alert set.
    ///
    /// The snapshot is never modified afterwards, even if a writer replaces
    /// the edge's alerts while the caller still holds it.
    pub fn alerts(&self) -> Arc<[Alert]> {
        let guard = self.alerts.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    fn store_alerts(&self, alerts: Arc<[Alert]>) {
        let mut guard = self.alerts.write().unwrap_or_else(PoisonError::into_inner);
        *guard = alerts;
    }
}

/// Temporary attachment of a request endpoint to the nearest edge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemporaryLink {
    /// Edge the endpoint was snapped to.
    pub edge: EdgeId,
    /// The endpoint being linked.
    pub location: Coord<f64>,
}

#[derive(Debug, Default)]
struct TemporaryLinks {
    next_id: AtomicU64,
    live: Mutex<HashMap<u64, Vec<TemporaryLink>>>,
}

/// Routing graph shared between searches and updaters.
///
/// # Examples
/// ```
/// use geo::Coord;
/// use ratikka_core::Graph;
///
/// # fn main() -> Result<(), ratikka_core::GraphError> {
/// let mut builder = Graph::builder();
/// let a = builder.add_vertex("A", Coord { x: 24.93, y: 60.17 });
/// let b = builder.add_vertex("B", Coord { x: 24.94, y: 60.17 });
/// let edge = builder.add_straight_edge(a, b, "Esplanadi")?;
/// let graph = builder.build();
///
/// assert_eq!(graph.edge_count(), 1);
/// assert!(graph.alerts(edge).is_some_and(|alerts| alerts.is_empty()));
/// # Ok(())
/// # }
/// ```
pub struct Graph {
    vertices: Vec<Vertex>,
    edges: Vec<Edge>,
    index: RTree<IndexedEdge>,
    links: TemporaryLinks,
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("vertices", &self.vertices.len())
            .field("edges", &self.edges.len())
            .field("temporary_links", &self.temporary_link_count())
            .finish()
    }
}

impl Graph {
    /// Start building a graph.
    pub fn builder() -> GraphBuilder {
        GraphBuilder::default()
    }

    /// Look up a vertex.
    pub fn vertex(&self, id: VertexId) -> Option<&Vertex> {
        self.vertices.get(id.index())
    }

    /// Look up an edge.
    pub fn edge(&self, id: EdgeId) -> Option<&Edge> {
        self.edges.get(id.index())
    }

    /// All edges in identity order.
    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter()
    }

    /// Number of vertices.
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Number of edges.
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Current alert snapshot of an edge.
    pub fn alerts(&self, id: EdgeId) -> Option<Arc<[Alert]>> {
        self.edge(id).map(Edge::alerts)
    }

    /// Snapshot of every edge that currently carries alerts.
    pub fn alerted_edges(&self) -> Vec<(EdgeId, Arc<[Alert]>)> {
        self.edges
            .iter()
            .map(|edge| (edge.id, edge.alerts()))
            .filter(|(_, alerts)| !alerts.is_empty())
            .collect()
    }

    /// Edges whose bounding box intersects `rect`.
    ///
    /// The rectangle uses WGS84 coordinates (`x = longitude`,
    /// `y = latitude`); boundary contact counts as intersecting.
    pub fn edges_intersecting(&self, rect: &Rect<f64>) -> Vec<&Edge> {
        self.index
            .locate_in_envelope_intersecting(&envelope_of(rect))
            .filter_map(|entry| self.edge(entry.id))
            .collect()
    }

    /// The edge closest to `location`, if the graph has any edges.
    pub fn nearest_edge(&self, location: Coord<f64>) -> Option<&Edge> {
        self.index
            .nearest_neighbor(&[location.x, location.y])
            .and_then(|entry| self.edge(entry.id))
    }

    /// Number of temporary links currently held by live searches.
    pub fn temporary_link_count(&self) -> usize {
        self.links
            .live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(Vec::len)
            .sum()
    }

    /// Register links for one search and return the registration key.
    pub(crate) fn register_links(&self, links: Vec<TemporaryLink>) -> u64 {
        let key = self.links.next_id.fetch_add(1, Ordering::Relaxed);
        self.links
            .live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, links);
        key
    }

    /// Release every link registered under `key`.
    pub(crate) fn release_links(&self, key: u64) {
        self.links
            .live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key);
    }
}

/// Incremental graph construction.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    vertices: Vec<Vertex>,
    edges: Vec<Edge>,
}

impl GraphBuilder {
    /// Add a vertex and return its identity.
    pub fn add_vertex(&mut self, label: impl Into<String>, location: Coord<f64>) -> VertexId {
        let id = VertexId(self.vertices.len());
        self.vertices.push(Vertex {
            id,
            label: label.into(),
            location,
        });
        id
    }

    /// Add a directed edge with explicit geometry.
    pub fn add_edge(
        &mut self,
        from: VertexId,
        to: VertexId,
        label: impl Into<String>,
        geometry: LineString<f64>,
    ) -> Result<EdgeId, GraphError> {
        let label = label.into();
        for vertex in [from, to] {
            if vertex.index() >= self.vertices.len() {
                return Err(GraphError::UnknownVertex(vertex));
            }
        }
        if geometry.0.len() < 2 {
            return Err(GraphError::DegenerateGeometry { label });
        }
        let id = EdgeId(self.edges.len());
        self.edges.push(Edge {
            id,
            from,
            to,
            label,
            geometry,
            alerts: RwLock::new(Arc::from(Vec::new())),
        });
        Ok(id)
    }

    /// Add a directed edge drawn as a straight line between its vertices.
    pub fn add_straight_edge(
        &mut self,
        from: VertexId,
        to: VertexId,
        label: impl Into<String>,
    ) -> Result<EdgeId, GraphError> {
        let start = self
            .vertices
            .get(from.index())
            .ok_or(GraphError::UnknownVertex(from))?
            .location;
        let end = self
            .vertices
            .get(to.index())
            .ok_or(GraphError::UnknownVertex(to))?
            .location;
        self.add_edge(from, to, label, LineString::new(vec![start, end]))
    }

    /// Finish construction and index edge geometry.
    pub fn build(self) -> Graph {
        let entries = self
            .edges
            .iter()
            .filter_map(|edge| IndexedEdge::new(edge.id, &edge.geometry))
            .collect();
        Graph {
            vertices: self.vertices,
            edges: self.edges,
            index: build_edge_index(entries),
            links: TemporaryLinks::default(),
        }
    }
}

/// Exclusive write access to the graph's alert sets.
///
/// A writer is only handed to tasks running on the
/// [`UpdateManager`](crate::UpdateManager) worker, so at most one exists at a
/// time. Every edit replaces one edge's alert set as a unit.
#[derive(Debug)]
pub struct GraphWriter<'g> {
    graph: &'g Graph,
    replacements: usize,
}

impl<'g> GraphWriter<'g> {
    pub(crate) const fn new(graph: &'g Graph) -> Self {
        Self {
            graph,
            replacements: 0,
        }
    }

    /// Read access to the graph being written.
    pub const fn graph(&self) -> &'g Graph {
        self.graph
    }

    /// Replace an edge's alert set wholesale.
    pub fn replace_alerts(&mut self, edge: EdgeId, alerts: Vec<Alert>) -> Result<(), GraphError> {
        let target = self.graph.edge(edge).ok_or(GraphError::UnknownEdge(edge))?;
        target.store_alerts(Arc::from(alerts));
        self.replacements += 1;
        Ok(())
    }

    /// Derive a new alert set from the current one and swap it in.
    pub fn update_alerts<F>(&mut self, edge: EdgeId, derive: F) -> Result<(), GraphError>
    where
        F: FnOnce(&[Alert]) -> Vec<Alert>,
    {
        let target = self.graph.edge(edge).ok_or(GraphError::UnknownEdge(edge))?;
        let next = derive(&target.alerts());
        target.store_alerts(Arc::from(next));
        self.replacements += 1;
        Ok(())
    }

    /// Number of alert-set replacements made through this writer.
    pub const fn replacements(&self) -> usize {
        self.replacements
    }
}
