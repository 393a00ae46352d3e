//! R\*-tree entries for edge lookups.
//!
//! Each entry stores the edge's bounding box so envelope queries stay cheap;
//! exact geometry tests happen against the owning [`Graph`](super::Graph).

use geo::{BoundingRect, Distance, Euclidean, LineString, Point, Rect};
use rstar::{AABB, PointDistance, RTree, RTreeObject};

use super::EdgeId;

/// Spatial index entry referencing an edge by identity.
#[derive(Debug, Clone)]
pub(crate) struct IndexedEdge {
    pub(crate) id: EdgeId,
    geometry: LineString<f64>,
    aabb: AABB<[f64; 2]>,
}

impl IndexedEdge {
    pub(crate) fn new(id: EdgeId, geometry: &LineString<f64>) -> Option<Self> {
        let rect = geometry.bounding_rect()?;
        Some(Self {
            id,
            geometry: geometry.clone(),
            aabb: AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]),
        })
    }
}

impl RTreeObject for IndexedEdge {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.aabb
    }
}

impl PointDistance for IndexedEdge {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let distance = Euclidean.distance(&Point::from(*point), &self.geometry);
        distance * distance
    }
}

/// Build the edge index in one pass.
pub(crate) fn build_edge_index(entries: Vec<IndexedEdge>) -> RTree<IndexedEdge> {
    RTree::bulk_load(entries)
}

/// Convert a `geo` rectangle into an R\*-tree envelope.
pub(crate) fn envelope_of(rect: &Rect<f64>) -> AABB<[f64; 2]> {
    AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y])
}
