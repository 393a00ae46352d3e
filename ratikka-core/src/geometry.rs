//! Planar distance helpers for matching feed geometries against edges.
//!
//! Coordinates are WGS84 degrees (`x = longitude`, `y = latitude`). The
//! helpers work in degree space, which is accurate enough for the short
//! tolerances used when snapping alerts and request endpoints to edges.

use geo::{BoundingRect, Coord, Distance, Euclidean, Geometry, LineString, Rect};

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_010.0;

/// Convert a distance in meters to degrees of arc along a great circle.
///
/// # Examples
/// ```
/// use ratikka_core::geometry::meters_to_degrees;
///
/// let one_km = meters_to_degrees(1_000.0);
/// assert!((one_km - 0.008_993).abs() < 1e-6);
/// ```
pub fn meters_to_degrees(meters: f64) -> f64 {
    meters / (std::f64::consts::PI / 180.0 * EARTH_RADIUS_M)
}

/// Grow a rectangle by `margin` on every side.
pub fn expand_rect(rect: Rect<f64>, margin: f64) -> Rect<f64> {
    let min = rect.min();
    let max = rect.max();
    Rect::new(
        Coord {
            x: min.x - margin,
            y: min.y - margin,
        },
        Coord {
            x: max.x + margin,
            y: max.y + margin,
        },
    )
}

/// Search envelope for `geometry` buffered by `radius` degrees.
///
/// Returns `None` for empty geometries.
pub fn buffered_envelope(geometry: &Geometry<f64>, radius: f64) -> Option<Rect<f64>> {
    geometry
        .bounding_rect()
        .map(|rect| expand_rect(rect, radius))
}

/// Whether `edge` lies within `radius` of `geometry`.
pub fn within_distance(geometry: &Geometry<f64>, edge: &LineString<f64>, radius: f64) -> bool {
    Euclidean.distance(geometry, &Geometry::LineString(edge.clone())) <= radius
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{Point, Polygon, line_string};
    use rstest::rstest;

    fn edge() -> LineString<f64> {
        line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0)]
    }

    #[rstest]
    #[case::on_edge(Point::new(0.5, 0.0), 0.0, true)]
    #[case::inside_radius(Point::new(0.5, 0.05), 0.1, true)]
    #[case::outside_radius(Point::new(0.5, 0.2), 0.1, false)]
    #[case::beyond_end(Point::new(1.05, 0.0), 0.1, true)]
    fn point_matches_edge_within_radius(
        #[case] point: Point<f64>,
        #[case] radius: f64,
        #[case] expected: bool,
    ) {
        assert_eq!(
            within_distance(&Geometry::Point(point), &edge(), radius),
            expected
        );
    }

    #[rstest]
    fn polygon_containing_edge_matches() {
        let polygon = Polygon::new(
            line_string![
                (x: -1.0, y: -1.0),
                (x: 2.0, y: -1.0),
                (x: 2.0, y: 1.0),
                (x: -1.0, y: 1.0),
                (x: -1.0, y: -1.0),
            ],
            vec![],
        );
        assert!(within_distance(&Geometry::Polygon(polygon), &edge(), 0.0));
    }

    #[rstest]
    fn parallel_line_matches_only_inside_radius() {
        let parallel = Geometry::LineString(line_string![(x: 0.0, y: 0.3), (x: 1.0, y: 0.3)]);
        assert!(within_distance(&parallel, &edge(), 0.31));
        assert!(!within_distance(&parallel, &edge(), 0.29));
    }

    #[rstest]
    fn thirty_meters_is_a_fraction_of_a_millidegree() {
        let degrees = meters_to_degrees(30.0);
        assert!(degrees > 0.000_26 && degrees < 0.000_28, "got {degrees}");
    }

    #[rstest]
    fn buffered_envelope_grows_on_every_side() {
        let rect = buffered_envelope(&Geometry::Point(Point::new(1.0, 2.0)), 0.5)
            .expect("points have an envelope");
        assert_eq!(rect.min(), Coord { x: 0.5, y: 1.5 });
        assert_eq!(rect.max(), Coord { x: 1.5, y: 2.5 });
    }

    #[rstest]
    #[case::crossing(line_string![(x: 0.5, y: -1.0), (x: 0.5, y: 1.0)], 0.0, true)]
    #[case::past_the_end(line_string![(x: 1.2, y: -1.0), (x: 1.2, y: 1.0)], 0.25, true)]
    #[case::past_the_end_too_far(line_string![(x: 1.2, y: -1.0), (x: 1.2, y: 1.0)], 0.15, false)]
    fn line_matches_edge_by_closest_approach(
        #[case] line: LineString<f64>,
        #[case] radius: f64,
        #[case] expected: bool,
    ) {
        assert_eq!(
            within_distance(&Geometry::LineString(line), &edge(), radius),
            expected
        );
    }

    #[rstest]
    fn polygon_ring_near_edge_matches() {
        let polygon = Polygon::new(
            line_string![
                (x: 0.2, y: 0.1),
                (x: 0.8, y: 0.1),
                (x: 0.8, y: 0.5),
                (x: 0.2, y: 0.5),
                (x: 0.2, y: 0.1),
            ],
            vec![],
        );
        let geometry = Geometry::Polygon(polygon);
        assert!(within_distance(&geometry, &edge(), 0.11));
        assert!(!within_distance(&geometry, &edge(), 0.09));
    }
}
