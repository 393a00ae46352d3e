//! GeoJSON response model for WFS `GetFeature` with JSON output.
//!
//! See: <https://datatracker.ietf.org/doc/html/rfc7946>

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use geo::{
    Coord, Geometry, GeometryCollection, LineString, MultiLineString, MultiPoint, MultiPolygon,
    Point, Polygon,
};
use log::{debug, warn};
use serde::Deserialize;
use serde_json::{Map, Value};

use super::{Feature, FeedError, value_text};
use crate::AttributeMapping;

/// A GeoJSON position: longitude, latitude and optional extra ordinates.
type Position = Vec<f64>;

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    #[serde(default)]
    features: Vec<GeoJsonFeature>,
}

#[derive(Debug, Deserialize)]
struct GeoJsonFeature {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    geometry: Option<GeoJsonGeometry>,
    #[serde(default)]
    properties: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum GeoJsonGeometry {
    Point { coordinates: Position },
    MultiPoint { coordinates: Vec<Position> },
    LineString { coordinates: Vec<Position> },
    MultiLineString { coordinates: Vec<Vec<Position>> },
    Polygon { coordinates: Vec<Vec<Position>> },
    MultiPolygon { coordinates: Vec<Vec<Vec<Position>>> },
    GeometryCollection { geometries: Vec<GeoJsonGeometry> },
}

impl GeoJsonGeometry {
    fn into_geo(self) -> Result<Geometry<f64>, FeedError> {
        Ok(match self {
            Self::Point { coordinates } => Geometry::Point(Point(coord(&coordinates)?)),
            Self::MultiPoint { coordinates } => Geometry::MultiPoint(MultiPoint(
                coordinates
                    .iter()
                    .map(|position| coord(position).map(Point))
                    .collect::<Result<_, _>>()?,
            )),
            Self::LineString { coordinates } => Geometry::LineString(line_string(&coordinates)?),
            Self::MultiLineString { coordinates } => Geometry::MultiLineString(MultiLineString(
                coordinates
                    .iter()
                    .map(|line| line_string(line))
                    .collect::<Result<_, _>>()?,
            )),
            Self::Polygon { coordinates } => Geometry::Polygon(polygon(&coordinates)?),
            Self::MultiPolygon { coordinates } => Geometry::MultiPolygon(MultiPolygon(
                coordinates
                    .iter()
                    .map(|rings| polygon(rings))
                    .collect::<Result<_, _>>()?,
            )),
            Self::GeometryCollection { geometries } => {
                Geometry::GeometryCollection(GeometryCollection(
                    geometries
                        .into_iter()
                        .map(Self::into_geo)
                        .collect::<Result<_, _>>()?,
                ))
            }
        })
    }
}

fn coord(position: &[f64]) -> Result<Coord<f64>, FeedError> {
    match position {
        [x, y, ..] => Ok(Coord { x: *x, y: *y }),
        _ => Err(FeedError::Parse {
            message: format!("position needs two ordinates, got {}", position.len()),
        }),
    }
}

fn line_string(positions: &[Position]) -> Result<LineString<f64>, FeedError> {
    positions
        .iter()
        .map(|position| coord(position))
        .collect::<Result<Vec<_>, _>>()
        .map(LineString::new)
}

fn polygon(rings: &[Vec<Position>]) -> Result<Polygon<f64>, FeedError> {
    let mut rings = rings.iter().map(|ring| line_string(ring));
    let exterior = rings.next().transpose()?.unwrap_or_else(|| LineString::new(Vec::new()));
    let interiors = rings.collect::<Result<Vec<_>, _>>()?;
    Ok(Polygon::new(exterior, interiors))
}

/// Parse a feed timestamp as UTC.
///
/// Accepts RFC 3339, a naive date-time (`T` or space separated, optional
/// fraction), or a bare date (taken as midnight). A trailing `Z` on the
/// naive forms is ignored, as some WFS servers append one to dates.
///
/// # Examples
/// ```
/// use ratikka_updater::parse_timestamp;
///
/// assert!(parse_timestamp("2024-05-01T08:30:00+03:00").is_some());
/// assert!(parse_timestamp("2024-05-01 08:30:00").is_some());
/// assert!(parse_timestamp("2024-05-01Z").is_some());
/// assert!(parse_timestamp("soon").is_none());
/// ```
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    let naive = text.trim_end_matches('Z');
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .into_iter()
        .find_map(|format| NaiveDateTime::parse_from_str(naive, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(naive, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
        .map(|naive| naive.and_utc())
}

/// Decode a GeoJSON feature collection into feed features.
///
/// Features without geometry or identifier, or with an unreadable validity
/// bound, are skipped with a log entry rather than failing the snapshot.
///
/// # Errors
/// Fails when the body is not a GeoJSON feature collection.
pub fn decode_feature_collection(
    body: &[u8],
    mapping: &AttributeMapping,
) -> Result<Vec<Feature>, FeedError> {
    let collection: FeatureCollection =
        serde_json::from_slice(body).map_err(|err| FeedError::Parse {
            message: err.to_string(),
        })?;
    let total = collection.features.len();
    let features: Vec<Feature> = collection
        .features
        .into_iter()
        .filter_map(|feature| convert(feature, mapping))
        .collect();
    debug!("decoded {} of {total} features", features.len());
    Ok(features)
}

fn convert(feature: GeoJsonFeature, mapping: &AttributeMapping) -> Option<Feature> {
    let attributes: BTreeMap<String, Value> =
        feature.properties.unwrap_or_default().into_iter().collect();
    let external_id = attributes
        .get(&mapping.id)
        .and_then(value_text)
        .or_else(|| feature.id.as_ref().and_then(value_text));
    let Some(external_id) = external_id else {
        warn!("skipping feature without {:?} or id", mapping.id);
        return None;
    };
    let geometry = match feature.geometry.map(GeoJsonGeometry::into_geo) {
        Some(Ok(geometry)) => geometry,
        Some(Err(err)) => {
            warn!("skipping feature {external_id}: {err}");
            return None;
        }
        None => {
            debug!("skipping feature {external_id} without geometry");
            return None;
        }
    };
    let valid_from = bound(&attributes, &mapping.valid_from, &external_id)?;
    let valid_until = bound(&attributes, &mapping.valid_until, &external_id)?;
    Some(Feature {
        external_id,
        geometry,
        attributes,
        valid_from,
        valid_until,
    })
}

/// Read one validity bound. The outer `None` rejects the feature; the inner
/// one means the bound is open.
#[expect(
    clippy::option_option,
    reason = "distinguishes an unreadable bound from an absent one"
)]
fn bound(
    attributes: &BTreeMap<String, Value>,
    name: &str,
    external_id: &str,
) -> Option<Option<DateTime<Utc>>> {
    let Some(text) = attributes.get(name).and_then(value_text) else {
        return Some(None);
    };
    match parse_timestamp(&text) {
        Some(instant) => Some(Some(instant)),
        None => {
            warn!("skipping feature {external_id}: unreadable {name} {text:?}");
            None
        }
    }
}
