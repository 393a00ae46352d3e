//! Advisory annotations attached to graph edges.
//!
//! An [`Alert`] is an immutable value. Edges never edit an alert in place;
//! the whole alert set of an edge is replaced when anything changes.

use chrono::{DateTime, Utc};
use geo::Geometry;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Identifies where an alert came from.
///
/// Two alerts attached to the same edge describe the same association when
/// their sources are equal, regardless of the rest of their content.
///
/// # Examples
/// ```
/// use ratikka_core::AlertSource;
///
/// let source = AlertSource::new("winkki", "event-17");
/// assert_eq!(source.feed_id, "winkki");
/// assert_eq!(source.to_string(), "winkki:event-17");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AlertSource {
    /// Identifier of the feed that produced the alert.
    pub feed_id: String,
    /// Identifier of the feature within that feed.
    pub external_id: String,
}

impl AlertSource {
    /// Construct a source tag.
    pub fn new(feed_id: impl Into<String>, external_id: impl Into<String>) -> Self {
        Self {
            feed_id: feed_id.into(),
            external_id: external_id.into(),
        }
    }
}

impl std::fmt::Display for AlertSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.feed_id, self.external_id)
    }
}

/// Half-open validity interval `[start, end)`.
///
/// A missing bound is open-ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Validity {
    /// First instant at which the alert applies.
    pub start: Option<DateTime<Utc>>,
    /// First instant at which the alert no longer applies.
    pub end: Option<DateTime<Utc>>,
}

impl Validity {
    /// Construct an interval from optional bounds.
    pub const fn new(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        Self { start, end }
    }

    /// An interval without bounds.
    pub const fn always() -> Self {
        Self::new(None, None)
    }

    /// Whether `instant` falls inside the interval.
    ///
    /// # Examples
    /// ```
    /// use chrono::{Duration, Utc};
    /// use ratikka_core::Validity;
    ///
    /// let now = Utc::now();
    /// let validity = Validity::new(Some(now - Duration::hours(1)), Some(now));
    /// assert!(validity.contains(now - Duration::minutes(1)));
    /// assert!(!validity.contains(now));
    /// ```
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        let started = self.start.is_none_or(|start| start <= instant);
        let not_ended = self.end.is_none_or(|end| instant < end);
        started && not_ended
    }
}

/// A time-bounded advisory annotation on an edge.
///
/// # Examples
/// ```
/// use chrono::Utc;
/// use geo::{Geometry, Point};
/// use ratikka_core::{Alert, AlertSource, Validity};
///
/// let alert = Alert::new(
///     AlertSource::new("winkki", "42"),
///     "Kaivulupa",
///     "street works",
///     Validity::always(),
///     Geometry::Point(Point::new(24.94, 60.17)),
/// );
/// assert!(alert.is_active_at(Utc::now()));
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Alert {
    /// Where the alert came from.
    pub source: AlertSource,
    /// Short summary shown to riders, e.g. the feed's licence type.
    pub header: String,
    /// Longer free-form description.
    pub description: String,
    /// When the alert applies.
    pub validity: Validity,
    /// Geometry of the feature that produced the alert.
    pub geometry: Geometry<f64>,
}

impl Alert {
    /// Construct an alert.
    pub fn new(
        source: AlertSource,
        header: impl Into<String>,
        description: impl Into<String>,
        validity: Validity,
        geometry: Geometry<f64>,
    ) -> Self {
        Self {
            source,
            header: header.into(),
            description: description.into(),
            validity,
            geometry,
        }
    }

    /// Whether the alert applies at `instant`.
    pub fn is_active_at(&self, instant: DateTime<Utc>) -> bool {
        self.validity.contains(instant)
    }
}
