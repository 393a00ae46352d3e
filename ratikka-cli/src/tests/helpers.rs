//! Test helpers for building probe inputs.

use chrono::{DateTime, Duration, TimeZone, Utc};
use geo::Coord;
use ratikka_updater::Feature;
use ratikka_updater::test_support::winkki_feature;

pub(super) const FEED_URL: &str = "http://localhost:8080/wfs";

pub(super) fn noon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0)
        .single()
        .expect("valid timestamp")
}

/// One work active at noon and one that ended an hour before.
pub(super) fn snapshot() -> Vec<Feature> {
    let location = Coord { x: 24.935, y: 60.17 };
    vec![
        winkki_feature(
            "2024-0001",
            "Kaivulupa",
            location,
            Some(noon() - Duration::hours(1)),
            Some(noon() + Duration::hours(1)),
        ),
        winkki_feature(
            "2024-0002",
            "Aluevuokraus",
            location,
            Some(noon() - Duration::hours(3)),
            Some(noon() - Duration::hours(1)),
        ),
    ]
}
