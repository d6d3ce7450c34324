//! Display normalization applied to upstream values.

use crate::error::{AggregationError, Result};
use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime, TimeZone};
use chrono_tz::Tz;
use log::debug;

const NAIVE_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"];

/// Nearest whole degree, halves away from zero.
pub fn round_celsius(temp: f64) -> i32 {
    temp.round() as i32
}

/// Parse an ISO-8601 timestamp and express it in `zone`.
///
/// Timestamps with an offset name an instant and are converted. Timestamps
/// without one are wall-clock times at the airport and keep their clock; the
/// zone is only attached. An absent or unknown zone means UTC.
pub fn localize(iso: &str, zone: Option<&str>) -> Result<DateTime<Tz>> {
    let tz = zone_or_utc(zone);
    match parse(iso)? {
        Timestamp::Instant(at) => Ok(at.with_timezone(&tz)),
        Timestamp::WallClock(naive) => attach_zone(naive, tz, iso),
    }
}

/// `localize` rendered as RFC 3339.
pub fn localize_timestamp(iso: &str, zone: Option<&str>) -> Result<String> {
    Ok(localize(iso, zone)?.to_rfc3339())
}

enum Timestamp {
    Instant(DateTime<FixedOffset>),
    WallClock(NaiveDateTime),
}

fn parse(iso: &str) -> Result<Timestamp> {
    let trimmed = iso.trim();
    if let Ok(with_offset) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(Timestamp::Instant(with_offset));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(trimmed, format).ok())
        .map(Timestamp::WallClock)
        .ok_or_else(|| AggregationError::Malformed(format!("not an ISO-8601 timestamp: '{}'", iso)))
}

fn zone_or_utc(zone: Option<&str>) -> Tz {
    match zone {
        Some(name) => name.parse::<Tz>().unwrap_or_else(|_| {
            debug!("Unknown time zone '{}', keeping UTC", name);
            Tz::UTC
        }),
        None => Tz::UTC,
    }
}

/// Ambiguous clocks (DST fall-back) take the earlier instant. A clock inside a
/// spring-forward gap is moved past the gap.
fn attach_zone(naive: NaiveDateTime, tz: Tz, iso: &str) -> Result<DateTime<Tz>> {
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(naive + Duration::hours(1))).earliest())
        .ok_or_else(|| {
            AggregationError::Malformed(format!("'{}' does not exist in {}", iso, tz.name()))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_round_celsius() {
        assert_eq!(round_celsius(24.6), 25);
        assert_eq!(round_celsius(24.4), 24);
        assert_eq!(round_celsius(24.5), 25);
        assert_eq!(round_celsius(-3.5), -4);
        assert_eq!(round_celsius(-0.2), 0);
    }

    #[test]
    fn test_offset_timestamp_converted_to_zone() {
        assert_eq!(
            localize_timestamp("2026-11-02T08:00:00Z", Some("Asia/Karachi")).unwrap(),
            "2026-11-02T13:00:00+05:00"
        );
        assert_eq!(
            localize_timestamp("2026-11-02T08:00:00+01:00", Some("Asia/Karachi")).unwrap(),
            "2026-11-02T12:00:00+05:00"
        );
    }

    #[test]
    fn test_naive_timestamp_keeps_wall_clock() {
        assert_eq!(
            localize_timestamp("2026-11-02T08:00:00", Some("Asia/Karachi")).unwrap(),
            "2026-11-02T08:00:00+05:00"
        );
        assert_eq!(
            localize_timestamp("2026-07-01T22:15", Some("Europe/Paris")).unwrap(),
            "2026-07-01T22:15:00+02:00"
        );
    }

    #[test]
    fn test_naive_timestamp_across_dst_change() {
        // 02:30 happens twice on the fall-back night; the first one wins.
        assert_eq!(
            localize_timestamp("2026-10-25T02:30:00", Some("Europe/Paris")).unwrap(),
            "2026-10-25T02:30:00+02:00"
        );
        // 02:30 never happens on the spring-forward night.
        assert_eq!(
            localize_timestamp("2026-03-29T02:30:00", Some("Europe/Paris")).unwrap(),
            "2026-03-29T03:30:00+02:00"
        );
    }

    #[test]
    fn test_missing_or_unknown_zone_stays_utc() {
        assert_eq!(
            localize_timestamp("2026-11-02T08:00:00", None).unwrap(),
            "2026-11-02T08:00:00+00:00"
        );
        assert_eq!(
            localize_timestamp("2026-11-02T08:00:00", Some("Mars/Olympus")).unwrap(),
            "2026-11-02T08:00:00+00:00"
        );
    }

    #[test]
    fn test_garbage_is_malformed() {
        assert!(matches!(
            localize_timestamp("next tuesday", None),
            Err(AggregationError::Malformed(_))
        ));
    }
}
