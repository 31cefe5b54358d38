//! Timezone and datetime helpers
//!
//! Cloud records carry timestamps as strings in a handful of formats. These
//! helpers parse them into timezone aware values and render durations for
//! humans.

use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Offset, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::{GeoNetError, Result};

/// UTC timestamp with microseconds and a `Z` suffix
pub const JSON_DATETIME: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";
/// Timestamp with no zone information
pub const ISO8601_DATETIME: &str = "%Y-%m-%dT%H:%M:%S";
pub const ISO8601_DATE: &str = "%Y-%m-%d";

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
];

/// Returns a timezone aware UTC timestamp
pub fn utcnow() -> DateTime<Utc> {
    Utc::now()
}

/// A configured timezone: a fixed offset or a tz database zone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timezone {
    Fixed(FixedOffset),
    Named(Tz),
}

impl Timezone {
    pub fn utc() -> Self {
        Timezone::Named(Tz::UTC)
    }

    /// Offset from UTC in effect at `instant`
    pub fn offset_at(&self, instant: DateTime<Utc>) -> FixedOffset {
        match self {
            Timezone::Fixed(offset) => *offset,
            Timezone::Named(tz) => tz.offset_from_utc_datetime(&instant.naive_utc()).fix(),
        }
    }

    /// Attach this zone to a wall clock time; ambiguous times take the
    /// earlier instant and times skipped by a DST jump are rejected
    pub fn localize(&self, naive: NaiveDateTime) -> Option<DateTime<FixedOffset>> {
        match self {
            Timezone::Fixed(offset) => offset.from_local_datetime(&naive).earliest(),
            Timezone::Named(tz) => tz
                .from_local_datetime(&naive)
                .earliest()
                .map(|ts| ts.with_timezone(&ts.offset().fix())),
        }
    }
}

impl fmt::Display for Timezone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timezone::Fixed(offset) => write!(f, "{}", offset),
            Timezone::Named(tz) => write!(f, "{}", tz.name()),
        }
    }
}

/// Resolve a configured timezone name.
///
/// Accepts tz database names (`America/New_York`), `UTC`, `Z` or an
/// explicit `+HH:MM` / `-HH:MM` offset.
pub fn resolve_timezone(name: &str) -> Result<Timezone> {
    let name = name.trim();
    if name.is_empty() || name.eq_ignore_ascii_case("utc") || name == "Z" {
        return Ok(Timezone::utc());
    }

    let (sign, rest) = match name.as_bytes().first() {
        Some(b'+') => (1, &name[1..]),
        Some(b'-') => (-1, &name[1..]),
        _ => {
            return name.parse::<Tz>().map(Timezone::Named).map_err(|_| {
                GeoNetError::Configuration(format!("unknown timezone '{}'", name))
            })
        }
    };

    let (hours, minutes) = rest.split_once(':').unwrap_or((rest, "0"));
    let hours: i32 = hours
        .parse()
        .map_err(|_| GeoNetError::Configuration(format!("invalid timezone offset '{}'", name)))?;
    let minutes: i32 = minutes
        .parse()
        .map_err(|_| GeoNetError::Configuration(format!("invalid timezone offset '{}'", name)))?;

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
        .map(Timezone::Fixed)
        .ok_or_else(|| GeoNetError::Configuration(format!("timezone offset out of range '{}'", name)))
}

/// Parse a timestamp string into a timezone aware datetime.
///
/// Timestamps that carry an offset keep their instant; naive timestamps and
/// plain dates are localized to `timezone`.
pub fn parse_datetime(value: &str, timezone: Timezone) -> Result<DateTime<FixedOffset>> {
    let value = value.trim();

    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts);
    }
    if let Ok(ts) = DateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Ok(ts);
    }

    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, fmt) {
            return localize(naive, timezone, value);
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(value, ISO8601_DATE) {
        let naive = date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| GeoNetError::Timestamp(value.to_string()))?;
        return localize(naive, timezone, value);
    }

    Err(GeoNetError::Timestamp(value.to_string()))
}

/// Parse a timestamp and convert it to UTC, treating naive values as UTC
pub fn parse_utc(value: &str) -> Result<DateTime<Utc>> {
    parse_datetime(value, Timezone::utc()).map(|ts| ts.with_timezone(&Utc))
}

fn localize(naive: NaiveDateTime, timezone: Timezone, raw: &str) -> Result<DateTime<FixedOffset>> {
    timezone
        .localize(naive)
        .ok_or_else(|| GeoNetError::Timestamp(raw.to_string()))
}

/// Render a number of seconds as "2 days 3 hours 4 minutes".
///
/// Seconds are only shown for durations under an hour.
pub fn humanize_duration(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let days = seconds / 86_400;
    let hours = (seconds % 86_400) / 3_600;
    let minutes = (seconds % 3_600) / 60;
    let secs = seconds % 60;

    let mut parts = Vec::new();
    for (value, unit) in [(days, "day"), (hours, "hour"), (minutes, "minute")] {
        if value > 0 {
            parts.push(plural(value, unit));
        }
    }
    if seconds < 3_600 && (secs > 0 || parts.is_empty()) {
        parts.push(plural(secs, "second"));
    }

    parts.join(" ")
}

fn plural(value: i64, unit: &str) -> String {
    if value == 1 {
        format!("{} {}", value, unit)
    } else {
        format!("{} {}s", value, unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_parse_aware_timestamp_keeps_instant() {
        let ts = parse_datetime("2017-07-07T07:42:42.013244-04:00", Timezone::utc()).unwrap();
        let ts = ts.with_timezone(&Utc);
        assert_eq!(ts.hour(), 11);
        assert_eq!(ts.nanosecond(), 13_244_000);
    }

    #[test]
    fn test_parse_naive_localizes() {
        let est = resolve_timezone("-05:00").unwrap();
        let ts = parse_datetime("2018-01-17T12:00:00", est).unwrap();
        assert_eq!(ts.offset().local_minus_utc(), -5 * 3600);
        assert_eq!(ts.with_timezone(&Utc).hour(), 17);
    }

    #[test]
    fn test_parse_aws_creation_date() {
        let ts = parse_utc("2018-03-08T17:01:52.000Z").unwrap();
        assert_eq!(ts.year(), 2018);
        assert_eq!(ts.minute(), 1);
    }

    #[test]
    fn test_parse_plain_date() {
        let ts = parse_utc("2017-07-01").unwrap();
        assert_eq!(ts.day(), 1);
        assert_eq!(ts.hour(), 0);
    }

    #[test]
    fn test_parse_garbage() {
        assert!(matches!(parse_utc("yesterday"), Err(GeoNetError::Timestamp(_))));
    }

    #[test]
    fn test_resolve_timezone() {
        let india = resolve_timezone("+05:30").unwrap();
        assert_eq!(india.offset_at(utcnow()).local_minus_utc(), 19_800);
        assert_eq!(resolve_timezone("utc").unwrap(), Timezone::utc());
        assert!(resolve_timezone("Mars/Olympus").is_err());
    }

    #[test]
    fn test_resolve_named_timezone() {
        let eastern = resolve_timezone("America/New_York").unwrap();
        assert_eq!(eastern.to_string(), "America/New_York");

        let winter = Utc.with_ymd_and_hms(2018, 1, 17, 12, 0, 0).unwrap();
        let summer = Utc.with_ymd_and_hms(2018, 7, 17, 12, 0, 0).unwrap();
        assert_eq!(eastern.offset_at(winter).local_minus_utc(), -5 * 3600);
        assert_eq!(eastern.offset_at(summer).local_minus_utc(), -4 * 3600);

        let ts = parse_datetime("2018-07-17T08:00:00", eastern).unwrap();
        assert_eq!(ts.with_timezone(&Utc), summer);
    }

    #[test]
    fn test_humanize_duration() {
        assert_eq!(humanize_duration(0), "0 seconds");
        assert_eq!(humanize_duration(61), "1 minute 1 second");
        assert_eq!(humanize_duration(90_061), "1 day 1 hour 1 minute");
        assert_eq!(humanize_duration(7_200), "2 hours");
    }
}
