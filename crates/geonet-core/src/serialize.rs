//! JSON encoding for persisted state
//!
//! Anything that implements `serde::Serialize` is written through its
//! serialized form. Timestamps get a canonical encoding:
//! - timezone aware values are converted to UTC as `%Y-%m-%dT%H:%M:%S.%6fZ`
//! - naive values are rendered without a zone suffix
//! - plain dates are rendered as `%Y-%m-%d`

use std::fs;
use std::path::Path;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Serialize, Serializer};

use crate::error::Result;
use crate::timez::{ISO8601_DATE, ISO8601_DATETIME, JSON_DATETIME};

/// A timestamp value to be encoded into JSON
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timestamp {
    Aware(DateTime<FixedOffset>),
    Naive(NaiveDateTime),
    Date(NaiveDate),
}

impl Timestamp {
    pub fn encode(&self) -> String {
        match self {
            Timestamp::Aware(ts) => ts.with_timezone(&Utc).format(JSON_DATETIME).to_string(),
            Timestamp::Naive(ts) => ts.format(ISO8601_DATETIME).to_string(),
            Timestamp::Date(date) => date.format(ISO8601_DATE).to_string(),
        }
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(ts: DateTime<Utc>) -> Self {
        Timestamp::Aware(ts.into())
    }
}

impl From<DateTime<FixedOffset>> for Timestamp {
    fn from(ts: DateTime<FixedOffset>) -> Self {
        Timestamp::Aware(ts)
    }
}

impl From<NaiveDateTime> for Timestamp {
    fn from(ts: NaiveDateTime) -> Self {
        Timestamp::Naive(ts)
    }
}

impl From<NaiveDate> for Timestamp {
    fn from(date: NaiveDate) -> Self {
        Timestamp::Date(date)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.encode())
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encode())
    }
}

/// Encode a UTC timestamp into its canonical JSON string
pub fn encode_utc(ts: &DateTime<Utc>) -> String {
    Timestamp::from(*ts).encode()
}

/// Serde `with` module for `DateTime<Utc>` fields in persisted files
pub mod utc_timestamp {
    use chrono::{DateTime, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::encode_utc(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        crate::timez::parse_utc(&raw).map_err(de::Error::custom)
    }
}

/// Serialize any value to a pretty printed JSON string (2 space indent)
pub fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

/// Write a value as JSON to `path`, creating the parent directory if needed.
///
/// The file is replaced wholesale; there is no locking.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, to_json(value)?)?;
    Ok(())
}

/// Read and decode a JSON file
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Serialize)]
    struct Fixture {
        color: &'static str,
        meaning: u32,
    }

    #[test]
    fn test_aware_timestamp_converted_to_utc() {
        let ts = DateTime::parse_from_rfc3339("2017-07-07T07:42:42.013244-04:00").unwrap();
        assert_eq!(Timestamp::from(ts).encode(), "2017-07-07T11:42:42.013244Z");
    }

    #[test]
    fn test_naive_timestamp_has_no_zone() {
        let ts = NaiveDate::from_ymd_opt(2017, 7, 7)
            .unwrap()
            .and_hms_micro_opt(7, 42, 42, 13244)
            .unwrap();
        assert_eq!(Timestamp::from(ts).encode(), "2017-07-07T07:42:42");
    }

    #[test]
    fn test_date_encoding() {
        let date = NaiveDate::from_ymd_opt(2017, 7, 1).unwrap();
        assert_eq!(Timestamp::from(date).encode(), "2017-07-01");
    }

    #[test]
    fn test_nested_encoding() {
        let ts = DateTime::parse_from_rfc3339("2017-07-07T07:42:42.013244-04:00").unwrap();
        let value = json!({
            "fixture": Fixture { color: "red", meaning: 42 },
            "datetime": Timestamp::from(ts),
            "date": Timestamp::from(NaiveDate::from_ymd_opt(2017, 7, 1).unwrap()),
        });
        assert_eq!(value["fixture"], json!({"color": "red", "meaning": 42}));
        assert_eq!(value["datetime"], "2017-07-07T11:42:42.013244Z");
        assert_eq!(value["date"], "2017-07-01");
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("data.json");
        write_json(&path, &json!({"a": [1, 2, 3]})).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("\n  \"a\""));

        let value: serde_json::Value = read_json(&path).unwrap();
        assert_eq!(value["a"][2], 3);
    }
}
