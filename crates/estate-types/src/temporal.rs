use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Wall-clock time of a successful write, in milliseconds since the UNIX
/// epoch.
///
/// Serialized as a bare integer so every backend and every backup stream
/// uses the same representation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Create a timestamp from epoch milliseconds.
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// The current wall-clock time.
    pub fn now() -> Self {
        Self(Utc::now().timestamp_millis())
    }

    /// The epoch (`0`).
    pub const fn epoch() -> Self {
        Self(0)
    }

    /// Milliseconds since the UNIX epoch.
    pub const fn as_millis(&self) -> i64 {
        self.0
    }

    /// Convert to a UTC date-time.
    pub fn to_datetime(&self) -> Result<DateTime<Utc>, TypeError> {
        DateTime::from_timestamp_millis(self.0).ok_or(TypeError::TimestampOutOfRange(self.0))
    }

    /// RFC 3339 rendering, or the raw millisecond count when out of range.
    pub fn to_rfc3339(&self) -> String {
        match self.to_datetime() {
            Ok(dt) => dt.to_rfc3339_opts(SecondsFormat::Millis, true),
            Err(_) => self.0.to_string(),
        }
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self(dt.timestamp_millis())
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({}ms)", self.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_produces_reasonable_timestamp() {
        // After 2020-01-01
        assert!(Timestamp::now().as_millis() > 1_577_836_800_000);
    }

    #[test]
    fn ordering_follows_millis() {
        assert!(Timestamp::from_millis(1) < Timestamp::from_millis(2));
        assert!(Timestamp::epoch() < Timestamp::from_millis(1));
    }

    #[test]
    fn display_is_rfc3339() {
        let ts = Timestamp::from_millis(1_000);
        assert_eq!(ts.to_string(), "1970-01-01T00:00:01.000Z");
    }

    #[test]
    fn serializes_as_integer() {
        let ts = Timestamp::from_millis(1_700_000_000_123);
        let json = serde_json::to_string(&ts).unwrap();
        assert_eq!(json, "1700000000123");
        let parsed: Timestamp = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, ts);
    }

    #[test]
    fn out_of_range_falls_back_to_millis() {
        let ts = Timestamp::from_millis(i64::MAX);
        assert!(ts.to_datetime().is_err());
        assert_eq!(ts.to_rfc3339(), i64::MAX.to_string());
    }
}
