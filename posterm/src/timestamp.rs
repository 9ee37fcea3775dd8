//! Unix timestamp utilities for session expiry.
//!
//! Session descriptors returned by the session authority carry their expiry
//! as seconds since the Unix epoch (`expiresAt`). [`UnixTimestamp`] wraps that
//! value and provides the comparisons the session cache needs.

use serde::de::{self, MapAccess, Unexpected, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};
use std::ops::Add;
use std::time::{Duration, SystemTime};

/// A Unix timestamp representing seconds since the Unix epoch (1970-01-01T00:00:00Z).
///
/// # Serialization
///
/// Serialized as a bare integer. Deserialization also accepts a stringified
/// integer, since some backends quote 64-bit values to protect `JavaScript`
/// clients from precision loss.
///
/// ```json
/// 1722496898
/// ```
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Ord, Eq, Hash)]
pub struct UnixTimestamp(u64);

impl Serialize for UnixTimestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.0)
    }
}

impl<'de> Deserialize<'de> for UnixTimestamp {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(UnixTimestampVisitor)
    }
}

struct UnixTimestampVisitor;

impl<'de> Visitor<'de> for UnixTimestampVisitor {
    type Value = UnixTimestamp;

    fn expecting(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("a non-negative integer or a string holding one")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        Ok(UnixTimestamp(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        u64::try_from(v)
            .map(UnixTimestamp)
            .map_err(|_| E::invalid_value(Unexpected::Signed(v), &self))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        v.parse::<u64>()
            .map(UnixTimestamp)
            .map_err(|_| E::invalid_value(Unexpected::Str(v), &self))
    }

    /// JSON numbers arrive as a single-entry map when `serde_json` keeps
    /// their exact text.
    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let Some((_, text)) = map.next_entry::<String, String>()? else {
            return Err(de::Error::invalid_length(0, &self));
        };
        self.visit_str(&text)
    }
}

impl Display for UnixTimestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Add<Duration> for UnixTimestamp {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        Self(self.0.saturating_add(rhs.as_secs()))
    }
}

impl UnixTimestamp {
    /// Creates a new [`UnixTimestamp`] from a raw seconds value.
    #[must_use]
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs)
    }

    /// Returns the current system time as a [`UnixTimestamp`].
    ///
    /// A clock set before the Unix epoch reads as the epoch itself.
    #[must_use]
    pub fn now() -> Self {
        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Self(now)
    }

    /// Returns the timestamp as raw seconds since the Unix epoch.
    #[must_use]
    pub const fn as_secs(&self) -> u64 {
        self.0
    }

    /// Returns `true` if this instant is at or before `now`.
    #[must_use]
    pub fn has_passed(&self, now: Self) -> bool {
        *self <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_number_and_string() {
        let a: UnixTimestamp = serde_json::from_str("1722496898").unwrap();
        let b: UnixTimestamp = serde_json::from_str("\"1722496898\"").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_secs(), 1_722_496_898);
    }

    #[test]
    fn test_deserialize_inside_json_object() {
        #[derive(Deserialize)]
        struct Payload {
            #[serde(rename = "expiresAt")]
            expires_at: UnixTimestamp,
        }
        let parsed: Payload = serde_json::from_str(r#"{"expiresAt": 1722496898}"#).unwrap();
        assert_eq!(parsed.expires_at.as_secs(), 1_722_496_898);
        let value: UnixTimestamp =
            serde_json::from_value(serde_json::json!(1_722_496_898_u64)).unwrap();
        assert_eq!(value, parsed.expires_at);
    }

    #[test]
    fn test_deserialize_rejects_garbage() {
        assert!(serde_json::from_str::<UnixTimestamp>("\"soon\"").is_err());
        assert!(serde_json::from_str::<UnixTimestamp>("-4").is_err());
    }

    #[test]
    fn test_add_duration_and_expiry() {
        let start = UnixTimestamp::from_secs(100);
        let end = start + Duration::from_secs(60);
        assert_eq!(end.as_secs(), 160);
        assert!(!end.has_passed(UnixTimestamp::from_secs(159)));
        assert!(end.has_passed(UnixTimestamp::from_secs(160)));
    }
}
