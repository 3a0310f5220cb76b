use std::fmt::{self, Display, Formatter};

use chrono::{DateTime, Local, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{
    Deserialize, Deserializer, Serialize, Serializer,
    de::{self, Visitor},
};

/// A point in time as exchanged with the ticket backend.
///
/// The backend is not consistent about how it renders instants, so decoding
/// accepts RFC 3339 strings, naive ISO-8601 date-times (read in the host's
/// local zone, the way a browser reads them) and epoch milliseconds.
/// Encoding always produces RFC 3339 in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(pub DateTime<Utc>);

impl Timestamp {
    /// Current instant.
    #[must_use]
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Builds a timestamp from milliseconds since the Unix epoch.
    #[must_use]
    pub fn from_millis(millis: i64) -> Option<Self> {
        DateTime::<Utc>::from_timestamp_millis(millis).map(Self)
    }

    /// Parses any of the accepted textual forms.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
            return Some(Self(parsed.with_timezone(&Utc)));
        }

        let naive = value
            .parse::<NaiveDateTime>()
            .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f"))
            .ok()?;
        let utc = Local
            .from_local_datetime(&naive)
            .earliest()
            .map_or_else(|| naive.and_utc(), |local| local.with_timezone(&Utc));
        Some(Self(utc))
    }

    /// The same instant in the host's local zone.
    #[must_use]
    pub fn local(&self) -> DateTime<Local> {
        self.0.with_timezone(&Local)
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(value: DateTime<Utc>) -> Self {
        Self(value)
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.to_rfc3339_opts(SecondsFormat::Millis, true))
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

struct TimestampVisitor;

impl Visitor<'_> for TimestampVisitor {
    type Value = Timestamp;

    fn expecting(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str("an RFC 3339 string, an ISO-8601 local date-time or epoch milliseconds")
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
        Timestamp::parse(value)
            .ok_or_else(|| E::custom(format!("unrecognised timestamp `{value}`")))
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<Self::Value, E> {
        Timestamp::from_millis(value)
            .ok_or_else(|| E::custom(format!("timestamp {value} is out of range")))
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
        let millis = i64::try_from(value)
            .map_err(|_| E::custom(format!("timestamp {value} is out of range")))?;
        self.visit_i64(millis)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn visit_f64<E: de::Error>(self, value: f64) -> Result<Self::Value, E> {
        self.visit_i64(value as i64)
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(TimestampVisitor)
    }
}
