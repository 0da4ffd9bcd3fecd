use crate::error::AppError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::sync::Mutex;
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};

/// UTC instant persisted as an RFC3339 string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(OffsetDateTime);

impl Timestamp {
    pub const UNIX_EPOCH: Timestamp = Timestamp(OffsetDateTime::UNIX_EPOCH);

    pub fn now() -> Self {
        Self(OffsetDateTime::now_utc())
    }

    pub fn from_unix_millis(millis: i64) -> Self {
        Self(OffsetDateTime::UNIX_EPOCH + Duration::milliseconds(millis))
    }

    pub fn unix_millis(&self) -> i64 {
        (self.0 - OffsetDateTime::UNIX_EPOCH).whole_milliseconds() as i64
    }

    pub fn parse(raw: &str) -> Result<Self, AppError> {
        OffsetDateTime::parse(raw.trim(), &Rfc3339)
            .map(|value| Self(value.to_offset(time::UtcOffset::UTC)))
            .map_err(|_| AppError::invalid_data("timestamp must be RFC3339"))
    }

    pub fn as_offset_date_time(&self) -> OffsetDateTime {
        self.0
    }

    pub fn plus(&self, duration: Duration) -> Self {
        Self(self.0 + duration)
    }

    pub fn to_rfc3339(&self) -> String {
        self.0
            .format(&Rfc3339)
            .unwrap_or_else(|_| self.unix_millis().to_string())
    }
}

impl From<OffsetDateTime> for Timestamp {
    fn from(value: OffsetDateTime) -> Self {
        Self(value.to_offset(time::UtcOffset::UTC))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_rfc3339())
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let formatted = self.0.format(&Rfc3339).map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&formatted)
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Timestamp::parse(&raw).map_err(|err| serde::de::Error::custom(err.message().to_string()))
    }
}

/// Source of "now" for local edits.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// Clock that only moves when told to. Useful for deterministic sync scenarios.
pub struct ManualClock {
    current: Mutex<Timestamp>,
}

impl ManualClock {
    pub fn at_millis(millis: i64) -> Self {
        Self {
            current: Mutex::new(Timestamp::from_unix_millis(millis)),
        }
    }

    pub fn set_millis(&self, millis: i64) {
        if let Ok(mut current) = self.current.lock() {
            *current = Timestamp::from_unix_millis(millis);
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.current
            .lock()
            .map(|current| *current)
            .unwrap_or(Timestamp::UNIX_EPOCH)
    }
}
