//! Time-prefixed identifiers.

use crate::{TypesError, TypesResult};
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use std::{fmt, str::FromStr};
use uuid::Uuid;

const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%.3f";

/// A time-prefixed unique identifier.
///
/// Format:
/// `YYYYMMDDTHHMMSS.mmmZ-<32 lowercase hex uuid>`
///
/// Example:
/// `20260111T143522.045Z-550e8400e29b41d4a716446655440000`
///
/// Sorting the string form sorts by creation time, which keeps append-only logs and
/// alert lists naturally ordered.
///
/// # Monotonicity Guarantee
///
/// When calling [`TimestampId::generate`] with the previously issued id, the timestamp is
/// guaranteed to be strictly greater than the previous one (incremented by 1ms if the
/// clock has not advanced). Callers that need ordering must generate inside the same lock
/// that guards the sequence they append to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TimestampId {
    timestamp: DateTime<Utc>,
    uuid: Uuid,
}

impl TimestampId {
    /// Generate a new identifier, strictly after `last` when provided.
    pub fn generate(last: Option<&TimestampId>) -> Self {
        // Millisecond precision matches the rendered form.
        let now = truncate_to_millis(Utc::now());

        let timestamp = match last {
            Some(prev) if now <= prev.timestamp => prev.timestamp + Duration::milliseconds(1),
            _ => now,
        };

        Self {
            timestamp,
            uuid: Uuid::new_v4(),
        }
    }

    /// Returns the timestamp component.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Returns the UUID component.
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }
}

fn truncate_to_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    let millis = ts.timestamp_millis();
    DateTime::<Utc>::from_timestamp_millis(millis).unwrap_or(ts)
}

impl FromStr for TimestampId {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ts_str, uuid_str) = s
            .split_once('-')
            .ok_or_else(|| TypesError::InvalidTimestampId(format!("missing '-' in '{s}'")))?;

        let ts_no_z = ts_str.strip_suffix('Z').ok_or_else(|| {
            TypesError::InvalidTimestampId(format!("timestamp must end with 'Z': '{ts_str}'"))
        })?;

        let naive = NaiveDateTime::parse_from_str(ts_no_z, TIMESTAMP_FORMAT).map_err(|e| {
            TypesError::InvalidTimestampId(format!("invalid timestamp '{ts_str}': {e}"))
        })?;

        let canonical_uuid = uuid_str.len() == 32
            && uuid_str
                .bytes()
                .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        if !canonical_uuid {
            return Err(TypesError::InvalidTimestampId(format!(
                "uuid must be 32 lowercase hex characters, got '{uuid_str}'"
            )));
        }
        let uuid = Uuid::parse_str(uuid_str)
            .map_err(|e| TypesError::InvalidTimestampId(format!("invalid uuid: {e}")))?;

        Ok(Self {
            timestamp: DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc),
            uuid,
        })
    }
}

impl TimestampId {
    /// Parses an identifier string.
    pub fn parse(input: &str) -> TypesResult<Self> {
        input.parse()
    }
}

impl fmt::Display for TimestampId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}Z-{}",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.uuid.simple()
        )
    }
}

impl serde::Serialize for TimestampId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for TimestampId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
