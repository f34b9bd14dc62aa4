//! Shared primitive types for the integration bridge.
//!
//! These types are deliberately small and dependency-light so every other crate in the
//! workspace can use them without pulling in parsing or storage concerns:
//! - [`NonEmptyText`] for identifiers and display names that must carry content
//! - [`Checksum`] for content-addressing transformation inputs in the audit log
//! - [`TimestampId`] for time-ordered identifiers of logs, events and alerts

mod checksum;
mod timestamp_id;

pub use checksum::Checksum;
pub use timestamp_id::TimestampId;

/// Errors that can occur when creating validated primitive types.
#[derive(Debug, thiserror::Error)]
pub enum TypesError {
    /// The input text was empty or contained only whitespace
    #[error("Text cannot be empty")]
    EmptyText,

    /// A checksum was not 64 lowercase hex characters
    #[error("Invalid checksum: {0}")]
    InvalidChecksum(String),

    /// A timestamp identifier did not match `YYYYMMDDTHHMMSS.mmmZ-<uuid>`
    #[error("Invalid timestamp id: {0}")]
    InvalidTimestampId(String),
}

/// Result type for primitive type construction.
pub type TypesResult<T> = Result<T, TypesError>;

/// A string type that guarantees non-empty content.
///
/// This type wraps a `String` and ensures it contains at least one non-whitespace character.
/// The input is automatically trimmed of leading and trailing whitespace during construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NonEmptyText(String);

impl NonEmptyText {
    /// Creates a new `NonEmptyText` from the given input.
    ///
    /// The input is trimmed of leading and trailing whitespace. If the trimmed
    /// result is empty, an error is returned.
    ///
    /// # Errors
    ///
    /// Returns [`TypesError::EmptyText`] if the input is empty or contains only whitespace.
    pub fn new(input: impl AsRef<str>) -> TypesResult<Self> {
        let trimmed = input.as_ref().trim();
        if trimmed.is_empty() {
            return Err(TypesError::EmptyText);
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// Returns the inner string as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NonEmptyText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for NonEmptyText {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for NonEmptyText {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl serde::Serialize for NonEmptyText {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for NonEmptyText {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        NonEmptyText::new(&s).map_err(serde::de::Error::custom)
    }
}
