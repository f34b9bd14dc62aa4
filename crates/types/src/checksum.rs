//! Content checksums.
//!
//! Transformation inputs are never stored in the audit log; only their SHA-256 digest is.
//! Identical inputs therefore produce identical log checksums, which is what lets an
//! auditor correlate repeated transform attempts of the same message.

use crate::{TypesError, TypesResult};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Lowercase hex SHA-256 digest (64 characters).
#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Checksum(String);

impl Checksum {
    /// Computes the checksum of `bytes`.
    pub fn of(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(hex::encode(hasher.finalize()))
    }

    /// Validates an externally supplied hex digest.
    ///
    /// # Errors
    ///
    /// Returns [`TypesError::InvalidChecksum`] unless `input` is exactly 64 lowercase hex
    /// characters.
    pub fn parse(input: &str) -> TypesResult<Self> {
        let valid = input.len() == 64
            && input
                .bytes()
                .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        if !valid {
            return Err(TypesError::InvalidChecksum(format!(
                "expected 64 lowercase hex characters, got '{input}'"
            )));
        }
        Ok(Self(input.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Checksum {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Checksum {
    type Error = TypesError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Checksum> for String {
    fn from(value: Checksum) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_of_known_input() {
        let sum = Checksum::of(b"abc");
        assert_eq!(
            sum.as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn identical_inputs_share_a_checksum() {
        let a = Checksum::of(b"MSH|^~\\&|HIS|RS\r");
        let b = Checksum::of(b"MSH|^~\\&|HIS|RS\r");
        assert_eq!(a, b);
        assert_ne!(a, Checksum::of(b"MSH|^~\\&|HIS|RSUD\r"));
    }

    #[test]
    fn parse_rejects_uppercase_and_short_values() {
        assert!(Checksum::parse("ABC").is_err());
        let upper = Checksum::of(b"x").to_string().to_uppercase();
        assert!(Checksum::parse(&upper).is_err());

        let canonical = Checksum::of(b"x").to_string();
        assert_eq!(Checksum::parse(&canonical).expect("valid").to_string(), canonical);
    }
}
