//! Data-defined transformation rules and the mapper that applies them.
//!
//! This crate owns the transformation configuration of the bridge:
//! - [`TransformationRule`]s made of [`FieldMapping`]s, one per `(direction, message type, version)`
//! - terminology code mappings and lookup tables
//! - the [`MappingStore`], which validates rules at load time and caches them
//! - the [`Mapper`], which interprets a rule over an HL7 message or a FHIR bundle
//!
//! Rule definitions are authored as YAML ([`RuleSet`]) or supplied by any other
//! [`RuleSource`]. A rule that fails validation is never cached and never used.

pub mod mapper;
mod predicate;
pub mod rule;
mod ruleset;
pub mod store;
mod transform;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use mapper::{FieldIssue, Mapper, MappingOutcome, TransformStatus};
pub use predicate::{Predicate, PredicateError};
pub use rule::{
    CodeSystemPair, DocPath, FallbackPolicy, FieldMapping, LookupTable, MappingKind, RuleKey,
    TerminologyMapping, TransformationRule, ValidationIssue,
};
pub use ruleset::{KindDefinition, MappingDefinition, RuleDefinition, RuleSet};
pub use store::{MappingStore, RuleSource, TerminologyService};
pub use transform::ValueTransform;

/// Which way a transformation runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    Hl7ToFhir,
    FhirToHl7,
}

/// Document format on one side of a transformation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Format {
    Hl7,
    Fhir,
}

impl Direction {
    /// Format that source paths and predicates address.
    pub fn source(self) -> Format {
        match self {
            Direction::Hl7ToFhir => Format::Hl7,
            Direction::FhirToHl7 => Format::Fhir,
        }
    }

    /// Format that target paths address.
    pub fn target(self) -> Format {
        match self {
            Direction::Hl7ToFhir => Format::Fhir,
            Direction::FhirToHl7 => Format::Hl7,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Hl7ToFhir => "hl7-to-fhir",
            Direction::FhirToHl7 => "fhir-to-hl7",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = MappingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "hl7-to-fhir" => Ok(Direction::Hl7ToFhir),
            "fhir-to-hl7" => Ok(Direction::FhirToHl7),
            other => Err(MappingError::InvalidInput(format!(
                "unknown direction '{other}' (expected hl7-to-fhir or fhir-to-hl7)"
            ))),
        }
    }
}

/// A rule definition rejected at load time.
///
/// Carries every problem found in the definition, not just the first.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("rule '{rule}' is invalid: {}", join_issues(.issues))]
pub struct MappingValidationError {
    pub rule: String,
    pub issues: Vec<ValidationIssue>,
}

fn join_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors returned by the `bridge-mapping` crate.
#[derive(Debug, thiserror::Error)]
pub enum MappingError {
    #[error("no transformation rule for {0}")]
    NotFound(RuleKey),

    #[error(transparent)]
    Validation(#[from] MappingValidationError),

    #[error("code '{code}' has no mapping for {systems}")]
    Unmapped {
        systems: CodeSystemPair,
        code: String,
    },

    #[error("rule '{rule}' runs {actual}, not {expected}")]
    DirectionMismatch {
        rule: String,
        expected: Direction,
        actual: Direction,
    },

    #[error("invalid rule set: {0}")]
    InvalidRuleSet(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("rule source error: {0}")]
    Source(String),

    #[error("terminology service error: {0}")]
    Terminology(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Type alias for Results that can fail with a [`MappingError`].
pub type MappingResult<T> = Result<T, MappingError>;
