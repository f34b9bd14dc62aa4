//! Validated rule model.
//!
//! Everything here has already passed load-time validation: paths are parsed for the side
//! of the transformation they address, predicates are parsed, and target paths are unique
//! within a rule. Definitions as authored live in [`crate::RuleDefinition`].

use crate::predicate::Predicate;
use crate::transform::ValueTransform;
use crate::{Direction, Format};
use fhir::FhirPath;
use hl7::Hl7Path;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// Rule identity
// ============================================================================

/// The triple a rule is selected by.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuleKey {
    pub direction: Direction,
    pub message_type: String,
    pub version: String,
}

impl RuleKey {
    pub fn new(
        direction: Direction,
        message_type: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            direction,
            message_type: message_type.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for RuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} (version {})",
            self.direction, self.message_type, self.version
        )
    }
}

// ============================================================================
// Paths
// ============================================================================

/// A path into either side of a transformation.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum DocPath {
    Hl7(Hl7Path),
    Fhir(FhirPath),
}

impl DocPath {
    /// Parse `text` with the grammar of `format`.
    ///
    /// The error is a human-readable reason, suitable for a [`ValidationIssue`].
    pub fn parse(format: Format, text: &str) -> Result<Self, String> {
        match format {
            Format::Hl7 => text
                .parse::<Hl7Path>()
                .map(DocPath::Hl7)
                .map_err(|e| e.to_string()),
            Format::Fhir => text
                .parse::<FhirPath>()
                .map(DocPath::Fhir)
                .map_err(|e| e.to_string()),
        }
    }

    pub fn format(&self) -> Format {
        match self {
            DocPath::Hl7(_) => Format::Hl7,
            DocPath::Fhir(_) => Format::Fhir,
        }
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocPath::Hl7(p) => p.fmt(f),
            DocPath::Fhir(p) => p.fmt(f),
        }
    }
}

// ============================================================================
// Terminology and lookup data
// ============================================================================

/// Source and target code systems of a terminology translation.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CodeSystemPair {
    pub source: String,
    pub target: String,

    /// Restricts resolution to mappings of this version (unversioned mappings still apply).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl CodeSystemPair {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            version: None,
        }
    }
}

impl fmt::Display for CodeSystemPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source, self.target)?;
        if let Some(v) = &self.version {
            write!(f, " (version {v})")?;
        }
        Ok(())
    }
}

/// One code translation. Several source codes may translate to the same target code.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TerminologyMapping {
    pub source_system: String,
    pub target_system: String,
    pub source_code: String,
    pub target_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// A named key → value substitution table (facility codes, department codes).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LookupTable {
    pub name: String,
    #[serde(default)]
    pub entries: BTreeMap<String, String>,
}

impl LookupTable {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }
}

// ============================================================================
// Mappings
// ============================================================================

/// What to do when a terminology code has no mapping.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FallbackPolicy {
    /// Write the mapping's default value and record a warning.
    UseDefaultValue,
    /// Write the untranslated source code and record a warning.
    UseSourceVerbatim,
    /// Record a field error; the transformation fails.
    FailField,
}

/// How a mapping produces its value.
#[derive(Clone, Debug, PartialEq)]
pub enum MappingKind {
    Direct {
        source: DocPath,
        default_value: Option<String>,
    },
    Terminology {
        source: DocPath,
        systems: CodeSystemPair,
        fallback: FallbackPolicy,
        default_value: Option<String>,
    },
    Constant {
        value: String,
    },
    Concatenate {
        sources: Vec<DocPath>,
        separator: String,
    },
    Conditional {
        predicate: Predicate,
        then: Box<MappingKind>,
        otherwise: Option<Box<MappingKind>>,
    },
}

impl MappingKind {
    /// Short name of the variant as written in rule definitions.
    pub fn name(&self) -> &'static str {
        match self {
            MappingKind::Direct { .. } => "direct",
            MappingKind::Terminology { .. } => "terminology",
            MappingKind::Constant { .. } => "constant",
            MappingKind::Concatenate { .. } => "concatenate",
            MappingKind::Conditional { .. } => "conditional",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FieldMapping {
    pub target: DocPath,
    pub kind: MappingKind,
    pub transform: Option<ValueTransform>,

    /// A failure of a critical mapping aborts the whole transformation.
    pub critical: bool,
}

/// A validated transformation rule.
#[derive(Clone, Debug, PartialEq)]
pub struct TransformationRule {
    pub id: String,
    pub key: RuleKey,

    /// Segment ids (HL7 source) or resource types (FHIR source) that must be present.
    pub required: Vec<String>,

    /// Applied in order.
    pub mappings: Vec<FieldMapping>,
}

impl TransformationRule {
    pub fn direction(&self) -> Direction {
        self.key.direction
    }
}

// ============================================================================
// Validation issues
// ============================================================================

/// One problem found while validating a rule definition.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ValidationIssue {
    #[error("{field} must not be empty")]
    EmptyField { field: &'static str },

    #[error("target '{target}' is written by more than one mapping")]
    DuplicateTarget { target: String },

    #[error("path '{path}' is invalid: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("predicate '{predicate}' is invalid: {reason}")]
    InvalidPredicate { predicate: String, reason: String },

    #[error("transform '{transform}' on '{target}' is invalid: {reason}")]
    InvalidTransform {
        target: String,
        transform: String,
        reason: String,
    },

    #[error("concatenate mapping for '{target}' has no sources")]
    EmptyConcatenate { target: String },

    #[error("terminology mapping for '{target}' uses use-default-value but has no default")]
    MissingDefault { target: String },

    #[error("transform on '{target}' refers to unknown lookup table '{table}'")]
    UnknownLookupTable { target: String, table: String },
}
