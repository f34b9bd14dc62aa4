//! FHIR R4 boundary support for the integration bridge.
//!
//! This crate provides a schema-agnostic view of FHIR JSON:
//! - [`Node`]: the recursive JSON tree, with object key order preserved
//! - [`FhirPath`]: element addressing (`Patient.name[0].family`)
//! - [`Bundle`]: an ordered list of resources, read from a FHIR `Bundle` or a single
//!   resource and written back as a `collection` Bundle
//!
//! The mapping layer reads and writes resources through paths only, so no per-resource
//! wire structs are needed here. Profile validation is out of scope.

mod bundle;
mod node;
mod path;

pub use bundle::Bundle;
pub use node::Node;
pub use path::{FhirPath, PathStep};

/// FHIR version reported for every bundle handled by this crate.
pub const FHIR_VERSION: &str = "R4";

/// Errors returned by the `fhir` boundary crate.
#[derive(Debug, thiserror::Error)]
pub enum FhirError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("translation error: {0}")]
    Translation(String),

    #[error("invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("cannot write '{path}': existing value at '{at}' is {found}")]
    PathConflict {
        path: String,
        at: String,
        found: &'static str,
    },
}

/// Type alias for Results that can fail with a [`FhirError`].
pub type FhirResult<T> = Result<T, FhirError>;
