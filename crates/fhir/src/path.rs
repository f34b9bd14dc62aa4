//! Element addressing inside a bundle.
//!
//! Grammar: `ResourceType[n].element[i].element…`
//!
//! - `ResourceType[n]` selects the n-th resource of that type in the bundle, 0-based,
//!   default the first.
//! - Each element step may carry an array index `[i]`, 0-based. A step without an index
//!   reads the first array item when the element is an array, and writes a single value.
//!
//! Examples: `Patient.name[0].family`, `Observation[1].valueQuantity.value`,
//! `Patient.identifier[1].value`.

use crate::{FhirError, FhirResult};
use std::fmt;
use std::str::FromStr;

/// One element step of a [`FhirPath`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PathStep {
    name: String,
    index: Option<usize>,
}

impl PathStep {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> Option<usize> {
        self.index
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FhirPath {
    resource_type: String,
    resource_index: usize,
    steps: Vec<PathStep>,
}

impl FhirPath {
    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn resource_index(&self) -> usize {
        self.resource_index
    }

    pub fn steps(&self) -> &[PathStep] {
        &self.steps
    }
}

fn invalid(path: &str, reason: impl Into<String>) -> FhirError {
    FhirError::InvalidPath {
        path: path.to_owned(),
        reason: reason.into(),
    }
}

fn split_index<'a>(whole: &str, part: &'a str) -> FhirResult<(&'a str, Option<usize>)> {
    let Some(open) = part.find('[') else {
        return Ok((part, None));
    };
    let inner = part[open + 1..]
        .strip_suffix(']')
        .ok_or_else(|| invalid(whole, format!("unclosed index in '{part}'")))?;
    let idx = inner
        .parse::<usize>()
        .map_err(|_| invalid(whole, format!("index '{inner}' is not a non-negative integer")))?;
    Ok((&part[..open], Some(idx)))
}

fn is_name(name: &str, upper_first: bool) -> bool {
    let mut bytes = name.bytes();
    let first_ok = match bytes.next() {
        Some(b) if upper_first => b.is_ascii_uppercase(),
        Some(b) => b.is_ascii_alphabetic(),
        None => false,
    };
    first_ok && bytes.all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

impl FromStr for FhirPath {
    type Err = FhirError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().split('.');

        let head = parts.next().unwrap_or_default();
        let (resource_type, resource_index) = split_index(s, head)?;
        if !is_name(resource_type, true) {
            return Err(invalid(
                s,
                format!("'{resource_type}' is not a resource type"),
            ));
        }

        let mut steps = Vec::new();
        for part in parts {
            let (name, index) = split_index(s, part)?;
            if !is_name(name, false) {
                return Err(invalid(s, format!("'{name}' is not an element name")));
            }
            steps.push(PathStep {
                name: name.to_owned(),
                index,
            });
        }
        if steps.is_empty() {
            return Err(invalid(s, "expected at least ResourceType.element"));
        }

        Ok(Self {
            resource_type: resource_type.to_owned(),
            resource_index: resource_index.unwrap_or(0),
            steps,
        })
    }
}

impl fmt::Display for FhirPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.resource_type)?;
        if self.resource_index > 0 {
            write!(f, "[{}]", self.resource_index)?;
        }
        for step in &self.steps {
            write!(f, ".{}", step.name)?;
            if let Some(i) = step.index {
                write!(f, "[{i}]")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_indexed_path() {
        let p: FhirPath = "Patient.name[0].family".parse().expect("valid");
        assert_eq!(p.resource_type(), "Patient");
        assert_eq!(p.resource_index(), 0);
        assert_eq!(p.steps().len(), 2);
        assert_eq!(p.steps()[0].name(), "name");
        assert_eq!(p.steps()[0].index(), Some(0));
        assert_eq!(p.steps()[1].index(), None);
        assert_eq!(p.to_string(), "Patient.name[0].family");
    }

    #[test]
    fn resource_index_is_canonical() {
        let p: FhirPath = "Observation[0].code.coding[0].code".parse().expect("valid");
        assert_eq!(p.to_string(), "Observation.code.coding[0].code");

        let q: FhirPath = "Observation[2].valueQuantity.value".parse().expect("valid");
        assert_eq!(q.resource_index(), 2);
        assert_eq!(q.to_string(), "Observation[2].valueQuantity.value");
    }

    #[test]
    fn rejects_malformed_paths() {
        for bad in [
            "",
            "Patient",
            "patient.name",
            "Patient..family",
            "Patient.name[x]",
            "Patient.name[0",
            "Patient.1name",
            "Patient.name-given",
        ] {
            let err = bad.parse::<FhirPath>().expect_err(bad);
            assert!(
                matches!(err, FhirError::InvalidPath { .. }),
                "unexpected error for {bad}: {err:?}"
            );
        }
    }
}
