//! Segment-path addressing.
//!
//! Grammar: `SEGMENT[n].field[r][.component[.subcomponent]]`
//!
//! - `SEGMENT` is a three character segment id (`PID`, `OBX`, `ZPI`).
//! - `[n]` selects the segment occurrence, 0-based, default the first.
//! - `field`, `component` and `subcomponent` are 1-based HL7 positions.
//! - `[r]` selects the field repetition, 0-based, default the first.
//!
//! Examples: `PID.5.1` (family name), `OBX[2].5` (value of the third OBX),
//! `PID.3[1].1` (identifier of the second PID-3 repetition).

use crate::{Hl7Error, Hl7Result};
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Hl7Path {
    segment: String,
    occurrence: usize,
    field: usize,
    repetition: usize,
    component: Option<usize>,
    subcomponent: Option<usize>,
}

impl Hl7Path {
    pub fn segment(&self) -> &str {
        &self.segment
    }

    pub fn occurrence(&self) -> usize {
        self.occurrence
    }

    pub fn field(&self) -> usize {
        self.field
    }

    pub fn repetition(&self) -> usize {
        self.repetition
    }

    pub fn component(&self) -> Option<usize> {
        self.component
    }

    pub fn subcomponent(&self) -> Option<usize> {
        self.subcomponent
    }
}

/// Whether `id` is a valid segment id: three upper-case ASCII letters or digits,
/// starting with a letter.
pub(crate) fn is_segment_id(id: &str) -> bool {
    id.len() == 3
        && id.bytes().next().is_some_and(|b| b.is_ascii_uppercase())
        && id
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
}

fn invalid(path: &str, reason: impl Into<String>) -> Hl7Error {
    Hl7Error::InvalidPath {
        path: path.to_owned(),
        reason: reason.into(),
    }
}

/// Split `name[idx]` into `name` and an optional index.
fn split_index<'a>(whole: &str, part: &'a str) -> Hl7Result<(&'a str, Option<usize>)> {
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

fn position(whole: &str, part: &str, what: &str) -> Hl7Result<usize> {
    match part.parse::<usize>() {
        Ok(n) if n >= 1 => Ok(n),
        _ => Err(invalid(
            whole,
            format!("{what} '{part}' must be a positive integer"),
        )),
    }
}

impl FromStr for Hl7Path {
    type Err = Hl7Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('.').collect();
        if parts.len() < 2 {
            return Err(invalid(s, "expected at least SEGMENT.field"));
        }
        if parts.len() > 4 {
            return Err(invalid(s, "too many levels (max SEGMENT.field.component.subcomponent)"));
        }

        let (segment, occurrence) = split_index(s, parts[0])?;
        if !is_segment_id(segment) {
            return Err(invalid(s, format!("'{segment}' is not a segment id")));
        }

        let (field, repetition) = split_index(s, parts[1])?;
        let field = position(s, field, "field")?;

        let component = parts
            .get(2)
            .map(|p| position(s, p, "component"))
            .transpose()?;
        let subcomponent = parts
            .get(3)
            .map(|p| position(s, p, "subcomponent"))
            .transpose()?;

        Ok(Self {
            segment: segment.to_owned(),
            occurrence: occurrence.unwrap_or(0),
            field,
            repetition: repetition.unwrap_or(0),
            component,
            subcomponent,
        })
    }
}

impl fmt::Display for Hl7Path {
    /// Canonical form: default indexes are omitted, so `PID[0].5[0].1` renders `PID.5.1`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segment)?;
        if self.occurrence > 0 {
            write!(f, "[{}]", self.occurrence)?;
        }
        write!(f, ".{}", self.field)?;
        if self.repetition > 0 {
            write!(f, "[{}]", self.repetition)?;
        }
        if let Some(c) = self.component {
            write!(f, ".{c}")?;
        }
        if let Some(sc) = self.subcomponent {
            write!(f, ".{sc}")?;
        }
        Ok(())
    }
}
