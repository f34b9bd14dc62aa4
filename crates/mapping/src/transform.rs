//! Value transforms applied to a resolved mapping value before it is written.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use std::fmt;
use std::str::FromStr;

const LOOKUP_PREFIX: &str = "lookup:";

/// A post-processing step named by a mapping's `transform` field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ValueTransform {
    Uppercase,
    Lowercase,
    Trim,
    /// HL7 `DT`/`DTM` (`YYYYMMDD[HHMM[SS]][+ZZZZ]`) to FHIR `date`/`dateTime`.
    Hl7DateToFhir,
    /// FHIR `date`/`dateTime` to HL7 `DT`/`DTM`.
    FhirDateToHl7,
    /// Substitute through the named lookup table.
    Lookup(String),
}

impl ValueTransform {
    /// Apply a transform that needs no lookup data.
    ///
    /// Returns `None` for [`ValueTransform::Lookup`], which the mapper resolves against the
    /// mapping store, and for date values that do not parse.
    pub fn apply_local(&self, value: &str) -> Option<String> {
        match self {
            ValueTransform::Uppercase => Some(value.to_uppercase()),
            ValueTransform::Lowercase => Some(value.to_lowercase()),
            ValueTransform::Trim => Some(value.trim().to_owned()),
            ValueTransform::Hl7DateToFhir => hl7_date_to_fhir(value),
            ValueTransform::FhirDateToHl7 => fhir_date_to_hl7(value),
            ValueTransform::Lookup(_) => None,
        }
    }

    pub fn lookup_table(&self) -> Option<&str> {
        match self {
            ValueTransform::Lookup(table) => Some(table),
            _ => None,
        }
    }
}

impl FromStr for ValueTransform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(table) = s.strip_prefix(LOOKUP_PREFIX) {
            let table = table.trim();
            if table.is_empty() {
                return Err("lookup transform needs a table name (lookup:<table>)".into());
            }
            return Ok(ValueTransform::Lookup(table.to_owned()));
        }
        match s {
            "uppercase" => Ok(ValueTransform::Uppercase),
            "lowercase" => Ok(ValueTransform::Lowercase),
            "trim" => Ok(ValueTransform::Trim),
            "hl7-date-to-fhir" => Ok(ValueTransform::Hl7DateToFhir),
            "fhir-date-to-hl7" => Ok(ValueTransform::FhirDateToHl7),
            other => Err(format!("unknown transform '{other}'")),
        }
    }
}

impl fmt::Display for ValueTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueTransform::Uppercase => f.write_str("uppercase"),
            ValueTransform::Lowercase => f.write_str("lowercase"),
            ValueTransform::Trim => f.write_str("trim"),
            ValueTransform::Hl7DateToFhir => f.write_str("hl7-date-to-fhir"),
            ValueTransform::FhirDateToHl7 => f.write_str("fhir-date-to-hl7"),
            ValueTransform::Lookup(table) => write!(f, "{LOOKUP_PREFIX}{table}"),
        }
    }
}

// ============================================================================
// Date conversion
// ============================================================================

/// Split a trailing `+ZZZZ`/`-ZZZZ` offset off an HL7 timestamp.
fn split_hl7_offset(value: &str) -> (&str, Option<&str>) {
    match value.rfind(['+', '-']) {
        Some(idx) if idx >= 4 => (&value[..idx], Some(&value[idx..])),
        _ => (value, None),
    }
}

fn hl7_date_to_fhir(value: &str) -> Option<String> {
    let (body, offset) = split_hl7_offset(value.trim());
    let (digits, fraction) = match body.split_once('.') {
        Some((d, f)) => (d, Some(f)),
        None => (body, None),
    };
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let date = match digits.len() {
        4 => return offset.is_none().then(|| digits.to_owned()),
        6 => {
            NaiveDate::parse_from_str(&format!("{digits}01"), "%Y%m%d").ok()?;
            return offset
                .is_none()
                .then(|| format!("{}-{}", &digits[..4], &digits[4..]));
        }
        8 => NaiveDate::parse_from_str(digits, "%Y%m%d").ok()?,
        10 | 12 | 14 => {
            let mut padded = digits.to_owned();
            while padded.len() < 14 {
                padded.push('0');
            }
            let stamp = NaiveDateTime::parse_from_str(&padded, "%Y%m%d%H%M%S").ok()?;
            let mut out = stamp.format("%Y-%m-%dT%H:%M:%S").to_string();
            if let Some(fraction) = fraction.filter(|f| f.bytes().all(|b| b.is_ascii_digit())) {
                out.push('.');
                out.push_str(fraction);
            }
            if let Some(offset) = offset {
                let offset = offset.get(..5)?;
                if offset.len() != 5 || !offset[1..].bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                out.push_str(&offset[..3]);
                out.push(':');
                out.push_str(&offset[3..]);
            }
            return Some(out);
        }
        _ => return None,
    };

    offset
        .is_none()
        .then(|| date.format("%Y-%m-%d").to_string())
}

fn fhir_date_to_hl7(value: &str) -> Option<String> {
    let value = value.trim();
    if value.contains('T') {
        if let Ok(stamp) = DateTime::parse_from_rfc3339(value) {
            return Some(stamp.format("%Y%m%d%H%M%S%z").to_string());
        }
        let stamp = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
        return Some(stamp.format("%Y%m%d%H%M%S").to_string());
    }

    match value.len() {
        4 if value.bytes().all(|b| b.is_ascii_digit()) => Some(value.to_owned()),
        7 => {
            NaiveDate::parse_from_str(&format!("{value}-01"), "%Y-%m-%d").ok()?;
            Some(value.replace('-', ""))
        }
        10 => NaiveDate::parse_from_str(value, "%Y-%m-%d")
            .ok()
            .map(|d| d.format("%Y%m%d").to_string()),
        _ => None,
    }
}
