//! Message delimiters and the escape codec.

use crate::{Hl7Error, Hl7Result, HEADER_SEGMENT_ID};
use serde::Serialize;

/// Delimiter characters declared by a message header.
///
/// The field separator is the character immediately after `MSH`; `MSH-2` declares the
/// component, repetition, escape and sub-component characters in that order, optionally
/// followed by the truncation character introduced in v2.7.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Delimiters {
    pub field: char,
    pub component: char,
    pub repetition: char,
    pub escape: char,
    pub subcomponent: char,
    pub truncation: Option<char>,
}

impl Default for Delimiters {
    fn default() -> Self {
        Self {
            field: '|',
            component: '^',
            repetition: '~',
            escape: '\\',
            subcomponent: '&',
            truncation: None,
        }
    }
}

/// Marker for an escape sequence with no closing escape character.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct UnterminatedEscape;

impl Delimiters {
    /// Read the delimiters declared by a header segment line.
    ///
    /// # Errors
    ///
    /// Returns [`Hl7Error::MissingHeader`] if the line is not an `MSH` segment, and
    /// [`Hl7Error::InvalidDelimiters`] if the declared characters are missing, repeated,
    /// alphanumeric, or whitespace.
    pub fn from_header(line: &str) -> Hl7Result<Self> {
        let rest = line.strip_prefix(HEADER_SEGMENT_ID).ok_or_else(|| {
            Hl7Error::MissingHeader(line.chars().take(3).collect::<String>())
        })?;

        let mut chars = rest.chars();
        let field = chars
            .next()
            .ok_or_else(|| Hl7Error::InvalidDelimiters("MSH has no field separator".into()))?;

        let encoding: Vec<char> = chars.take_while(|c| *c != field).collect();
        if encoding.len() < 4 || encoding.len() > 5 {
            return Err(Hl7Error::InvalidDelimiters(format!(
                "MSH-2 must declare 4 or 5 encoding characters, found {}",
                encoding.len()
            )));
        }

        let delimiters = Self {
            field,
            component: encoding[0],
            repetition: encoding[1],
            escape: encoding[2],
            subcomponent: encoding[3],
            truncation: encoding.get(4).copied(),
        };
        delimiters.validate()?;
        Ok(delimiters)
    }

    fn validate(&self) -> Hl7Result<()> {
        let mut all = vec![
            self.field,
            self.component,
            self.repetition,
            self.escape,
            self.subcomponent,
        ];
        all.extend(self.truncation);

        for (idx, c) in all.iter().enumerate() {
            if c.is_alphanumeric() || c.is_whitespace() {
                return Err(Hl7Error::InvalidDelimiters(format!(
                    "'{c}' cannot be used as a delimiter"
                )));
            }
            if all[idx + 1..].contains(c) {
                return Err(Hl7Error::InvalidDelimiters(format!(
                    "'{c}' is declared more than once"
                )));
            }
        }
        Ok(())
    }

    /// The `MSH-2` text for these delimiters.
    pub fn encoding_characters(&self) -> String {
        let mut out = String::with_capacity(5);
        out.push(self.component);
        out.push(self.repetition);
        out.push(self.escape);
        out.push(self.subcomponent);
        if let Some(t) = self.truncation {
            out.push(t);
        }
        out
    }

    /// Encode a decoded value for the wire.
    pub fn escape(&self, value: &str) -> String {
        let e = self.escape;
        let mut out = String::with_capacity(value.len());
        for c in value.chars() {
            let code = match c {
                c if c == self.field => "F",
                c if c == self.component => "S",
                c if c == self.repetition => "R",
                c if c == self.subcomponent => "T",
                c if c == self.escape => "E",
                '\r' => "X0D",
                '\n' => "X0A",
                _ => {
                    out.push(c);
                    continue;
                }
            };
            out.push(e);
            out.push_str(code);
            out.push(e);
        }
        out
    }

    /// Decode wire text into its literal value.
    ///
    /// Delimiter escapes and well-formed hex escapes are resolved; any other escape
    /// sequence (highlighting, formatting) is kept verbatim.
    pub(crate) fn unescape(&self, raw: &str) -> Result<String, UnterminatedEscape> {
        if !raw.contains(self.escape) {
            return Ok(raw.to_owned());
        }

        let mut out = String::with_capacity(raw.len());
        let mut rest = raw;
        while let Some(start) = rest.find(self.escape) {
            out.push_str(&rest[..start]);
            let after = &rest[start + self.escape.len_utf8()..];
            let end = after.find(self.escape).ok_or(UnterminatedEscape)?;
            let code = &after[..end];

            match code {
                "F" => out.push(self.field),
                "S" => out.push(self.component),
                "R" => out.push(self.repetition),
                "T" => out.push(self.subcomponent),
                "E" => out.push(self.escape),
                _ => match decode_hex(code) {
                    Some(text) => out.push_str(&text),
                    None => {
                        out.push(self.escape);
                        out.push_str(code);
                        out.push(self.escape);
                    }
                },
            }

            rest = &after[end + self.escape.len_utf8()..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

fn decode_hex(code: &str) -> Option<String> {
    let digits = code.strip_prefix('X')?;
    if digits.is_empty() {
        return None;
    }
    let bytes = hex::decode(digits).ok()?;
    String::from_utf8(bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_standard_header() {
        let d = Delimiters::from_header("MSH|^~\\&|HIS|RSUD").expect("valid header");
        assert_eq!(d, Delimiters::default());
        assert_eq!(d.encoding_characters(), "^~\\&");
    }

    #[test]
    fn reads_custom_header_with_truncation() {
        let d = Delimiters::from_header("MSH#$*!@%#APP").expect("valid header");
        assert_eq!(d.field, '#');
        assert_eq!(d.component, '$');
        assert_eq!(d.repetition, '*');
        assert_eq!(d.escape, '!');
        assert_eq!(d.subcomponent, '@');
        assert_eq!(d.truncation, Some('%'));
    }

    #[test]
    fn rejects_short_or_repeated_encoding_characters() {
        assert!(matches!(
            Delimiters::from_header("MSH|^~|APP"),
            Err(Hl7Error::InvalidDelimiters(_))
        ));
        assert!(matches!(
            Delimiters::from_header("MSH|^^\\&|APP"),
            Err(Hl7Error::InvalidDelimiters(_))
        ));
        assert!(matches!(
            Delimiters::from_header("MSH|A~\\&|APP"),
            Err(Hl7Error::InvalidDelimiters(_))
        ));
    }

    #[test]
    fn rejects_non_header_line() {
        let err = Delimiters::from_header("PID|1").expect_err("not a header");
        assert_eq!(err, Hl7Error::MissingHeader("PID".into()));
    }

    #[test]
    fn unescape_resolves_delimiter_sequences() {
        let d = Delimiters::default();
        let decoded = d
            .unescape("A\\F\\B\\S\\C\\R\\D\\T\\E\\E\\")
            .expect("well-formed");
        assert_eq!(decoded, "A|B^C~D&E\\");
    }

    #[test]
    fn unescape_keeps_formatting_sequences_verbatim() {
        let d = Delimiters::default();
        assert_eq!(d.unescape("\\H\\bold\\N\\").expect("ok"), "\\H\\bold\\N\\");
        assert_eq!(d.unescape("line\\X0D0A\\next").expect("ok"), "line\r\nnext");
        assert_eq!(d.unescape("\\XZZ\\").expect("ok"), "\\XZZ\\");
    }

    #[test]
    fn unescape_reports_unterminated_sequence() {
        let d = Delimiters::default();
        assert_eq!(d.unescape("broken\\F"), Err(UnterminatedEscape));
    }

    #[test]
    fn escape_is_inverse_of_unescape() {
        let d = Delimiters::default();
        for value in ["plain", "a|b", "x^y~z&w", "back\\slash", "\\H\\", "two\r\nlines"] {
            let wire = d.escape(value);
            assert_eq!(d.unescape(&wire).expect("escaped text is valid"), value);
        }
    }
}
