//! Wire text → message tree.

use crate::delimiters::UnterminatedEscape;
use crate::message::{Component, Field, Hl7Message, Repetition, Segment};
use crate::path::is_segment_id;
use crate::{Delimiters, Hl7Error, Hl7Result, HEADER_SEGMENT_ID};

impl Hl7Message {
    /// Parse raw HL7 v2 bytes.
    ///
    /// Segments may be terminated by `\r`, `\n` or `\r\n`; blank lines are ignored.
    /// Missing trailing fields are not an error and unknown segment ids are kept in order.
    ///
    /// # Errors
    ///
    /// Returns [`Hl7Error`] if:
    /// - the input is empty or not UTF-8,
    /// - the first segment is not `MSH` (`missing-header`),
    /// - the header declares invalid delimiters,
    /// - a segment id is not three upper-case alphanumerics,
    /// - a value contains an unterminated escape sequence.
    pub fn parse(raw: &[u8]) -> Hl7Result<Self> {
        let text = std::str::from_utf8(raw).map_err(|_| Hl7Error::InvalidEncoding)?;

        let mut lines = text
            .split(['\r', '\n'])
            .map(|l| l.trim_start_matches('\u{feff}'))
            .filter(|l| !l.trim().is_empty());

        let first = lines.next().ok_or(Hl7Error::Empty)?;
        if !first.starts_with(HEADER_SEGMENT_ID) {
            let found: String = first.chars().take(3).collect();
            return Err(Hl7Error::MissingHeader(found));
        }
        let delimiters = Delimiters::from_header(first)?;

        let mut segments = Vec::new();
        for (position, line) in std::iter::once(first).chain(lines).enumerate() {
            segments.push(parse_segment(line, &delimiters, position)?);
        }

        Ok(Self {
            delimiters,
            segments,
        })
    }
}

fn parse_segment(line: &str, delimiters: &Delimiters, position: usize) -> Hl7Result<Segment> {
    let (id, rest) = match line.split_once(delimiters.field) {
        Some((id, rest)) => (id, Some(rest)),
        None => (line, None),
    };

    if !is_segment_id(id) {
        return Err(Hl7Error::InvalidSegmentId {
            position,
            id: id.to_owned(),
        });
    }

    let mut segment = Segment::new(id);
    let Some(rest) = rest else {
        return Ok(segment);
    };

    let mut raw_fields = rest.split(delimiters.field);
    if id == HEADER_SEGMENT_ID {
        // MSH-1 is the separator itself; MSH-2 is taken verbatim.
        segment.fields.push(Field::from_value(delimiters.field));
        let encoding = raw_fields.next().unwrap_or_default();
        segment.fields.push(Field::from_value(encoding));
    }

    for raw in raw_fields {
        let field = parse_field(raw, delimiters).map_err(|UnterminatedEscape| {
            Hl7Error::UnterminatedEscape {
                position,
                segment: id.to_owned(),
            }
        })?;
        segment.fields.push(field);
    }

    Ok(segment)
}

fn parse_field(raw: &str, delimiters: &Delimiters) -> Result<Field, UnterminatedEscape> {
    let mut repetitions = Vec::new();
    for rep in raw.split(delimiters.repetition) {
        let mut components = Vec::new();
        for comp in rep.split(delimiters.component) {
            let subcomponents = comp
                .split(delimiters.subcomponent)
                .map(|sub| delimiters.unescape(sub))
                .collect::<Result<Vec<String>, UnterminatedEscape>>()?;
            components.push(Component { subcomponents });
        }
        repetitions.push(Repetition { components });
    }
    Ok(Field { repetitions })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Hl7Path;

    fn path(s: &str) -> Hl7Path {
        s.parse().expect("valid path")
    }

    #[test]
    fn parses_pid_example() {
        let raw = "MSH|^~\\&|SIMRS|RSUD|||20250101||ADT^A01|1|P|2.5\rPID|1||12345||DOE^JOHN";
        let msg = Hl7Message::parse(raw.as_bytes()).expect("valid message");

        assert_eq!(msg.segments().len(), 2);
        assert_eq!(msg.get(&path("PID.5.1")).as_deref(), Some("DOE"));
        assert_eq!(msg.get(&path("PID.3")).as_deref(), Some("12345"));
        // PID stops at field 5; later fields are simply absent.
        assert_eq!(msg.segment("PID").map(|s| s.fields().len()), Some(5));
        assert_eq!(msg.get(&path("PID.8")), None);
    }

    #[test]
    fn accepts_any_line_terminator() {
        let cr = "MSH|^~\\&|A\rPID|1\r";
        let lf = "MSH|^~\\&|A\nPID|1\n";
        let crlf = "MSH|^~\\&|A\r\nPID|1\r\n\r\n";
        let a = Hl7Message::parse(cr.as_bytes()).expect("cr");
        let b = Hl7Message::parse(lf.as_bytes()).expect("lf");
        let c = Hl7Message::parse(crlf.as_bytes()).expect("crlf");
        assert_eq!(a, b);
        assert_eq!(b, c);
    }

    #[test]
    fn keeps_unknown_segments_in_order() {
        let raw = "MSH|^~\\&|A\rZPI|custom^data\rPID|1\rZBP|x";
        let msg = Hl7Message::parse(raw.as_bytes()).expect("valid");
        let ids: Vec<&str> = msg.segments().iter().map(Segment::id).collect();
        assert_eq!(ids, vec!["MSH", "ZPI", "PID", "ZBP"]);
        assert_eq!(msg.get(&path("ZPI.1.2")).as_deref(), Some("data"));
    }

    #[test]
    fn segment_without_fields_is_kept() {
        let msg = Hl7Message::parse(b"MSH|^~\\&|A\rNTE").expect("valid");
        assert_eq!(msg.segment("NTE").map(|s| s.fields().len()), Some(0));
    }

    #[test]
    fn rejects_missing_header() {
        let err = Hl7Message::parse(b"PID|1||12345\rMSH|^~\\&|A").expect_err("no MSH first");
        assert_eq!(err, Hl7Error::MissingHeader("PID".into()));
        assert!(err.to_string().contains("missing-header"));
    }

    #[test]
    fn rejects_empty_and_non_utf8_input() {
        assert_eq!(Hl7Message::parse(b""), Err(Hl7Error::Empty));
        assert_eq!(Hl7Message::parse(b"\r\n\r"), Err(Hl7Error::Empty));
        assert_eq!(
            Hl7Message::parse(&[0x4d, 0x53, 0x48, 0xff]),
            Err(Hl7Error::InvalidEncoding)
        );
    }

    #[test]
    fn rejects_invalid_segment_id() {
        let err = Hl7Message::parse(b"MSH|^~\\&|A\rpid|1").expect_err("lowercase id");
        assert_eq!(
            err,
            Hl7Error::InvalidSegmentId {
                position: 1,
                id: "pid".into()
            }
        );
    }

    #[test]
    fn rejects_unterminated_escape() {
        let err = Hl7Message::parse(b"MSH|^~\\&|A\rNTE|1||broken\\F").expect_err("bad escape");
        assert_eq!(
            err,
            Hl7Error::UnterminatedEscape {
                position: 1,
                segment: "NTE".into()
            }
        );
    }

    #[test]
    fn decodes_escapes_into_values() {
        let raw = "MSH|^~\\&|A\rNTE|1||Result \\T\\ notes\\F\\more";
        let msg = Hl7Message::parse(raw.as_bytes()).expect("valid");
        assert_eq!(msg.get(&path("NTE.3")).as_deref(), Some("Result & notes|more"));
    }

    #[test]
    fn honours_custom_delimiters() {
        let raw = "MSH#$*!@#APP#FAC\rPID#1##555##ROE$JANE*DOE$J";
        let msg = Hl7Message::parse(raw.as_bytes()).expect("valid");
        assert_eq!(msg.get(&path("MSH.3")).as_deref(), Some("APP"));
        assert_eq!(msg.get(&path("PID.5.2")).as_deref(), Some("JANE"));
        assert_eq!(msg.get(&path("PID.5[1].1")).as_deref(), Some("DOE"));
    }
}
