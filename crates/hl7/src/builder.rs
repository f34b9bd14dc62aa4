//! Message tree → wire text.

use crate::message::{Field, Hl7Message, Segment};
use crate::{Delimiters, HEADER_SEGMENT_ID};

/// Segment terminator written on build.
const SEGMENT_TERMINATOR: char = '\r';

impl Hl7Message {
    /// Encode with this message's own delimiters.
    pub fn build(&self) -> Vec<u8> {
        self.encode().into_bytes()
    }

    /// Encode with `delimiters`, rewriting `MSH-1`/`MSH-2` to declare them.
    ///
    /// Used to normalise messages that arrive with non-standard delimiters.
    pub fn build_with(&self, delimiters: &Delimiters) -> Vec<u8> {
        self.encode_with(delimiters).into_bytes()
    }

    /// Encode to a wire string; every segment is terminated by `\r`.
    pub fn encode(&self) -> String {
        self.encode_with(&self.delimiters)
    }

    pub fn encode_with(&self, delimiters: &Delimiters) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            encode_segment(segment, delimiters, &mut out);
            out.push(SEGMENT_TERMINATOR);
        }
        out
    }
}

fn encode_segment(segment: &Segment, delimiters: &Delimiters, out: &mut String) {
    out.push_str(&segment.id);

    let fields: &[Field] = if segment.id == HEADER_SEGMENT_ID {
        out.push(delimiters.field);
        out.push_str(&delimiters.encoding_characters());
        segment.fields.get(2..).unwrap_or_default()
    } else {
        &segment.fields
    };

    for field in fields {
        out.push(delimiters.field);
        encode_field(field, delimiters, out);
    }
}

fn encode_field(field: &Field, delimiters: &Delimiters, out: &mut String) {
    for (r, repetition) in field.repetitions.iter().enumerate() {
        if r > 0 {
            out.push(delimiters.repetition);
        }
        for (c, component) in repetition.components.iter().enumerate() {
            if c > 0 {
                out.push(delimiters.component);
            }
            for (s, value) in component.subcomponents.iter().enumerate() {
                if s > 0 {
                    out.push(delimiters.subcomponent);
                }
                out.push_str(&delimiters.escape(value));
            }
        }
    }
}
