//! HL7 v2.x wire support for the integration bridge.
//!
//! This crate decodes pipe-and-hat HL7 v2 messages into a structured tree and encodes the
//! tree back to wire text:
//! - [`Hl7Message`] → [`Segment`] → [`Field`] → [`Repetition`] → [`Component`] → sub-component text
//! - [`Delimiters`] declared by the message header (`MSH-1`, `MSH-2`)
//! - [`Hl7Path`] addressing (`PID.5.1`, `OBX[2].5`, `PID.3[1].1`)
//!
//! Values in the tree are always stored *decoded*: escape sequences such as `\F\` are
//! resolved on parse and re-encoded on build, so callers never see wire escaping.
//!
//! For any syntactically valid input, `parse(build(parse(raw))) == parse(raw)`.
//!
//! This crate knows nothing about FHIR or mapping rules.

mod builder;
mod delimiters;
mod message;
mod parser;
mod path;

pub use delimiters::Delimiters;
pub use message::{Component, Field, Hl7Message, Repetition, Segment};
pub use path::Hl7Path;

/// Segment id every message must start with.
pub const HEADER_SEGMENT_ID: &str = "MSH";

/// Errors returned by the `hl7` crate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Hl7Error {
    #[error("empty message")]
    Empty,

    #[error("message is not valid UTF-8")]
    InvalidEncoding,

    #[error("missing-header: first segment must be MSH, found '{0}'")]
    MissingHeader(String),

    #[error("invalid delimiters: {0}")]
    InvalidDelimiters(String),

    #[error("invalid segment id '{id}' at segment {position}")]
    InvalidSegmentId { position: usize, id: String },

    #[error("unterminated escape sequence in {segment} at segment {position}")]
    UnterminatedEscape { position: usize, segment: String },

    #[error("invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("{0} holds the message delimiters and cannot be written")]
    ReservedHeaderField(String),
}

/// Type alias for Results that can fail with an [`Hl7Error`].
pub type Hl7Result<T> = Result<T, Hl7Error>;

/// Parse raw HL7 v2 bytes into a message tree.
///
/// Equivalent to [`Hl7Message::parse`].
pub fn parse(raw: &[u8]) -> Hl7Result<Hl7Message> {
    Hl7Message::parse(raw)
}

/// Encode a message tree to wire bytes using the message's own delimiters.
///
/// Equivalent to [`Hl7Message::build`].
pub fn build(message: &Hl7Message) -> Vec<u8> {
    message.build()
}
