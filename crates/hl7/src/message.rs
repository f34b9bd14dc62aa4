//! HL7 message tree.
//!
//! The tree mirrors the wire structure one level per delimiter. Every level always holds
//! at least one child, so an empty field is a single repetition containing a single
//! component containing one empty sub-component. Parsing and [`Hl7Message::set`] both
//! produce this shape, which keeps structural equality meaningful across round trips.
//!
//! Field numbers follow HL7 convention: field `n` of a segment lives at `fields[n - 1]`.
//! For `MSH`, `fields[0]` is `MSH-1` (the field separator) and `fields[1]` is `MSH-2` (the
//! encoding characters); both are stored verbatim.

use crate::{Delimiters, Hl7Error, Hl7Path, Hl7Result, HEADER_SEGMENT_ID};
use serde::Serialize;

/// A parsed HL7 v2 message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Hl7Message {
    pub(crate) delimiters: Delimiters,
    pub(crate) segments: Vec<Segment>,
}

/// A named record within a message (e.g. `PID`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Segment {
    pub(crate) id: String,
    pub(crate) fields: Vec<Field>,
}

/// One field of a segment; holds one or more repetitions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Field {
    pub(crate) repetitions: Vec<Repetition>,
}

/// One repetition of a field; holds one or more components.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Repetition {
    pub(crate) components: Vec<Component>,
}

/// One component; holds one or more decoded sub-component values.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Component {
    pub(crate) subcomponents: Vec<String>,
}

impl Component {
    pub fn from_value(value: impl Into<String>) -> Self {
        Self {
            subcomponents: vec![value.into()],
        }
    }

    pub fn subcomponents(&self) -> &[String] {
        &self.subcomponents
    }

    /// The decoded value when the component is atomic, otherwise the wire-encoded
    /// sub-components joined with the sub-component separator.
    pub fn text(&self, delimiters: &Delimiters) -> String {
        match self.subcomponents.as_slice() {
            [single] => single.clone(),
            many => many
                .iter()
                .map(|s| delimiters.escape(s))
                .collect::<Vec<_>>()
                .join(&delimiters.subcomponent.to_string()),
        }
    }
}

impl Repetition {
    pub fn from_value(value: impl Into<String>) -> Self {
        Self {
            components: vec![Component::from_value(value)],
        }
    }

    pub fn components(&self) -> &[Component] {
        &self.components
    }

    /// Component `n` (1-based).
    pub fn component(&self, n: usize) -> Option<&Component> {
        n.checked_sub(1).and_then(|i| self.components.get(i))
    }

    /// The decoded value when the repetition is atomic, otherwise the wire-encoded
    /// components joined with the component separator.
    pub fn text(&self, delimiters: &Delimiters) -> String {
        match self.components.as_slice() {
            [single] => single.text(delimiters),
            many => many
                .iter()
                .map(|c| {
                    c.subcomponents
                        .iter()
                        .map(|s| delimiters.escape(s))
                        .collect::<Vec<_>>()
                        .join(&delimiters.subcomponent.to_string())
                })
                .collect::<Vec<_>>()
                .join(&delimiters.component.to_string()),
        }
    }
}

impl Field {
    pub fn empty() -> Self {
        Self::from_value("")
    }

    pub fn from_value(value: impl Into<String>) -> Self {
        Self {
            repetitions: vec![Repetition::from_value(value)],
        }
    }

    pub fn repetitions(&self) -> &[Repetition] {
        &self.repetitions
    }

    /// Whether every value in the field is empty.
    pub fn is_empty(&self) -> bool {
        self.repetitions.iter().all(|r| {
            r.components
                .iter()
                .all(|c| c.subcomponents.iter().all(String::is_empty))
        })
    }
}

impl Segment {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Field `n` (1-based, HL7 numbering).
    pub fn field(&self, n: usize) -> Option<&Field> {
        n.checked_sub(1).and_then(|i| self.fields.get(i))
    }

    fn is_header(&self) -> bool {
        self.id == HEADER_SEGMENT_ID
    }
}

impl Hl7Message {
    /// Create a message holding only an `MSH` segment declaring `delimiters`.
    pub fn new(delimiters: Delimiters) -> Self {
        let mut header = Segment::new(HEADER_SEGMENT_ID);
        header.fields.push(Field::from_value(delimiters.field));
        header
            .fields
            .push(Field::from_value(delimiters.encoding_characters()));
        Self {
            delimiters,
            segments: vec![header],
        }
    }

    pub fn delimiters(&self) -> &Delimiters {
        &self.delimiters
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// The header segment. Parsing guarantees it is the first segment.
    pub fn header(&self) -> Option<&Segment> {
        self.segments.first().filter(|s| s.is_header())
    }

    /// First occurrence of a segment id.
    pub fn segment(&self, id: &str) -> Option<&Segment> {
        self.segments.iter().find(|s| s.id == id)
    }

    /// All occurrences of a segment id, in message order.
    pub fn segments_by_id<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Segment> + 'a {
        self.segments.iter().filter(move |s| s.id == id)
    }

    /// Whether at least one segment with this id exists.
    pub fn has_segment(&self, id: &str) -> bool {
        self.segment(id).is_some()
    }

    /// Message type and trigger event joined with `_`, e.g. `ADT_A01`.
    ///
    /// Returns just the message code when `MSH-9.2` is absent. `MSH-9.3` (message
    /// structure) is ignored.
    pub fn message_type(&self) -> Option<String> {
        let code = self.get_str("MSH.9.1")?;
        match self.get_str("MSH.9.2") {
            Some(event) => Some(format!("{code}_{event}")),
            None => Some(code),
        }
    }

    /// The declared HL7 version (`MSH-12.1`), e.g. `2.5`.
    pub fn version(&self) -> Option<String> {
        self.get_str("MSH.12.1")
    }

    /// The message control id (`MSH-10`).
    pub fn control_id(&self) -> Option<String> {
        self.get_str("MSH.10")
    }

    fn get_str(&self, path: &str) -> Option<String> {
        path.parse::<Hl7Path>().ok().and_then(|p| self.get(&p))
    }

    /// Read the value addressed by `path`.
    ///
    /// Atomic values are returned decoded; composite values below the addressed level are
    /// returned wire-encoded with this message's delimiters. Empty values read as `None`.
    pub fn get(&self, path: &Hl7Path) -> Option<String> {
        let segment = self
            .segments_by_id(path.segment())
            .nth(path.occurrence())?;
        let field = segment.field(path.field())?;
        let repetition = field.repetitions.get(path.repetition())?;

        let value = match path.component() {
            None => repetition.text(&self.delimiters),
            Some(c) => {
                let component = repetition.component(c)?;
                match path.subcomponent() {
                    None => component.text(&self.delimiters),
                    Some(s) => component.subcomponents.get(s - 1)?.clone(),
                }
            }
        };

        if value.is_empty() {
            None
        } else {
            Some(value)
        }
    }

    /// Write `value` at `path`, creating missing segments, fields, repetitions and
    /// components.
    ///
    /// Missing segment occurrences are appended at the end of the message. Writing at the
    /// repetition or component level replaces any nested structure with the single value.
    ///
    /// # Errors
    ///
    /// Returns [`Hl7Error::ReservedHeaderField`] for `MSH.1` and `MSH.2`.
    pub fn set(&mut self, path: &Hl7Path, value: impl Into<String>) -> Hl7Result<()> {
        if path.segment() == HEADER_SEGMENT_ID && path.field() <= 2 {
            return Err(Hl7Error::ReservedHeaderField(format!("MSH.{}", path.field())));
        }

        let segment = self.segment_mut_or_insert(path.segment(), path.occurrence());

        while segment.fields.len() < path.field() {
            segment.fields.push(Field::empty());
        }
        let field = &mut segment.fields[path.field() - 1];

        while field.repetitions.len() <= path.repetition() {
            field.repetitions.push(Repetition::from_value(""));
        }
        let repetition = &mut field.repetitions[path.repetition()];

        let value = value.into();
        let Some(c) = path.component() else {
            *repetition = Repetition::from_value(value);
            return Ok(());
        };

        while repetition.components.len() < c {
            repetition.components.push(Component::from_value(""));
        }
        let component = &mut repetition.components[c - 1];

        match path.subcomponent() {
            None => *component = Component::from_value(value),
            Some(s) => {
                while component.subcomponents.len() < s {
                    component.subcomponents.push(String::new());
                }
                component.subcomponents[s - 1] = value;
            }
        }
        Ok(())
    }

    fn segment_mut_or_insert(&mut self, id: &str, occurrence: usize) -> &mut Segment {
        let existing = self.segments.iter().filter(|s| s.id == id).count();
        for _ in existing..=occurrence {
            self.segments.push(Segment::new(id));
        }

        let mut seen = 0;
        let index = self
            .segments
            .iter()
            .position(|s| {
                if s.id != id {
                    return false;
                }
                seen += 1;
                seen == occurrence + 1
            })
            .unwrap_or(self.segments.len() - 1);
        &mut self.segments[index]
    }
}
