//! Resource bundle and its JSON codec.

use crate::node::Node;
use crate::path::{FhirPath, PathStep};
use crate::{FhirError, FhirResult};
use indexmap::IndexMap;
use serde::Serialize;

/// An ordered list of FHIR resources.
///
/// Every resource is an object node carrying a `resourceType`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Bundle {
    resources: Vec<Node>,
}

impl Bundle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a resource.
    ///
    /// # Errors
    ///
    /// Returns [`FhirError::InvalidInput`] if `resource` is not an object with a
    /// `resourceType`.
    pub fn push(&mut self, resource: Node) -> FhirResult<()> {
        if resource.resource_type().is_none() {
            return Err(FhirError::InvalidInput(format!(
                "resource must be an object with a resourceType, got {}",
                resource.kind()
            )));
        }
        self.resources.push(resource);
        Ok(())
    }

    pub fn resources(&self) -> &[Node] {
        &self.resources
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// The `index`-th resource of `resource_type`, 0-based.
    pub fn resource(&self, resource_type: &str, index: usize) -> Option<&Node> {
        self.resources
            .iter()
            .filter(|r| r.resource_type() == Some(resource_type))
            .nth(index)
    }

    pub fn has_resource(&self, resource_type: &str) -> bool {
        self.resource(resource_type, 0).is_some()
    }

    /// Resource type of the first resource; used to detect the message type of a bundle.
    pub fn first_resource_type(&self) -> Option<&str> {
        self.resources.first().and_then(Node::resource_type)
    }

    /// Parse FHIR JSON text.
    ///
    /// Accepts either a `Bundle` resource, whose `entry[].resource` items become the bundle's
    /// resources, or any single resource, which becomes a one-resource bundle.
    ///
    /// # Errors
    ///
    /// Returns [`FhirError`] if:
    /// - the text is not well-formed JSON (the failing path is reported),
    /// - the document has no `resourceType`,
    /// - a bundle entry has no resource object with a `resourceType`.
    pub fn from_json(text: &str) -> FhirResult<Self> {
        let mut deserializer = serde_json::Deserializer::from_str(text);
        let root: Node = match serde_path_to_error::deserialize(&mut deserializer) {
            Ok(parsed) => parsed,
            Err(err) => {
                let path = err.path().to_string();
                let source = err.into_inner();
                let path = if path.is_empty() || path == "." {
                    "<root>"
                } else {
                    path.as_str()
                };
                return Err(FhirError::Translation(format!(
                    "FHIR JSON mismatch at {path}: {source}"
                )));
            }
        };
        deserializer.end()?;

        match root.resource_type() {
            None => Err(FhirError::InvalidInput(
                "document is not a FHIR resource (no resourceType)".into(),
            )),
            Some("Bundle") => Self::from_bundle_node(root),
            Some(_) => Ok(Self {
                resources: vec![root],
            }),
        }
    }

    fn from_bundle_node(root: Node) -> FhirResult<Self> {
        let Node::Object(mut map) = root else {
            return Err(FhirError::InvalidInput("bundle is not an object".into()));
        };

        let entries = match map.shift_remove("entry") {
            None | Some(Node::Null) => Vec::new(),
            Some(Node::List(entries)) => entries,
            Some(other) => {
                return Err(FhirError::InvalidInput(format!(
                    "Bundle.entry must be an array, got {}",
                    other.kind()
                )))
            }
        };

        let mut bundle = Self::new();
        for (idx, entry) in entries.into_iter().enumerate() {
            let resource = match entry {
                Node::Object(mut entry) => entry.shift_remove("resource"),
                _ => None,
            };
            let resource = resource.ok_or_else(|| {
                FhirError::InvalidInput(format!("Bundle.entry[{idx}] has no resource"))
            })?;
            bundle.push(resource).map_err(|_| {
                FhirError::InvalidInput(format!(
                    "Bundle.entry[{idx}].resource has no resourceType"
                ))
            })?;
        }
        Ok(bundle)
    }

    /// The bundle as a FHIR `collection` Bundle node.
    pub fn to_node(&self) -> Node {
        let entries = self
            .resources
            .iter()
            .map(|r| {
                let mut entry = IndexMap::new();
                entry.insert("resource".to_owned(), r.clone());
                Node::Object(entry)
            })
            .collect();

        let mut map = IndexMap::new();
        map.insert("resourceType".to_owned(), Node::from("Bundle"));
        map.insert("type".to_owned(), Node::from("collection"));
        map.insert("entry".to_owned(), Node::List(entries));
        Node::Object(map)
    }

    /// Render as pretty-printed FHIR JSON (a `collection` Bundle).
    ///
    /// # Errors
    ///
    /// Returns [`FhirError::InvalidJson`] if serialisation fails.
    pub fn to_json(&self) -> FhirResult<String> {
        Ok(serde_json::to_string_pretty(&self.to_node())?)
    }

    /// Read the scalar value at `path` as text.
    ///
    /// Missing elements, non-scalar values, and empty strings read as `None`.
    pub fn get(&self, path: &FhirPath) -> Option<String> {
        let mut current = self.resource(path.resource_type(), path.resource_index())?;
        for step in path.steps() {
            let child = current.get(step.name())?;
            current = match (child, step.index()) {
                (Node::List(items), idx) => items.get(idx.unwrap_or(0))?,
                (other, None | Some(0)) => other,
                (_, Some(_)) => return None,
            };
        }
        current.as_text().filter(|t| !t.is_empty())
    }

    /// Write `value` at `path`, creating the resource and any intermediate objects and
    /// arrays on demand.
    ///
    /// # Errors
    ///
    /// Returns [`FhirError::PathConflict`] if an element on the way already holds a value
    /// of an incompatible kind (for example a string where an object is needed).
    pub fn set(&mut self, path: &FhirPath, value: impl Into<Node>) -> FhirResult<()> {
        let resource_type = path.resource_type();
        let existing = self
            .resources
            .iter()
            .filter(|r| r.resource_type() == Some(resource_type))
            .count();
        for _ in existing..=path.resource_index() {
            self.resources.push(Node::resource(resource_type));
        }

        let resource = self
            .resources
            .iter_mut()
            .filter(|r| r.resource_type() == Some(resource_type))
            .nth(path.resource_index())
            .ok_or_else(|| FhirError::Translation(format!("resource for '{path}' not created")))?;

        write(resource, path.steps(), value.into(), path, 0)
    }
}

impl Serialize for Bundle {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_node().serialize(serializer)
    }
}

/// Empty slot for a step that still has `rest` below it.
fn placeholder(rest: &[PathStep]) -> Node {
    if rest.is_empty() {
        Node::Null
    } else {
        Node::object()
    }
}

fn conflict(path: &FhirPath, depth: usize, found: &Node) -> FhirError {
    let mut at = path.resource_type().to_owned();
    for step in &path.steps()[..depth] {
        at.push('.');
        at.push_str(step.name());
    }
    FhirError::PathConflict {
        path: path.to_string(),
        at,
        found: found.kind(),
    }
}

fn write(
    node: &mut Node,
    steps: &[PathStep],
    value: Node,
    path: &FhirPath,
    depth: usize,
) -> FhirResult<()> {
    let Some((step, rest)) = steps.split_first() else {
        *node = value;
        return Ok(());
    };

    // Intermediate nulls are holes left by earlier array growth.
    if node.is_null() {
        *node = Node::object();
    }
    let Node::Object(map) = node else {
        return Err(conflict(path, depth, node));
    };

    let child = map.entry(step.name().to_owned()).or_insert_with(|| {
        if step.index().is_some() {
            Node::List(Vec::new())
        } else {
            placeholder(rest)
        }
    });

    let slot = match step.index() {
        Some(idx) => {
            let Node::List(items) = child else {
                return Err(conflict(path, depth + 1, child));
            };
            while items.len() <= idx {
                items.push(placeholder(rest));
            }
            &mut items[idx]
        }
        None => match child {
            Node::List(items) if !rest.is_empty() => {
                if items.is_empty() {
                    items.push(Node::object());
                }
                &mut items[0]
            }
            other => other,
        },
    };

    write(slot, rest, value, path, depth + 1)
}
