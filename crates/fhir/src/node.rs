//! JSON node tree.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// One value in a FHIR JSON document.
///
/// Objects keep their key order so a resource renders the way it was read.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Node {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
    List(Vec<Node>),
    Object(IndexMap<String, Node>),
}

impl Node {
    /// An empty JSON object.
    pub fn object() -> Self {
        Node::Object(IndexMap::new())
    }

    /// A resource skeleton carrying only `resourceType`.
    pub fn resource(resource_type: impl Into<String>) -> Self {
        let mut map = IndexMap::new();
        map.insert("resourceType".to_owned(), Node::Text(resource_type.into()));
        Node::Object(map)
    }

    /// The `resourceType` of an object node, if it has one.
    pub fn resource_type(&self) -> Option<&str> {
        match self.get("resourceType") {
            Some(Node::Text(t)) => Some(t),
            _ => None,
        }
    }

    /// Member lookup on an object node.
    pub fn get(&self, key: &str) -> Option<&Node> {
        match self {
            Node::Object(map) => map.get(key),
            _ => None,
        }
    }

    /// Scalar value rendered as text; `None` for null, lists, and objects.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Node::Text(t) => Some(t.clone()),
            Node::Number(n) => Some(n.to_string()),
            Node::Bool(b) => Some(b.to_string()),
            Node::Null | Node::List(_) | Node::Object(_) => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Node::Null)
    }

    /// Short description of the node kind, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Node::Null => "null",
            Node::Bool(_) => "a boolean",
            Node::Number(_) => "a number",
            Node::Text(_) => "a string",
            Node::List(_) => "an array",
            Node::Object(_) => "an object",
        }
    }
}

impl From<&str> for Node {
    fn from(value: &str) -> Self {
        Node::Text(value.to_owned())
    }
}

impl From<String> for Node {
    fn from(value: String) -> Self {
        Node::Text(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_all_json_kinds_in_order() {
        let json = r#"{"resourceType":"Observation","status":"final","valueQuantity":{"value":95.5,"unit":"mg/dL"},"issued":null,"focus":[],"active":true}"#;
        let node: Node = serde_json::from_str(json).expect("valid json");

        assert_eq!(node.resource_type(), Some("Observation"));
        let Node::Object(map) = &node else {
            panic!("expected object, got {node:?}");
        };
        let keys: Vec<&str> = map.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec!["resourceType", "status", "valueQuantity", "issued", "focus", "active"]
        );
        assert!(map["issued"].is_null());
        assert_eq!(map["focus"], Node::List(vec![]));
        assert_eq!(map["active"].as_text().as_deref(), Some("true"));
        assert_eq!(
            node.get("valueQuantity")
                .and_then(|q| q.get("value"))
                .and_then(Node::as_text)
                .as_deref(),
            Some("95.5")
        );
    }

    #[test]
    fn serializes_back_to_same_json() {
        let json = r#"{"resourceType":"Patient","id":"p1","name":[{"family":"DOE","given":["JOHN"]}]}"#;
        let node: Node = serde_json::from_str(json).expect("valid json");
        assert_eq!(serde_json::to_string(&node).expect("serializes"), json);
    }

    #[test]
    fn composite_nodes_have_no_text() {
        assert_eq!(Node::object().as_text(), None);
        assert_eq!(Node::List(vec![Node::from("a")]).as_text(), None);
        assert_eq!(Node::Null.as_text(), None);
    }
}
