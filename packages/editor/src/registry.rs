//! # Type Registry
//!
//! Maps stable string type tags to node schemas. Tags are chosen by hand and
//! written to disk verbatim, so renaming a Rust type never changes the
//! persisted format.

use std::collections::BTreeMap;
use trellis_common::{Value, ValueKind};

use crate::{EditorError, EditorResult, Node, NodeId};

/// Declared property of a node type
#[derive(Debug, Clone, PartialEq)]
pub struct PropertySpec {
    pub kind: ValueKind,
    /// Value filled in when a node of this type is created
    pub default: Option<Value>,
}

/// Schema for one node type
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSchema {
    pub tag: String,
    pub properties: BTreeMap<String, PropertySpec>,
    /// Open schemas accept undeclared properties of any kind
    pub open: bool,
}

impl NodeSchema {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            properties: BTreeMap::new(),
            open: true,
        }
    }

    pub fn property(mut self, name: impl Into<String>, kind: ValueKind) -> Self {
        self.properties
            .insert(name.into(), PropertySpec { kind, default: None });
        self
    }

    pub fn property_with_default(
        mut self,
        name: impl Into<String>,
        kind: ValueKind,
        default: impl Into<Value>,
    ) -> Self {
        self.properties.insert(
            name.into(),
            PropertySpec {
                kind,
                default: Some(default.into()),
            },
        );
        self
    }

    /// Reject undeclared properties
    pub fn closed(mut self) -> Self {
        self.open = false;
        self
    }

    /// Check a property write against this schema
    pub fn validate(&self, node: &NodeId, property: &str, value: &Value) -> EditorResult<()> {
        if !value.is_finite() {
            return Err(EditorError::Validation(format!(
                "{}.{} cannot hold a non-finite number",
                node, property
            )));
        }
        match self.properties.get(property) {
            Some(spec) => {
                if value.is_null() || spec.kind.accepts(value.kind()) {
                    Ok(())
                } else {
                    Err(EditorError::kind_mismatch(node, property, spec.kind, value.kind()))
                }
            }
            None if self.open => Ok(()),
            None => Err(EditorError::Validation(format!(
                "{} ({}) has no property '{}'",
                node, self.tag, property
            ))),
        }
    }

    /// Detached node of this type carrying the default property values
    pub fn instantiate(&self, id: impl Into<NodeId>) -> Node {
        let mut node = Node::new(id, self.tag.clone());
        for (name, default) in self.defaults() {
            node.properties.insert(name.to_string(), default.clone());
        }
        node
    }

    /// Default values, in property-name order
    pub fn defaults(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.properties
            .iter()
            .filter_map(|(name, spec)| spec.default.as_ref().map(|d| (name.as_str(), d)))
    }
}

/// Registry of node schemas keyed by type tag
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    schemas: BTreeMap<String, NodeSchema>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in node types
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(NodeSchema::new("document").property("name", ValueKind::Text));
        registry.register(
            NodeSchema::new("group")
                .property("name", ValueKind::Text)
                .property_with_default("visible", ValueKind::Bool, true),
        );
        registry.register(
            NodeSchema::new("shape")
                .property("name", ValueKind::Text)
                .property("descriptor", ValueKind::Opaque)
                .property("color", ValueKind::Text)
                .property_with_default("visible", ValueKind::Bool, true),
        );
        registry.register(
            NodeSchema::new("layer")
                .property("name", ValueKind::Text)
                .property_with_default("locked", ValueKind::Bool, false),
        );
        registry
    }

    /// Register a schema, replacing any schema with the same tag
    pub fn register(&mut self, schema: NodeSchema) {
        self.schemas.insert(schema.tag.clone(), schema);
    }

    pub fn get(&self, tag: &str) -> Option<&NodeSchema> {
        self.schemas.get(tag)
    }

    pub fn require(&self, tag: &str) -> EditorResult<&NodeSchema> {
        self.get(tag)
            .ok_or_else(|| EditorError::Validation(format!("unknown node type '{}'", tag)))
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.schemas.contains_key(tag)
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(String::as_str)
    }
}
