//! # Nodes
//!
//! A node is an addressable unit of the document graph. Nodes never embed
//! their children: the arena owns every node and links are ids, so no
//! ownership cycle can form. The parent link is a back-reference used for
//! lookups only.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use trellis_common::Value;

/// Stable node identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        NodeId(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        NodeId(s)
    }
}

impl From<&NodeId> for NodeId {
    fn from(id: &NodeId) -> Self {
        id.clone()
    }
}

/// A node in the document arena
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub(crate) id: NodeId,
    pub(crate) type_tag: String,
    pub(crate) children: Vec<NodeId>,
    pub(crate) parent: Option<NodeId>,
    pub(crate) properties: BTreeMap<String, Value>,
}

impl Node {
    /// Create a detached node with no properties
    pub fn new(id: impl Into<NodeId>, type_tag: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            type_tag: type_tag.into(),
            children: Vec::new(),
            parent: None,
            properties: BTreeMap::new(),
        }
    }

    /// Builder-style property initializer for detached nodes
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn parent(&self) -> Option<&NodeId> {
        self.parent.as_ref()
    }

    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    pub fn properties(&self) -> &BTreeMap<String, Value> {
        &self.properties
    }

    pub(crate) fn position_of(&self, child: &NodeId) -> Option<usize> {
        self.children.iter().position(|c| c == child)
    }
}
