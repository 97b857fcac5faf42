//! # Changes
//!
//! A change is a single reversible delta. Every change carries enough state
//! to build its exact inverse, so undo never has to consult the document.
//!
//! Structural changes carry a pre-order snapshot of the whole subtree
//! (`nodes[0]` is the subtree root). A removal snapshots descendants with the
//! property values they had at the moment of removal; undo reinserts that
//! snapshot verbatim.

use trellis_common::Value;

use crate::{Node, NodeId, Notification};

#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// `None` means the property is absent
    SetProperty {
        node: NodeId,
        property: String,
        old: Option<Value>,
        new: Option<Value>,
    },

    InsertSubtree {
        parent: NodeId,
        position: usize,
        nodes: Vec<Node>,
    },

    RemoveSubtree {
        parent: NodeId,
        position: usize,
        nodes: Vec<Node>,
    },

    Move {
        node: NodeId,
        from_parent: NodeId,
        from_position: usize,
        to_parent: NodeId,
        to_position: usize,
    },
}

impl Change {
    pub fn inverse(&self) -> Change {
        match self {
            Change::SetProperty {
                node,
                property,
                old,
                new,
            } => Change::SetProperty {
                node: node.clone(),
                property: property.clone(),
                old: new.clone(),
                new: old.clone(),
            },
            Change::InsertSubtree {
                parent,
                position,
                nodes,
            } => Change::RemoveSubtree {
                parent: parent.clone(),
                position: *position,
                nodes: nodes.clone(),
            },
            Change::RemoveSubtree {
                parent,
                position,
                nodes,
            } => Change::InsertSubtree {
                parent: parent.clone(),
                position: *position,
                nodes: nodes.clone(),
            },
            Change::Move {
                node,
                from_parent,
                from_position,
                to_parent,
                to_position,
            } => Change::Move {
                node: node.clone(),
                from_parent: to_parent.clone(),
                from_position: *to_position,
                to_parent: from_parent.clone(),
                to_position: *from_position,
            },
        }
    }

    pub fn is_structural(&self) -> bool {
        !matches!(self, Change::SetProperty { .. })
    }

    /// Primary node touched by this change; `None` for an empty snapshot
    pub fn target(&self) -> Option<&NodeId> {
        match self {
            Change::SetProperty { node, .. } | Change::Move { node, .. } => Some(node),
            Change::InsertSubtree { nodes, .. } | Change::RemoveSubtree { nodes, .. } => {
                nodes.first().map(|n| &n.id)
            }
        }
    }

    /// What listeners are told once this change is applied
    pub fn notification(&self) -> Option<Notification> {
        Some(match self {
            Change::SetProperty {
                node,
                property,
                old,
                new,
            } => Notification::PropertyChanged {
                node: node.clone(),
                property: property.clone(),
                old: old.clone(),
                new: new.clone(),
            },
            Change::InsertSubtree {
                parent, position, ..
            } => Notification::NodeAdded {
                node: self.target()?.clone(),
                parent: parent.clone(),
                position: *position,
            },
            Change::RemoveSubtree {
                parent, position, ..
            } => Notification::NodeRemoved {
                node: self.target()?.clone(),
                parent: parent.clone(),
                position: *position,
            },
            Change::Move {
                node,
                from_parent,
                to_parent,
                to_position,
                ..
            } => Notification::NodeMoved {
                node: node.clone(),
                from_parent: from_parent.clone(),
                to_parent: to_parent.clone(),
                to_position: *to_position,
            },
        })
    }
}
