//! # Document
//!
//! The editable node graph: an id-indexed arena of [`Node`]s with one root,
//! the document's [`TransactionLog`], a selection and a listener list.
//!
//! ## Mutation rules
//!
//! - Property writes compare by value and are no-ops when nothing changes.
//!   Inside an open transaction they are recorded before being applied.
//!   Outside a transaction they are applied directly and are not undoable
//!   ([`SetOutcome::Untracked`]); use that only for transient state.
//! - Structural operations (add/insert/remove/move) always go through a
//!   transaction. With none open, the operation gets an implicit one and
//!   becomes its own undo entry.
//! - After every structural change the graph invariants are verified. A
//!   violation halts the document: every later mutation fails with
//!   [`EditorError::Consistency`].
//!
//! ## Lifecycle
//!
//! ```text
//! new/load → begin → mutate → commit ─→ undo ⇄ redo
//!                          └→ rollback (state restored)
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error};
use trellis_common::{IdGenerator, Value};

use crate::{
    Change, CommitOutcome, DocumentConfig, EditorError, EditorResult, ListenerId,
    ListenerResult, Listeners, Node, NodeId, Notification, Observable, TransactionLog,
    TypeRegistry,
};

/// Id given to the root node of a new document
pub const ROOT_ID: &str = "root";

/// Type tag of the root node of a new document
pub const ROOT_TYPE: &str = "document";

/// What a property write did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    /// The value was equal to the current one
    Unchanged,
    /// Recorded in the open transaction (undoable)
    Recorded,
    /// Applied with no transaction open (not undoable)
    Untracked,
}

/// Editable node graph
#[derive(Debug)]
pub struct Document {
    /// Store key identifying this document
    key: String,

    nodes: HashMap<NodeId, Node>,
    root: NodeId,

    log: TransactionLog,
    selection: Vec<NodeId>,
    /// Selection at each open `begin`, restored by the matching rollback
    selection_marks: Vec<Vec<NodeId>>,
    listeners: Listeners<Notification>,

    registry: Arc<TypeRegistry>,
    ids: IdGenerator,
    config: DocumentConfig,

    /// Increments on every commit, undo and redo
    revision: u64,

    /// Set once an invariant violation is detected
    halted: Option<String>,
}

impl Document {
    /// Create a document holding only a root node
    pub fn new(key: impl Into<String>, registry: Arc<TypeRegistry>) -> Self {
        Self::with_config(key, registry, DocumentConfig::default())
    }

    pub fn with_config(
        key: impl Into<String>,
        registry: Arc<TypeRegistry>,
        config: DocumentConfig,
    ) -> Self {
        let key = key.into();
        let root = NodeId::from(ROOT_ID);
        let mut nodes = HashMap::new();
        nodes.insert(root.clone(), Node::new(root.clone(), ROOT_TYPE));

        Self {
            ids: IdGenerator::for_key(&key),
            log: TransactionLog::with_max_levels(config.undo_limit),
            key,
            nodes,
            root,
            selection: Vec::new(),
            selection_marks: Vec::new(),
            listeners: Listeners::new(),
            registry,
            config,
            revision: 0,
            halted: None,
        }
    }

    /// Assemble a document from an already-built arena (used by the codec)
    pub(crate) fn from_arena(
        key: impl Into<String>,
        registry: Arc<TypeRegistry>,
        config: DocumentConfig,
        root: NodeId,
        nodes: HashMap<NodeId, Node>,
    ) -> EditorResult<Self> {
        let key = key.into();
        let mut ids = IdGenerator::for_key(&key);
        for id in nodes.keys() {
            ids.observe(id.as_str());
        }
        let doc = Self {
            ids,
            log: TransactionLog::with_max_levels(config.undo_limit),
            key,
            nodes,
            root,
            selection: Vec::new(),
            selection_marks: Vec::new(),
            listeners: Listeners::new(),
            registry,
            config,
            revision: 0,
            halted: None,
        };
        doc.verify()?;
        Ok(doc)
    }

    // ---------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn root(&self) -> &NodeId {
        &self.root
    }

    /// O(1) lookup through the id index
    pub fn find_by_id(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Like `find_by_id`, but a miss is an error
    pub fn node(&self, id: &NodeId) -> EditorResult<&Node> {
        self.nodes.get(id).ok_or_else(|| EditorError::node_not_found(id))
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn children(&self, id: &NodeId) -> EditorResult<&[NodeId]> {
        Ok(self.node(id)?.children())
    }

    pub fn parent(&self, id: &NodeId) -> EditorResult<Option<&NodeId>> {
        Ok(self.node(id)?.parent())
    }

    pub fn property(&self, id: &NodeId, name: &str) -> Option<&Value> {
        self.nodes.get(id).and_then(|node| node.property(name))
    }

    /// Ancestors of `id`, nearest first
    pub fn ancestors(&self, id: &NodeId) -> EditorResult<Vec<NodeId>> {
        let mut out = Vec::new();
        let mut cursor = self.node(id)?.parent.clone();
        while let Some(parent) = cursor {
            if out.contains(&parent) || out.len() > self.nodes.len() {
                return Err(EditorError::Consistency(format!(
                    "parent chain of {} loops",
                    id
                )));
            }
            cursor = self.node(&parent)?.parent.clone();
            out.push(parent);
        }
        Ok(out)
    }

    /// `id` and all of its descendants in pre-order
    pub fn descendants(&self, id: &NodeId) -> EditorResult<Vec<NodeId>> {
        self.node(id)?;
        let mut out = Vec::new();
        let mut stack = vec![id.clone()];
        while let Some(current) = stack.pop() {
            let node = self.node(&current)?;
            stack.extend(node.children.iter().rev().cloned());
            out.push(current);
        }
        Ok(out)
    }

    /// Whether `ancestor` is `node` or one of its ancestors
    pub fn is_ancestor_or_self(&self, ancestor: &NodeId, node: &NodeId) -> EditorResult<bool> {
        if ancestor == node {
            return Ok(true);
        }
        Ok(self.ancestors(node)?.contains(ancestor))
    }

    /// Every node in arena order (unspecified, but stable between mutations)
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &DocumentConfig {
        &self.config
    }

    pub fn history(&self) -> &TransactionLog {
        &self.log
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn in_transaction(&self) -> bool {
        self.log.is_open()
    }

    pub fn is_dirty(&self) -> bool {
        self.log.is_dirty()
    }

    pub fn mark_saved(&mut self) {
        self.log.mark_saved();
    }

    pub fn is_halted(&self) -> bool {
        self.halted.is_some()
    }

    pub fn halt_reason(&self) -> Option<&str> {
        self.halted.as_deref()
    }

    // ---------------------------------------------------------------------
    // Selection (runtime state, not undoable)
    // ---------------------------------------------------------------------

    pub fn selection(&self) -> &[NodeId] {
        &self.selection
    }

    pub fn set_selection<I>(&mut self, ids: I) -> EditorResult<()>
    where
        I: IntoIterator<Item = NodeId>,
    {
        let mut selection = Vec::new();
        for id in ids {
            self.node(&id)?;
            if !selection.contains(&id) {
                selection.push(id);
            }
        }
        self.selection = selection;
        Ok(())
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    // ---------------------------------------------------------------------
    // Transactions
    // ---------------------------------------------------------------------

    /// Open a transaction (or nest in the open one); returns the depth
    pub fn begin(&mut self, label: Option<&str>) -> EditorResult<usize> {
        self.ensure_live()?;
        let depth = self.log.begin(label.map(str::to_string));
        self.selection_marks.push(self.selection.clone());
        Ok(depth)
    }

    pub fn commit(&mut self) -> EditorResult<CommitOutcome> {
        self.ensure_live()?;
        let outcome = self.log.commit()?;
        self.selection_marks.pop();
        if let CommitOutcome::Committed { changes } = outcome {
            self.revision += 1;
            debug!(key = %self.key, changes, revision = self.revision, "Transaction committed");
        }
        Ok(outcome)
    }

    /// Revert everything recorded since the matching `begin`. Returns the
    /// number of changes reverted.
    pub fn rollback(&mut self) -> EditorResult<usize> {
        self.ensure_live()?;
        let changes = match self.log.rollback() {
            Ok(changes) => changes,
            Err(EditorError::Consistency(reason)) => return Err(self.halt(reason)),
            Err(e) => return Err(e),
        };
        for change in changes.iter().rev() {
            self.replay(&change.inverse())?;
        }
        if let Some(selection) = self.selection_marks.pop() {
            self.selection = selection;
        }
        debug!(key = %self.key, reverted = changes.len(), "Transaction rolled back");
        Ok(changes.len())
    }

    /// Revert the most recent undo entry. Returns false if there is none.
    pub fn undo(&mut self) -> EditorResult<bool> {
        self.ensure_live()?;
        self.ensure_no_transaction("undo")?;

        let Some(entry) = self.log.take_undo() else {
            return Ok(false);
        };
        for change in entry.changes.iter().rev() {
            self.replay(&change.inverse())?;
        }
        debug!(key = %self.key, label = ?entry.label, "Undo");
        self.log.push_redo(entry);
        self.revision += 1;
        Ok(true)
    }

    /// Reapply the most recently undone entry. Returns false if there is none.
    pub fn redo(&mut self) -> EditorResult<bool> {
        self.ensure_live()?;
        self.ensure_no_transaction("redo")?;

        let Some(entry) = self.log.take_redo() else {
            return Ok(false);
        };
        for change in entry.changes.iter() {
            self.replay(change)?;
        }
        debug!(key = %self.key, label = ?entry.label, "Redo");
        self.log.push_undo(entry);
        self.revision += 1;
        Ok(true)
    }

    /// Drop all undo/redo history
    pub fn clear_history(&mut self) {
        self.log.clear();
    }

    // ---------------------------------------------------------------------
    // Property mutation
    // ---------------------------------------------------------------------

    pub fn set_property(
        &mut self,
        id: &NodeId,
        property: &str,
        value: impl Into<Value>,
    ) -> EditorResult<SetOutcome> {
        let value = value.into();
        self.ensure_live()?;

        let node = self.node(id)?;
        self.registry
            .require(&node.type_tag)?
            .validate(id, property, &value)?;

        let old = node.property(property).cloned();
        if old.as_ref() == Some(&value) {
            return Ok(SetOutcome::Unchanged);
        }

        self.write_property(id, property, old, Some(value))
    }

    pub fn remove_property(&mut self, id: &NodeId, property: &str) -> EditorResult<SetOutcome> {
        self.ensure_live()?;

        let old = self.node(id)?.property(property).cloned();
        if old.is_none() {
            return Ok(SetOutcome::Unchanged);
        }

        self.write_property(id, property, old, None)
    }

    fn write_property(
        &mut self,
        id: &NodeId,
        property: &str,
        old: Option<Value>,
        new: Option<Value>,
    ) -> EditorResult<SetOutcome> {
        let change = Change::SetProperty {
            node: id.clone(),
            property: property.to_string(),
            old,
            new,
        };

        if self.log.is_open() {
            self.perform(change)?;
            Ok(SetOutcome::Recorded)
        } else {
            debug!(node = %id, property, "Untracked property write");
            self.replay(&change)?;
            Ok(SetOutcome::Untracked)
        }
    }

    // ---------------------------------------------------------------------
    // Structural mutation
    // ---------------------------------------------------------------------

    /// Allocate a detached node of `type_tag` with a fresh id and the
    /// schema's default property values
    pub fn create_node(&mut self, type_tag: &str) -> EditorResult<Node> {
        let schema = self.registry.require(type_tag)?;

        let mut id = NodeId::from(self.ids.next_id());
        while self.nodes.contains_key(&id) {
            id = NodeId::from(self.ids.next_id());
        }

        Ok(schema.instantiate(id))
    }

    /// Append `node` as the last child of `parent`
    pub fn add_node(&mut self, parent: &NodeId, node: Node) -> EditorResult<NodeId> {
        let position = self.node(parent)?.children.len();
        self.insert_node(parent, position, node)
    }

    /// Insert `node` under `parent` at `position` (clamped to the child count)
    pub fn insert_node(
        &mut self,
        parent: &NodeId,
        position: usize,
        mut node: Node,
    ) -> EditorResult<NodeId> {
        self.ensure_live()?;
        let parent_node = self.node(parent)?;
        let position = position.min(parent_node.children.len());

        if self.nodes.contains_key(&node.id) {
            if self.is_ancestor_or_self(&node.id, parent)? {
                return Err(EditorError::Cycle {
                    node: node.id.clone(),
                    parent: parent.clone(),
                });
            }
            return Err(EditorError::Validation(format!(
                "node id {} is already in use",
                node.id
            )));
        }
        if !node.children.is_empty() {
            return Err(EditorError::Validation(format!(
                "node {} must be added without children",
                node.id
            )));
        }

        let schema = self.registry.require(&node.type_tag)?;
        for (name, value) in &node.properties {
            schema.validate(&node.id, name, value)?;
        }

        node.parent = Some(parent.clone());
        let id = node.id.clone();
        self.perform_structural(
            Change::InsertSubtree {
                parent: parent.clone(),
                position,
                nodes: vec![node],
            },
            "Add node",
        )?;
        Ok(id)
    }

    /// Remove `id` and its whole subtree. Returns the removed ids (pre-order).
    pub fn remove_node(&mut self, id: &NodeId) -> EditorResult<Vec<NodeId>> {
        self.ensure_live()?;
        if id == &self.root {
            return Err(EditorError::Validation("the root node cannot be removed".to_string()));
        }

        let parent = self
            .node(id)?
            .parent
            .clone()
            .ok_or_else(|| EditorError::Consistency(format!("non-root node {} has no parent", id)))?;
        let position = self.node(&parent)?.position_of(id).ok_or_else(|| {
            EditorError::Consistency(format!("{} is missing from its parent {}", id, parent))
        })?;

        let nodes = self.subtree_snapshot(id)?;
        let removed = nodes.iter().map(|n| n.id.clone()).collect();

        self.perform_structural(
            Change::RemoveSubtree {
                parent,
                position,
                nodes,
            },
            "Remove node",
        )?;
        Ok(removed)
    }

    /// Move `id` under `new_parent` at `position` (clamped)
    pub fn move_node(
        &mut self,
        id: &NodeId,
        new_parent: &NodeId,
        position: usize,
    ) -> EditorResult<()> {
        self.ensure_live()?;
        if id == &self.root {
            return Err(EditorError::Validation("the root node cannot be moved".to_string()));
        }
        self.node(new_parent)?;

        if self.is_ancestor_or_self(id, new_parent)? {
            return Err(EditorError::Cycle {
                node: id.clone(),
                parent: new_parent.clone(),
            });
        }

        let from_parent = self
            .node(id)?
            .parent
            .clone()
            .ok_or_else(|| EditorError::Consistency(format!("non-root node {} has no parent", id)))?;
        let from_position = self.node(&from_parent)?.position_of(id).ok_or_else(|| {
            EditorError::Consistency(format!("{} is missing from its parent {}", id, from_parent))
        })?;

        let mut len_after_removal = self.node(new_parent)?.children.len();
        if &from_parent == new_parent {
            len_after_removal -= 1;
        }
        let to_position = position.min(len_after_removal);

        if &from_parent == new_parent && from_position == to_position {
            return Ok(());
        }

        self.perform_structural(
            Change::Move {
                node: id.clone(),
                from_parent,
                from_position,
                to_parent: new_parent.clone(),
                to_position,
            },
            "Move node",
        )
    }

    fn subtree_snapshot(&self, id: &NodeId) -> EditorResult<Vec<Node>> {
        self.descendants(id)?
            .iter()
            .map(|n| self.node(n).cloned())
            .collect()
    }

    // ---------------------------------------------------------------------
    // Change application
    // ---------------------------------------------------------------------

    /// Structural changes get an implicit transaction when none is open
    fn perform_structural(&mut self, change: Change, label: &str) -> EditorResult<()> {
        let implicit = !self.log.is_open();
        if implicit {
            self.begin(Some(label))?;
        }
        self.perform(change)?;
        if implicit {
            self.commit()?;
        }
        Ok(())
    }

    /// Record `change` in the open transaction, then apply it
    fn perform(&mut self, change: Change) -> EditorResult<()> {
        self.log.record(change.clone());
        self.replay(&change)
    }

    /// Apply, notify and verify. Any failure here means the arena no longer
    /// matches recorded history, so it halts the document.
    fn replay(&mut self, change: &Change) -> EditorResult<()> {
        if let Err(e) = self.apply_change(change) {
            return Err(self.halt(e.to_string()));
        }

        if change.is_structural() {
            if let Change::RemoveSubtree { .. } = change {
                let nodes = &self.nodes;
                self.selection.retain(|id| nodes.contains_key(id));
            }
            if self.config.verify_after_mutation {
                if let Err(e) = self.verify() {
                    return Err(self.halt(e.to_string()));
                }
            }
        }

        if let Some(notification) = change.notification() {
            self.listeners.notify(&notification);
        }
        Ok(())
    }

    /// Raw arena update, no recording or notification
    fn apply_change(&mut self, change: &Change) -> EditorResult<()> {
        match change {
            Change::SetProperty {
                node,
                property,
                new,
                ..
            } => {
                let node = self.node_mut(node)?;
                match new {
                    Some(value) => {
                        node.properties.insert(property.clone(), value.clone());
                    }
                    None => {
                        node.properties.remove(property);
                    }
                }
                Ok(())
            }

            Change::InsertSubtree {
                parent,
                position,
                nodes,
            } => {
                let root = nodes.first().ok_or_else(|| {
                    EditorError::Consistency("empty subtree snapshot".to_string())
                })?;
                if let Some(taken) = nodes.iter().find(|n| self.nodes.contains_key(&n.id)) {
                    return Err(EditorError::Consistency(format!(
                        "cannot insert {}: id already present",
                        taken.id
                    )));
                }

                let root_id = root.id.clone();
                let siblings = &mut self.node_mut(parent)?.children;
                if *position > siblings.len() {
                    return Err(EditorError::Consistency(format!(
                        "insert position {} out of range under {}",
                        position, parent
                    )));
                }
                siblings.insert(*position, root_id);

                for node in nodes {
                    self.nodes.insert(node.id.clone(), node.clone());
                }
                Ok(())
            }

            Change::RemoveSubtree {
                parent,
                position,
                nodes,
            } => {
                let root = nodes.first().ok_or_else(|| {
                    EditorError::Consistency("empty subtree snapshot".to_string())
                })?;
                let siblings = &mut self.node_mut(parent)?.children;
                if siblings.get(*position) != Some(&root.id) {
                    return Err(EditorError::Consistency(format!(
                        "{} is not at position {} under {}",
                        root.id, position, parent
                    )));
                }
                siblings.remove(*position);

                for node in nodes {
                    if self.nodes.remove(&node.id).is_none() {
                        return Err(EditorError::Consistency(format!(
                            "removed subtree member {} was not indexed",
                            node.id
                        )));
                    }
                }
                Ok(())
            }

            Change::Move {
                node,
                from_parent,
                from_position,
                to_parent,
                to_position,
            } => {
                let siblings = &mut self.node_mut(from_parent)?.children;
                if siblings.get(*from_position) != Some(node) {
                    return Err(EditorError::Consistency(format!(
                        "{} is not at position {} under {}",
                        node, from_position, from_parent
                    )));
                }
                siblings.remove(*from_position);

                let siblings = &mut self.node_mut(to_parent)?.children;
                if *to_position > siblings.len() {
                    return Err(EditorError::Consistency(format!(
                        "move position {} out of range under {}",
                        to_position, to_parent
                    )));
                }
                siblings.insert(*to_position, node.clone());

                self.node_mut(node)?.parent = Some(to_parent.clone());
                Ok(())
            }
        }
    }

    fn node_mut(&mut self, id: &NodeId) -> EditorResult<&mut Node> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| EditorError::node_not_found(id))
    }

    // ---------------------------------------------------------------------
    // Invariants
    // ---------------------------------------------------------------------

    /// Check that the index is exactly the set of nodes reachable from the
    /// root, that parent and child links agree, and that there are no cycles
    pub fn verify(&self) -> EditorResult<()> {
        let root = self
            .nodes
            .get(&self.root)
            .ok_or_else(|| EditorError::Consistency(format!("root {} is not indexed", self.root)))?;
        if root.parent.is_some() {
            return Err(EditorError::Consistency("root has a parent".to_string()));
        }

        let mut visited: HashSet<&NodeId> = HashSet::new();
        visited.insert(&self.root);
        let mut stack = vec![root];

        while let Some(node) = stack.pop() {
            for child_id in &node.children {
                let child = self.nodes.get(child_id).ok_or_else(|| {
                    EditorError::Consistency(format!("{} lists unindexed child {}", node.id, child_id))
                })?;
                if child.parent.as_ref() != Some(&node.id) {
                    return Err(EditorError::Consistency(format!(
                        "{} is a child of {} but its parent is {:?}",
                        child_id, node.id, child.parent
                    )));
                }
                if !visited.insert(child_id) {
                    return Err(EditorError::Consistency(format!(
                        "{} is reachable more than once",
                        child_id
                    )));
                }
                stack.push(child);
            }
        }

        if visited.len() != self.nodes.len() {
            return Err(EditorError::Consistency(format!(
                "{} indexed nodes are unreachable from the root",
                self.nodes.len() - visited.len()
            )));
        }
        Ok(())
    }

    fn ensure_live(&self) -> EditorResult<()> {
        match &self.halted {
            Some(reason) => Err(EditorError::Consistency(format!(
                "document halted: {}",
                reason
            ))),
            None => Ok(()),
        }
    }

    fn ensure_no_transaction(&self, action: &str) -> EditorResult<()> {
        if self.log.is_open() {
            return Err(EditorError::Busy(format!(
                "cannot {} while a transaction is open",
                action
            )));
        }
        Ok(())
    }

    fn halt(&mut self, reason: String) -> EditorError {
        error!(key = %self.key, reason = %reason, "Invariant violated; document halted");
        self.halted = Some(reason.clone());
        EditorError::Consistency(reason)
    }
}

impl Observable for Document {
    type Event = Notification;

    fn subscribe<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&Notification) -> ListenerResult + 'static,
    {
        self.listeners.subscribe(listener)
    }

    fn unsubscribe(&mut self, id: ListenerId) -> bool {
        self.listeners.unsubscribe(id)
    }
}
