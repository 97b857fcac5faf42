//! # Serialization Codec
//!
//! Converts a [`Document`] to and from a versioned, self-describing record.
//! The record is a nested tree; the arena and id index are rebuilt on load.
//!
//! ```json
//! {
//!   "version": 3,
//!   "root": {
//!     "id": "root",
//!     "type": "document",
//!     "properties": {},
//!     "children": [
//!       {"id": "g1", "type": "group", "properties": {"name": {"type": "text", "value": "Walls"}}, "children": []}
//!     ]
//!   }
//! }
//! ```
//!
//! Loading runs every migration between the stored version and
//! [`SCHEMA_VERSION`], then validates types and ids. Nothing is loaded
//! partially: any failure leaves no document behind.
//!
//! Documents are limited to [`MAX_DEPTH`] tree levels. Deeper documents are
//! refused when encoding, so every record this codec writes can be read back.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info};
use trellis_common::Value;

use crate::{
    standard_migrations, Document, DocumentConfig, DocumentStore, EditorError, EditorResult,
    Migration, Node, NodeId, TypeRegistry,
};

/// Schema version written by this build
pub const SCHEMA_VERSION: u32 = 3;

/// Deepest tree the codec will encode or decode, counting the root as level 1
pub const MAX_DEPTH: usize = 256;

// Each tree level is a node object plus its children array; the rest is
// headroom for nested property values
const MAX_JSON_DEPTH: usize = 2 * MAX_DEPTH + 64;

/// Versioned on-disk form of a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedDocument {
    pub version: u32,
    pub root: SerializedNode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedNode {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub type_tag: String,
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
    #[serde(default)]
    pub children: Vec<SerializedNode>,
}

impl SerializedNode {
    pub fn new(id: impl Into<NodeId>, type_tag: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            type_tag: type_tag.into(),
            properties: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    /// Visit this node and its descendants in pre-order
    pub fn walk_mut(&mut self, f: &mut dyn FnMut(&mut SerializedNode)) {
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            f(node);
            stack.extend(node.children.iter_mut().rev());
        }
    }

    /// Number of nodes in this subtree
    pub fn count(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            count += 1;
            stack.extend(node.children.iter());
        }
        count
    }
}

#[derive(Deserialize)]
struct VersionProbe {
    version: u32,
}

/// Encodes and decodes documents for one type registry and migration chain
pub struct Codec {
    registry: Arc<TypeRegistry>,
    migrations: BTreeMap<u32, Box<dyn Migration>>,
    current_version: u32,
    config: DocumentConfig,
}

impl Codec {
    /// Codec for the current schema with the standard migration chain
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        let mut codec = Self {
            registry,
            migrations: BTreeMap::new(),
            current_version: SCHEMA_VERSION,
            config: DocumentConfig::default(),
        };
        for migration in standard_migrations() {
            codec.migrations.insert(migration.from_version(), migration);
        }
        codec
    }

    /// Codec with a custom target version and migration chain
    pub fn with_migrations(
        registry: Arc<TypeRegistry>,
        current_version: u32,
        migrations: Vec<Box<dyn Migration>>,
    ) -> EditorResult<Self> {
        if current_version == 0 {
            return Err(EditorError::Validation(
                "schema versions start at 1".to_string(),
            ));
        }

        let mut chain = BTreeMap::new();
        for migration in migrations {
            let from = migration.from_version();
            if from == 0 || from >= current_version {
                return Err(EditorError::Validation(format!(
                    "migration from version {} is outside 1..{}",
                    from, current_version
                )));
            }
            if chain.insert(from, migration).is_some() {
                return Err(EditorError::Validation(format!(
                    "two migrations start at version {}",
                    from
                )));
            }
        }

        Ok(Self {
            registry,
            migrations: chain,
            current_version,
            config: DocumentConfig::default(),
        })
    }

    /// Config given to documents created by `deserialize`
    pub fn with_config(mut self, config: DocumentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn current_version(&self) -> u32 {
        self.current_version
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    // ---------------------------------------------------------------------
    // Encode
    // ---------------------------------------------------------------------

    /// Snapshot `document`. Fails with `Validation` if the tree is deeper
    /// than [`MAX_DEPTH`].
    pub fn serialize(&self, document: &Document) -> EditorResult<SerializedDocument> {
        let mut order = Vec::with_capacity(document.node_count());
        let mut stack = vec![(document.root().clone(), 1usize)];
        while let Some((id, depth)) = stack.pop() {
            if depth > MAX_DEPTH {
                return Err(EditorError::Validation(format!(
                    "document is nested deeper than {} levels",
                    MAX_DEPTH
                )));
            }
            let node = document.node(&id)?;
            stack.extend(node.children().iter().rev().map(|c| (c.clone(), depth + 1)));
            order.push(id);
        }

        // Reverse pre-order reaches every child before its parent
        let mut encoded: HashMap<NodeId, SerializedNode> = HashMap::with_capacity(order.len());
        for id in order.into_iter().rev() {
            let node = document.node(&id)?;
            let children = node
                .children()
                .iter()
                .map(|child| {
                    encoded.remove(child).ok_or_else(|| {
                        EditorError::Consistency(format!("child {} of {} was not encoded", child, id))
                    })
                })
                .collect::<EditorResult<Vec<_>>>()?;
            encoded.insert(
                id,
                SerializedNode {
                    id: node.id().clone(),
                    type_tag: node.type_tag().to_string(),
                    properties: node.properties().clone(),
                    children,
                },
            );
        }

        let root = encoded.remove(document.root()).ok_or_else(|| {
            EditorError::Consistency(format!("root {} was not encoded", document.root()))
        })?;
        Ok(SerializedDocument {
            version: self.current_version,
            root,
        })
    }

    pub fn to_json(&self, document: &Document) -> EditorResult<String> {
        Ok(serde_json::to_string_pretty(&self.serialize(document)?)?)
    }

    // ---------------------------------------------------------------------
    // Decode
    // ---------------------------------------------------------------------

    /// Read only the `version` field of an encoded document
    pub fn peek_version(json: &str) -> EditorResult<u32> {
        let probe: VersionProbe = decode(json)?;
        Ok(probe.version)
    }

    pub fn from_json(&self, key: &str, json: &str) -> EditorResult<Document> {
        // Check the version before the full parse: a newer schema may not
        // match our record layout at all
        let version = Self::peek_version(json)?;
        self.check_version(version)?;

        let data: SerializedDocument = decode(json)?;
        self.deserialize(key, data)
    }

    /// Migrate `data` to the current version, then rebuild the document
    pub fn deserialize(&self, key: &str, data: SerializedDocument) -> EditorResult<Document> {
        let data = self.migrate(data)?;

        let root = data.root.id.clone();
        let mut nodes = HashMap::with_capacity(data.root.count());
        self.rebuild(data.root, &mut nodes)?;

        let document = Document::from_arena(
            key,
            self.registry.clone(),
            self.config.clone(),
            root,
            nodes,
        )?;
        info!(key, nodes = document.node_count(), "Document loaded");
        Ok(document)
    }

    /// Upgrade `data` to the current version without building a document
    pub fn migrate(&self, mut data: SerializedDocument) -> EditorResult<SerializedDocument> {
        self.check_version(data.version)?;

        while data.version < self.current_version {
            let step = self.migrations.get(&data.version).ok_or(EditorError::Version {
                found: data.version,
                supported: self.current_version,
            })?;
            debug!(
                from = data.version,
                to = data.version + 1,
                step = %step.description(),
                "Applying migration"
            );
            step.migrate(&mut data)?;
            data.version += 1;
        }
        Ok(data)
    }

    fn check_version(&self, version: u32) -> EditorResult<()> {
        if version == 0 || version > self.current_version {
            return Err(EditorError::Version {
                found: version,
                supported: self.current_version,
            });
        }
        Ok(())
    }

    fn rebuild(&self, root: SerializedNode, nodes: &mut HashMap<NodeId, Node>) -> EditorResult<()> {
        let mut pending = vec![(root, None, 1usize)];
        while let Some((serialized, parent, depth)) = pending.pop() {
            if depth > MAX_DEPTH {
                return Err(EditorError::Validation(format!(
                    "document is nested deeper than {} levels",
                    MAX_DEPTH
                )));
            }
            let schema = self.registry.require(&serialized.type_tag)?;
            for (name, value) in &serialized.properties {
                schema.validate(&serialized.id, name, value)?;
            }
            if nodes.contains_key(&serialized.id) {
                return Err(EditorError::Validation(format!(
                    "duplicate node id {}",
                    serialized.id
                )));
            }

            let SerializedNode {
                id,
                type_tag,
                properties,
                children,
            } = serialized;
            let mut node = Node::new(id.clone(), type_tag);
            node.properties = properties;
            node.parent = parent;
            node.children = children.iter().map(|c| c.id.clone()).collect();
            nodes.insert(id.clone(), node);

            pending.extend(
                children
                    .into_iter()
                    .rev()
                    .map(|c| (c, Some(id.clone()), depth + 1)),
            );
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Store integration
    // ---------------------------------------------------------------------

    /// Encode `document` into `store` under its key and mark it saved
    pub fn save(&self, store: &mut dyn DocumentStore, document: &mut Document) -> EditorResult<()> {
        let data = self.serialize(document)?;
        store.save(document.key(), &data)?;
        document.mark_saved();
        Ok(())
    }

    pub fn load(&self, store: &dyn DocumentStore, key: &str) -> EditorResult<Document> {
        let json = store.load(key)?;
        self.from_json(key, &json)
    }
}

/// Parse `json` without serde_json's fixed recursion limit, after checking
/// its nesting against [`MAX_JSON_DEPTH`]
fn decode<T: DeserializeOwned>(json: &str) -> EditorResult<T> {
    let depth = nesting_depth(json);
    if depth > MAX_JSON_DEPTH {
        return Err(EditorError::Validation(format!(
            "record nesting depth {} exceeds the limit of {}",
            depth, MAX_JSON_DEPTH
        )));
    }

    let mut deserializer = serde_json::Deserializer::from_str(json);
    deserializer.disable_recursion_limit();
    let value = T::deserialize(&mut deserializer)?;
    deserializer.end()?;
    Ok(value)
}

/// Deepest bracket nesting in `json`, ignoring brackets inside strings
fn nesting_depth(json: &str) -> usize {
    let mut depth = 0usize;
    let mut deepest = 0;
    let mut in_string = false;
    let mut escaped = false;

    for byte in json.bytes() {
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' | b'[' => {
                depth += 1;
                deepest = deepest.max(depth);
            }
            b'}' | b']' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    deepest
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RenameProperty, ROOT_ID};

    fn codec() -> Codec {
        Codec::new(Arc::new(TypeRegistry::standard()))
    }

    fn sample() -> Document {
        let mut doc = Document::new("sample", Arc::new(TypeRegistry::standard()));
        let root = NodeId::from(ROOT_ID);
        doc.begin(Some("Build")).unwrap();
        doc.add_node(&root, Node::new("g", "group").with_property("name", "Walls"))
            .unwrap();
        doc.add_node(&"g".into(), Node::new("s", "shape").with_property("color", "red"))
            .unwrap();
        doc.add_node(&root, Node::new("l", "layer")).unwrap();
        doc.commit().unwrap();
        doc
    }

    #[test]
    fn test_serialize_nests_children_in_order() {
        let data = codec().serialize(&sample()).unwrap();

        assert_eq!(data.version, SCHEMA_VERSION);
        assert_eq!(data.root.count(), 4);
        let ids: Vec<&str> = data.root.children.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["g", "l"]);
        assert_eq!(data.root.children[0].children[0].type_tag, "shape");
    }

    #[test]
    fn test_round_trip_preserves_graph() {
        let codec = codec();
        let original = sample();
        let json = codec.to_json(&original).unwrap();
        let loaded = codec.from_json("sample", &json).unwrap();

        assert_eq!(
            codec.serialize(&loaded).unwrap(),
            codec.serialize(&original).unwrap()
        );
        assert_eq!(loaded.parent(&"s".into()).unwrap(), Some(&NodeId::from("g")));
        assert!(!loaded.history().can_undo());
    }

    #[test]
    fn test_newer_version_is_rejected_before_parsing() {
        let json = r#"{"version": 9, "root": "not a node"}"#;
        let err = codec().from_json("k", json).unwrap_err();
        assert_eq!(
            err,
            EditorError::Version {
                found: 9,
                supported: SCHEMA_VERSION
            }
        );
    }

    #[test]
    fn test_version_zero_is_rejected() {
        let json = r#"{"version": 0, "root": {"id": "root", "type": "document"}}"#;
        assert!(matches!(
            codec().from_json("k", json),
            Err(EditorError::Version { found: 0, .. })
        ));
    }

    #[test]
    fn test_v1_document_is_migrated() {
        let json = r#"{
            "version": 1,
            "root": {"id": "root", "type": "document", "children": [
                {"id": "g", "type": "group", "properties": {"label": {"type": "text", "value": "Walls"}}}
            ]}
        }"#;
        let doc = codec().from_json("k", json).unwrap();

        let g = NodeId::from("g");
        assert_eq!(doc.property(&g, "name"), Some(&Value::from("Walls")));
        assert_eq!(doc.property(&g, "label"), None);
        assert_eq!(doc.property(&g, "visible"), Some(&Value::Bool(true)));
    }

    #[test]
    fn test_gap_in_chain_is_version_error() {
        let codec = Codec::with_migrations(
            Arc::new(TypeRegistry::standard()),
            3,
            vec![Box::new(RenameProperty::new(1, "label", "name"))],
        )
        .unwrap();

        let data = SerializedDocument {
            version: 1,
            root: SerializedNode::new("root", "document"),
        };
        assert_eq!(
            codec.migrate(data).unwrap_err(),
            EditorError::Version {
                found: 2,
                supported: 3
            }
        );
    }

    #[test]
    fn test_duplicate_migration_is_rejected() {
        let result = Codec::with_migrations(
            Arc::new(TypeRegistry::standard()),
            3,
            vec![
                Box::new(RenameProperty::new(1, "a", "b")),
                Box::new(RenameProperty::new(1, "c", "d")),
            ],
        );
        assert!(matches!(result, Err(EditorError::Validation(_))));
    }

    #[test]
    fn test_unknown_type_fails_whole_load() {
        let json = r#"{"version": 3, "root": {"id": "root", "type": "document", "children": [
            {"id": "x", "type": "spline"}
        ]}}"#;
        assert!(matches!(
            codec().from_json("k", json),
            Err(EditorError::Validation(_))
        ));
    }

    #[test]
    fn test_duplicate_id_fails_load() {
        let json = r#"{"version": 3, "root": {"id": "root", "type": "document", "children": [
            {"id": "a", "type": "group"},
            {"id": "a", "type": "layer"}
        ]}}"#;
        assert!(matches!(
            codec().from_json("k", json),
            Err(EditorError::Validation(_))
        ));
    }

    #[test]
    fn test_generated_ids_continue_after_load() {
        let codec = codec();
        let mut doc = Document::new("k", Arc::new(TypeRegistry::standard()));
        let node = doc.create_node("group").unwrap();
        let first = doc.add_node(&NodeId::from(ROOT_ID), node).unwrap();

        let mut loaded = codec.from_json("k", &codec.to_json(&doc).unwrap()).unwrap();
        let next = loaded.create_node("group").unwrap();
        assert_ne!(next.id(), &first);
        assert!(next.id().as_str().ends_with("-2"));
    }

    #[test]
    fn test_opaque_descriptor_survives_round_trip() {
        let codec = codec();
        let mut doc = Document::new("k", Arc::new(TypeRegistry::standard()));
        let payload = serde_json::json!({"edges": [[0, 1], [1, 2]], "closed": true});
        let shape = Node::new("s", "shape")
            .with_property("descriptor", Value::opaque("brep", payload.clone()));
        doc.add_node(&NodeId::from(ROOT_ID), shape).unwrap();

        let loaded = codec.from_json("k", &codec.to_json(&doc).unwrap()).unwrap();
        assert_eq!(
            loaded.property(&"s".into(), "descriptor"),
            Some(&Value::opaque("brep", payload))
        );
    }

    fn chain(depth: usize) -> Document {
        let mut doc = Document::new("deep", Arc::new(TypeRegistry::standard()));
        let mut parent = NodeId::from(ROOT_ID);
        doc.begin(Some("Chain")).unwrap();
        for i in 1..depth {
            parent = doc
                .add_node(&parent, Node::new(format!("n{}", i), "group"))
                .unwrap();
        }
        doc.commit().unwrap();
        doc
    }

    #[test]
    fn test_deep_tree_round_trips() {
        let codec = codec();
        let doc = chain(100);
        let json = codec.to_json(&doc).unwrap();
        assert!(nesting_depth(&json) > 128);

        let loaded = codec.from_json("deep", &json).unwrap();
        assert_eq!(loaded.node_count(), 100);
        assert_eq!(
            loaded.ancestors(&"n99".into()).unwrap().len(),
            99
        );
        assert_eq!(codec.serialize(&loaded).unwrap(), codec.serialize(&doc).unwrap());
    }

    #[test]
    fn test_tree_deeper_than_limit_is_not_encoded() {
        let codec = codec();
        assert!(codec.serialize(&chain(MAX_DEPTH)).is_ok());

        let err = codec.serialize(&chain(MAX_DEPTH + 1)).unwrap_err();
        assert!(matches!(err, EditorError::Validation(_)));
    }

    #[test]
    fn test_overly_nested_record_is_refused() {
        let json = format!("{}{}", "[".repeat(MAX_JSON_DEPTH + 1), "]".repeat(MAX_JSON_DEPTH + 1));
        assert!(matches!(
            codec().from_json("k", &json),
            Err(EditorError::Validation(_))
        ));
    }

    #[test]
    fn test_nesting_depth_skips_strings() {
        assert_eq!(nesting_depth(r#"{"a": [1, {"b": "[[[{"}]}"#), 3);
        assert_eq!(nesting_depth(r#"["\"", "\"[["]"#), 1);
        assert_eq!(nesting_depth("3"), 0);
    }
}
