//! # Schema Migrations
//!
//! Each migration upgrades a serialized document by exactly one schema
//! version. The codec chains them from the stored version up to the current
//! one; a missing step anywhere in that range makes the data unloadable.
//!
//! History of the persisted schema:
//!
//! | version | change                                               |
//! |---------|------------------------------------------------------|
//! | 1       | initial format, display names stored as `label`      |
//! | 2       | `label` renamed to `name`                            |
//! | 3       | `group` and `shape` nodes carry `visible` (default on) |

use tracing::debug;
use trellis_common::Value;

use crate::{EditorResult, SerializedDocument};

/// One upgrade step, from `from_version()` to `from_version() + 1`
pub trait Migration {
    fn from_version(&self) -> u32;

    fn description(&self) -> String;

    fn migrate(&self, document: &mut SerializedDocument) -> EditorResult<()>;
}

/// Rename a property on every node (or every node of one type)
#[derive(Debug, Clone)]
pub struct RenameProperty {
    pub from_version: u32,
    pub type_tag: Option<String>,
    pub old: String,
    pub new: String,
}

impl RenameProperty {
    pub fn new(from_version: u32, old: impl Into<String>, new: impl Into<String>) -> Self {
        Self {
            from_version,
            type_tag: None,
            old: old.into(),
            new: new.into(),
        }
    }

    pub fn for_type(mut self, type_tag: impl Into<String>) -> Self {
        self.type_tag = Some(type_tag.into());
        self
    }
}

impl Migration for RenameProperty {
    fn from_version(&self) -> u32 {
        self.from_version
    }

    fn description(&self) -> String {
        format!("rename property '{}' to '{}'", self.old, self.new)
    }

    fn migrate(&self, document: &mut SerializedDocument) -> EditorResult<()> {
        let mut renamed = 0usize;
        document.root.walk_mut(&mut |node| {
            if let Some(tag) = &self.type_tag {
                if &node.type_tag != tag {
                    return;
                }
            }
            if let Some(value) = node.properties.remove(&self.old) {
                // An explicit value under the new name wins
                node.properties.entry(self.new.clone()).or_insert(value);
                renamed += 1;
            }
        });
        debug!(old = %self.old, new = %self.new, renamed, "Renamed property");
        Ok(())
    }
}

/// Add a property with a default value to every node of the listed types
/// that does not have it yet
#[derive(Debug, Clone)]
pub struct AddDefaultProperty {
    pub from_version: u32,
    pub type_tags: Vec<String>,
    pub property: String,
    pub default: Value,
}

impl AddDefaultProperty {
    pub fn new<I, S>(
        from_version: u32,
        type_tags: I,
        property: impl Into<String>,
        default: impl Into<Value>,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            from_version,
            type_tags: type_tags.into_iter().map(Into::into).collect(),
            property: property.into(),
            default: default.into(),
        }
    }
}

impl Migration for AddDefaultProperty {
    fn from_version(&self) -> u32 {
        self.from_version
    }

    fn description(&self) -> String {
        format!(
            "add '{}' = {} to {}",
            self.property,
            self.default,
            self.type_tags.join(", ")
        )
    }

    fn migrate(&self, document: &mut SerializedDocument) -> EditorResult<()> {
        let mut added = 0usize;
        document.root.walk_mut(&mut |node| {
            if self.type_tags.contains(&node.type_tag)
                && !node.properties.contains_key(&self.property)
            {
                node.properties
                    .insert(self.property.clone(), self.default.clone());
                added += 1;
            }
        });
        debug!(property = %self.property, added, "Added default property");
        Ok(())
    }
}

/// Migrations for the built-in schema, oldest first
pub fn standard_migrations() -> Vec<Box<dyn Migration>> {
    vec![
        Box::new(RenameProperty::new(1, "label", "name")),
        Box::new(AddDefaultProperty::new(2, ["group", "shape"], "visible", true)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SerializedNode;

    fn v1_document() -> SerializedDocument {
        let mut root = SerializedNode::new("root", "document");
        let mut group = SerializedNode::new("g", "group");
        group.properties.insert("label".to_string(), Value::from("Walls"));
        let mut shape = SerializedNode::new("s", "shape");
        shape
            .properties
            .insert("visible".to_string(), Value::Bool(false));
        group.children.push(shape);
        root.children.push(group);
        SerializedDocument { version: 1, root }
    }

    #[test]
    fn test_rename_moves_value() {
        let mut doc = v1_document();
        RenameProperty::new(1, "label", "name").migrate(&mut doc).unwrap();

        let group = &doc.root.children[0];
        assert_eq!(group.properties.get("name"), Some(&Value::from("Walls")));
        assert!(!group.properties.contains_key("label"));
    }

    #[test]
    fn test_rename_restricted_to_type() {
        let mut doc = v1_document();
        RenameProperty::new(1, "label", "name")
            .for_type("shape")
            .migrate(&mut doc)
            .unwrap();

        assert!(doc.root.children[0].properties.contains_key("label"));
    }

    #[test]
    fn test_add_default_keeps_existing_values() {
        let mut doc = v1_document();
        AddDefaultProperty::new(2, ["group", "shape"], "visible", true)
            .migrate(&mut doc)
            .unwrap();

        let group = &doc.root.children[0];
        assert_eq!(group.properties.get("visible"), Some(&Value::Bool(true)));
        let shape = &group.children[0];
        assert_eq!(shape.properties.get("visible"), Some(&Value::Bool(false)));
        assert!(!doc.root.properties.contains_key("visible"));
    }

    #[test]
    fn test_standard_chain_is_contiguous() {
        let versions: Vec<u32> = standard_migrations()
            .iter()
            .map(|m| m.from_version())
            .collect();
        assert_eq!(versions, vec![1, 2]);
    }
}
