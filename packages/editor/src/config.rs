use serde::{Deserialize, Serialize};

/// Per-document runtime settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentConfig {
    /// Maximum number of undo entries kept (0 = unlimited)
    #[serde(default = "default_undo_limit")]
    pub undo_limit: usize,

    /// Run a full graph verification after every structural mutation
    #[serde(default = "default_verify")]
    pub verify_after_mutation: bool,
}

fn default_undo_limit() -> usize {
    100
}

fn default_verify() -> bool {
    true
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            undo_limit: default_undo_limit(),
            verify_after_mutation: default_verify(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_partial_config() {
        let config: DocumentConfig = serde_json::from_str(r#"{ "undoLimit": 5 }"#).unwrap();
        assert_eq!(config.undo_limit, 5);
        assert!(config.verify_after_mutation);
    }

    #[test]
    fn test_default_config() {
        let config = DocumentConfig::default();
        assert_eq!(config.undo_limit, 100);
        assert!(config.verify_after_mutation);
    }
}
