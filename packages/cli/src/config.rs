use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use trellis_editor::DocumentConfig;

pub const DEFAULT_CONFIG_NAME: &str = "trellis.config.json";

/// Trellis configuration file format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Directory holding `<key>.json` documents
    #[serde(default = "default_store_dir")]
    pub store_dir: String,

    /// Settings applied to every document opened by the CLI
    #[serde(default)]
    pub document: DocumentConfig,
}

fn default_store_dir() -> String {
    "documents".to_string()
}

impl Config {
    /// Load config from a directory
    pub fn load(cwd: &str) -> anyhow::Result<Self> {
        let config_path = PathBuf::from(cwd).join(DEFAULT_CONFIG_NAME);

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = serde_json::from_str(&content)?;
            Ok(config)
        } else {
            // Return default config if none exists
            Ok(Config::default())
        }
    }

    /// Get absolute path to the document store
    pub fn get_store_dir(&self, cwd: &str) -> PathBuf {
        PathBuf::from(cwd).join(&self.store_dir)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_dir: default_store_dir(),
            document: DocumentConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let json = r#"{
            "storeDir": "plans",
            "document": { "undoLimit": 20, "verifyAfterMutation": false }
        }"#;

        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.store_dir, "plans");
        assert_eq!(config.document.undo_limit, 20);
        assert!(!config.document.verify_after_mutation);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config = serde_json::from_str(r#"{"document": {"undoLimit": 5}}"#).unwrap();
        assert_eq!(config.store_dir, "documents");
        assert_eq!(config.document.undo_limit, 5);
        assert!(config.document.verify_after_mutation);
    }

    #[test]
    fn test_missing_file_gives_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path().to_str().unwrap()).unwrap();
        assert_eq!(config, Config::default());
    }
}
