use super::open_project;
use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use tracing::debug;
use trellis_editor::{builtin, CommandEngine, CommandOutcome, CommandRegistry, Params, Value};

#[derive(Debug, Args)]
pub struct ApplyArgs {
    /// Key of the document to edit
    pub key: String,

    /// JSON script: a list of {"command": .., "params": {..}} steps
    pub script: PathBuf,

    /// Run the whole script as one batch: every step or none
    #[arg(short, long)]
    pub atomic: bool,
}

/// One scripted command invocation
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScriptStep {
    pub command: String,
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl ScriptStep {
    pub fn to_params(&self) -> Params {
        self.params
            .iter()
            .map(|(k, v)| (k.clone(), Value::from_plain_json(v.clone())))
            .collect()
    }
}

pub fn parse_script(json: &str) -> Result<Vec<ScriptStep>> {
    Ok(serde_json::from_str(json)?)
}

/// Fold the steps into the params of a single `batch` command
fn batch_params(steps: &[ScriptStep]) -> Params {
    let list = steps
        .iter()
        .map(|step| {
            let mut map = BTreeMap::new();
            map.insert("command".to_string(), Value::from(step.command.as_str()));
            map.insert("params".to_string(), Value::Map(step.to_params()));
            Value::Map(map)
        })
        .collect();

    let mut params = Params::new();
    params.insert("steps".to_string(), Value::List(list));
    params
}

pub fn apply(args: ApplyArgs, cwd: &str) -> Result<()> {
    let (_config, mut store, codec) = open_project(cwd)?;

    let script = fs::read_to_string(&args.script)
        .with_context(|| format!("Cannot read script {}", args.script.display()))?;
    let steps = parse_script(&script)?;
    let document = codec
        .load(&store, &args.key)
        .with_context(|| format!("Cannot open document '{}'", args.key))?;

    println!(
        "🔧 {} {} step(s) to {}",
        "Applying".green().bold(),
        steps.len(),
        args.key.bright_white()
    );

    let mut engine = CommandEngine::new(document, CommandRegistry::with_builtins());
    let runs: Vec<(String, Params)> = if args.atomic {
        vec![(builtin::BATCH.to_string(), batch_params(&steps))]
    } else {
        steps
            .iter()
            .map(|s| (s.command.clone(), s.to_params()))
            .collect()
    };

    let mut committed = 0;
    let mut failed = 0;
    for (name, params) in runs {
        debug!(command = %name, "Running scripted command");
        match engine.execute(&name, params) {
            Ok(CommandOutcome::Committed) => {
                committed += 1;
                println!("   {} {}", "✓".green(), name);
            }
            Ok(CommandOutcome::Failed(e)) => {
                failed += 1;
                println!("   {} {}: {}", "✗".red(), name, e);
            }
            Ok(other) => {
                failed += 1;
                println!("   {} {}: {:?}", "✗".red(), name, other);
            }
            Err(e) => {
                failed += 1;
                println!("   {} {}: {}", "✗".red(), name, e);
                if !e.is_recoverable() {
                    break;
                }
            }
        }
    }

    if committed > 0 && !engine.document().is_halted() {
        codec.save(&mut store, engine.document_mut()?)?;
        println!("   Saved {}", args.key.bright_white());
    }

    println!();
    if failed > 0 {
        bail!("{} of {} command(s) failed", failed, committed + failed);
    }
    println!("✨ {} {} command(s) committed", "Done".green().bold(), committed);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{new, NewArgs};
    use std::sync::Arc;
    use trellis_editor::{Codec, DocumentStore, FileStore, NodeId, TypeRegistry};

    const SCRIPT: &str = r#"[
        {"command": "add_node", "params": {"type": "group", "id": "walls", "properties": {"name": "Walls"}}},
        {"command": "add_node", "params": {"type": "shape", "id": "w1", "parent": "walls"}},
        {"command": "set_property", "params": {"id": "w1", "property": "color", "value": "grey"}}
    ]"#;

    fn project() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        new(
            NewArgs {
                key: "plan".to_string(),
                force: false,
            },
            dir.path().to_str().unwrap(),
        )
        .unwrap();
        dir
    }

    fn load(dir: &tempfile::TempDir) -> trellis_editor::Document {
        let store = FileStore::open(dir.path().join("documents")).unwrap();
        assert!(store.exists("plan"));
        Codec::new(Arc::new(TypeRegistry::standard()))
            .load(&store, "plan")
            .unwrap()
    }

    #[test]
    fn test_parse_script() {
        let steps = parse_script(SCRIPT).unwrap();
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[1].command, "add_node");
        assert_eq!(steps[1].to_params()["parent"], Value::from("walls"));
    }

    #[test]
    fn test_apply_script_saves_document() {
        let dir = project();
        let script = dir.path().join("script.json");
        fs::write(&script, SCRIPT).unwrap();

        apply(
            ApplyArgs {
                key: "plan".to_string(),
                script,
                atomic: false,
            },
            dir.path().to_str().unwrap(),
        )
        .unwrap();

        let doc = load(&dir);
        assert_eq!(doc.parent(&"w1".into()).unwrap(), Some(&NodeId::from("walls")));
        assert_eq!(doc.property(&"w1".into(), "color"), Some(&Value::from("grey")));
    }

    #[test]
    fn test_atomic_apply_saves_nothing_on_failure() {
        let dir = project();
        let script = dir.path().join("script.json");
        fs::write(
            &script,
            r#"[
                {"command": "add_node", "params": {"type": "group", "id": "a"}},
                {"command": "remove_node", "params": {"id": "ghost"}}
            ]"#,
        )
        .unwrap();

        let result = apply(
            ApplyArgs {
                key: "plan".to_string(),
                script,
                atomic: true,
            },
            dir.path().to_str().unwrap(),
        );

        assert!(result.is_err());
        assert_eq!(load(&dir).node_count(), 1);
    }
}
