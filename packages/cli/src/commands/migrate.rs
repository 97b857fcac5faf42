use super::open_project;
use anyhow::{bail, Result};
use clap::Args;
use colored::Colorize;
use tracing::info;
use trellis_editor::{Codec, DocumentStore};

#[derive(Debug, Args)]
pub struct MigrateArgs {
    /// Documents to upgrade (all stored documents when omitted)
    pub keys: Vec<String>,
}

pub fn migrate(args: MigrateArgs, cwd: &str) -> Result<()> {
    let (_config, mut store, codec) = open_project(cwd)?;
    let keys = if args.keys.is_empty() {
        store.keys()?
    } else {
        args.keys
    };

    println!(
        "🔄 {} {} document(s) to schema v{}",
        "Migrating".green().bold(),
        keys.len(),
        codec.current_version()
    );

    let mut failed = 0;
    for key in &keys {
        let outcome = store
            .load(key)
            .and_then(|json| Codec::peek_version(&json))
            .and_then(|version| {
                if version == codec.current_version() {
                    return Ok(None);
                }
                let mut document = codec.load(&store, key)?;
                codec.save(&mut store, &mut document)?;
                Ok(Some(version))
            });

        match outcome {
            Ok(Some(version)) => {
                info!(key = %key, from = version, "Document migrated");
                println!(
                    "   {} {} v{} → v{}",
                    "✓".green(),
                    key,
                    version,
                    codec.current_version()
                );
            }
            Ok(None) => println!("   {} {} already current", "·".dimmed(), key),
            Err(e) => {
                failed += 1;
                println!("   {} {}: {}", "✗".red(), key, e);
            }
        }
    }

    if failed > 0 {
        bail!("{} document(s) could not be migrated", failed);
    }
    Ok(())
}
