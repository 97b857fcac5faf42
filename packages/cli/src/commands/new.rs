use super::open_project;
use anyhow::{bail, Result};
use clap::Args;
use colored::Colorize;
use std::sync::Arc;
use trellis_editor::{Document, DocumentStore, TypeRegistry};

#[derive(Debug, Args)]
pub struct NewArgs {
    /// Key of the new document
    pub key: String,

    /// Replace an existing document with the same key
    #[arg(short, long)]
    pub force: bool,
}

pub fn new(args: NewArgs, cwd: &str) -> Result<()> {
    let (config, mut store, codec) = open_project(cwd)?;

    if store.exists(&args.key) && !args.force {
        bail!("Document '{}' already exists (use --force to replace it)", args.key);
    }

    let mut document = Document::with_config(
        args.key.as_str(),
        Arc::new(TypeRegistry::standard()),
        config.document.clone(),
    );
    codec.save(&mut store, &mut document)?;

    println!(
        "{} Created {} in {}/",
        "✓".green(),
        args.key.bright_white(),
        config.store_dir
    );
    Ok(())
}
