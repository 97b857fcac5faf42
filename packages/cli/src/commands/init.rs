use crate::config::{Config, DEFAULT_CONFIG_NAME};
use anyhow::Result;
use clap::Args;
use colored::Colorize;
use std::fs;
use std::path::PathBuf;
use trellis_editor::DocumentConfig;

#[derive(Debug, Args)]
pub struct InitArgs {
    /// Directory for stored documents
    #[arg(short, long, default_value = "documents")]
    pub store_dir: String,

    /// Maximum undo entries per document (0 = unlimited)
    #[arg(long, default_value_t = 100)]
    pub undo_limit: usize,

    /// Force overwrite existing config
    #[arg(short, long)]
    pub force: bool,
}

pub fn init(args: InitArgs, cwd: &str) -> Result<()> {
    let config_path = PathBuf::from(cwd).join(DEFAULT_CONFIG_NAME);

    // Check if config already exists
    if config_path.exists() && !args.force {
        println!(
            "{} {} already exists",
            "⚠️".yellow(),
            DEFAULT_CONFIG_NAME.bright_white()
        );
        println!("Use --force to overwrite");
        return Ok(());
    }

    println!("{}", "📝 Initializing Trellis project...".bright_blue().bold());

    let config = Config {
        store_dir: args.store_dir.clone(),
        document: DocumentConfig {
            undo_limit: args.undo_limit,
            ..DocumentConfig::default()
        },
    };

    let store_dir = config.get_store_dir(cwd);
    if !store_dir.exists() {
        fs::create_dir_all(&store_dir)?;
        println!("  {} Created {}/", "✓".green(), args.store_dir);
    }

    let config_json = serde_json::to_string_pretty(&config)?;
    fs::write(&config_path, config_json)?;

    println!("  {} Created {}", "✓".green(), DEFAULT_CONFIG_NAME);
    println!();
    println!("{}", "✅ Project initialized!".green().bold());
    println!();
    println!("Next steps:");
    println!("  1. Run: trellis new <key>");
    println!("  2. Run: trellis apply <key> <script.json>");
    println!("  3. Run: trellis show <key>");

    Ok(())
}
