mod commands;
mod config;

use clap::{Parser, Subcommand};
use colored::Colorize;
use commands::{
    apply, init, migrate, new, set, show, ApplyArgs, InitArgs, MigrateArgs, NewArgs, SetArgs,
    ShowArgs,
};
use tracing::Level;

/// Trellis CLI - Edit, inspect and migrate stored documents
#[derive(Parser, Debug)]
#[command(name = "trellis")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Initialize a new Trellis project
    Init(InitArgs),

    /// Create an empty document
    New(NewArgs),

    /// Run a script of commands against a document
    Apply(ApplyArgs),

    /// Set one property on one node
    Set(SetArgs),

    /// Print a document's node tree
    Show(ShowArgs),

    /// Upgrade stored documents to the current schema
    Migrate(MigrateArgs),
}

fn log_level(verbose: u8) -> Level {
    match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(log_level(cli.verbose))
        .with_writer(std::io::stderr)
        .init();

    let result = std::env::current_dir()
        .map_err(anyhow::Error::from)
        .and_then(|cwd| {
            let cwd = cwd.display().to_string();
            match cli.command {
                Command::Init(args) => init(args, &cwd),
                Command::New(args) => new(args, &cwd),
                Command::Apply(args) => apply(args, &cwd),
                Command::Set(args) => set(args, &cwd),
                Command::Show(args) => show(args, &cwd),
                Command::Migrate(args) => migrate(args, &cwd),
            }
        });

    if let Err(err) = result {
        eprintln!();
        eprintln!("{} {:#}", "Error:".red().bold(), err);
        eprintln!();
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_apply() {
        let cli = Cli::parse_from(["trellis", "-vv", "apply", "plan", "script.json", "--atomic"]);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Apply(args) => {
                assert_eq!(args.key, "plan");
                assert!(args.atomic);
            }
            other => panic!("Expected apply, got {:?}", other),
        }
    }

    #[test]
    fn test_log_level() {
        assert_eq!(log_level(0), Level::WARN);
        assert_eq!(log_level(5), Level::TRACE);
    }
}
