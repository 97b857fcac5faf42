use super::open_project;
use anyhow::{bail, Result};
use clap::Args;
use colored::Colorize;
use trellis_common::parse_plain_value;
use trellis_editor::{builtin, CommandEngine, CommandOutcome, CommandRegistry, Params, Value};

#[derive(Debug, Args)]
pub struct SetArgs {
    /// Key of the document to edit
    pub key: String,

    /// Node id
    pub node: String,

    /// Property name
    pub property: String,

    /// New value as JSON (e.g. "\"red\"", 3, true); bare words are taken as text
    pub value: String,
}

/// JSON if it parses, plain text otherwise
fn parse_value(raw: &str) -> Value {
    parse_plain_value(raw).unwrap_or_else(|_| Value::from(raw))
}

pub fn set(args: SetArgs, cwd: &str) -> Result<()> {
    let (_config, mut store, codec) = open_project(cwd)?;
    let document = codec.load(&store, &args.key)?;
    let mut engine = CommandEngine::new(document, CommandRegistry::with_builtins());

    let value = parse_value(&args.value);
    let mut params = Params::new();
    params.insert("id".to_string(), Value::from(args.node.as_str()));
    params.insert("property".to_string(), Value::from(args.property.as_str()));
    params.insert("value".to_string(), value.clone());

    match engine.execute(builtin::SET_PROPERTY, params)? {
        CommandOutcome::Committed => {}
        CommandOutcome::Failed(e) => bail!("{}", e),
        other => bail!("Unexpected outcome {:?}", other),
    }
    codec.save(&mut store, engine.document_mut()?)?;

    println!(
        "{} {}.{} = {}",
        "✓".green(),
        args.node.bright_white(),
        args.property,
        value
    );
    Ok(())
}
