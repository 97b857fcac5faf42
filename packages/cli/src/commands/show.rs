use super::open_project;
use anyhow::Result;
use clap::Args;
use colored::Colorize;
use trellis_editor::{Document, EditorResult, NodeId};

#[derive(Debug, Args)]
pub struct ShowArgs {
    /// Key of the document to print
    pub key: String,

    /// Print the serialized record instead of the tree
    #[arg(long)]
    pub json: bool,
}

pub fn show(args: ShowArgs, cwd: &str) -> Result<()> {
    let (_config, store, codec) = open_project(cwd)?;
    let document = codec.load(&store, &args.key)?;

    if args.json {
        println!("{}", codec.to_json(&document)?);
        return Ok(());
    }

    println!(
        "{} {} ({} nodes, schema v{})",
        "📄".bright_blue(),
        args.key.bright_white().bold(),
        document.node_count(),
        codec.current_version()
    );
    for line in render_tree(&document)? {
        println!("{}", line);
    }
    Ok(())
}

/// One line per node, children indented under their parent
pub fn render_tree(document: &Document) -> EditorResult<Vec<String>> {
    let mut lines = Vec::new();
    render_node(document, document.root(), 0, &mut lines)?;
    Ok(lines)
}

fn render_node(
    document: &Document,
    id: &NodeId,
    depth: usize,
    lines: &mut Vec<String>,
) -> EditorResult<()> {
    let node = document.node(id)?;
    let properties = node
        .properties()
        .iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join(" ");

    let mut line = format!("{}{} ({})", "  ".repeat(depth), id, node.type_tag());
    if !properties.is_empty() {
        line.push(' ');
        line.push_str(&properties);
    }
    lines.push(line);

    for child in node.children() {
        render_node(document, child, depth + 1, lines)?;
    }
    Ok(())
}
