use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use diagir::{Diagram, FormatKind, Pipeline};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing::Level;

/// Convert diagrams between Mermaid, TikZ, Graphviz DOT and the diagir IR
#[derive(Parser)]
#[command(name = "diagir", version)]
struct Cli {
    /// Log parser and pipeline decisions to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Parse diagram source and print the IR as JSON
    ToIr {
        /// Source format (mermaid, tikz, dot); detected when omitted
        #[arg(short, long, value_parser = parse_format)]
        format: Option<FormatKind>,
        /// Input file; reads stdin when omitted
        input: Option<PathBuf>,
    },
    /// Read IR JSON and print source in the requested format
    FromIr {
        /// Target format (mermaid, tikz, dot)
        #[arg(short, long, value_parser = parse_format)]
        format: FormatKind,
        /// Input file; reads stdin when omitted
        input: Option<PathBuf>,
    },
}

fn parse_format(value: &str) -> std::result::Result<FormatKind, String> {
    FormatKind::from_str(value).ok_or_else(|| format!("unknown format '{}'", value))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::WARN })
        .init();

    let output = match cli.command {
        Command::ToIr { format, input } => {
            let text = read_input(input.as_deref())?;
            let conversion = Pipeline::default()
                .convert(&text, format, input.as_deref())
                .context("conversion failed")?;
            conversion.diagram.to_json()?
        }
        Command::FromIr { format, input } => {
            let text = read_input(input.as_deref())?;
            let diagram = Diagram::from_json(&text).context("invalid IR document")?;
            Pipeline::default().generate(&diagram, format)
        }
    };

    let mut stdout = io::stdout().lock();
    stdout.write_all(output.as_bytes())?;
    if !output.ends_with('\n') {
        stdout.write_all(b"\n")?;
    }
    Ok(())
}

fn read_input(path: Option<&Path>) -> Result<String> {
    let text = match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read from stdin")?;
            buf
        }
    };
    if text.trim().is_empty() {
        bail!("no input provided");
    }
    Ok(text)
}
