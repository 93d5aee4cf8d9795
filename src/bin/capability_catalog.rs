//! Prints the capability catalog exported from the built-in registry.
//!
//! Output is a pretty JSON array of catalog documents, one per logical
//! capability, with per-platform bodies under `platform_overrides`. With
//! `--verifiable` only the names eligible for isolated verification are
//! printed, one per line.

use anyhow::{Context, Result};
use capharness::config::resolve_platform;
use capharness::{builtin_registry, logging};
use clap::Parser;
use std::fs;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "capability-catalog",
    version,
    about = "Export the capability catalog as JSON"
)]
struct Cli {
    /// Platform whose variant becomes each document's primary code.
    #[arg(long, value_name = "KEY")]
    platform: Option<String>,

    /// Print verifiable capability names instead of the catalog.
    #[arg(long)]
    verifiable: bool,

    /// Write the catalog here instead of stdout.
    #[arg(long, short = 'o', value_name = "PATH")]
    output: Option<PathBuf>,
}

fn main() {
    logging::init();
    if let Err(err) = run() {
        eprintln!("{err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let platform = resolve_platform(cli.platform);
    let registry = builtin_registry()?;

    let rendered = if cli.verifiable {
        let mut lines = String::new();
        for capability in registry.list_verifiable(Some(&platform)) {
            lines.push_str(capability.name());
            lines.push('\n');
        }
        lines
    } else {
        let documents = registry.export_catalog_for(&platform);
        let mut json =
            serde_json::to_string_pretty(&documents).context("serializing capability catalog")?;
        json.push('\n');
        json
    };

    match cli.output {
        Some(path) => fs::write(&path, rendered)
            .with_context(|| format!("writing catalog to {}", path.display()))?,
        None => print!("{rendered}"),
    }
    Ok(())
}
