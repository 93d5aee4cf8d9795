//! Runs diagnostic scenarios against capability bodies and prints a summary.
//!
//! Capabilities come from the built-in registry export (or `--catalog`).
//! Every scenario outcome is written as a JSON artifact under the log
//! directory; the process exits non-zero when any scenario ends in `error`
//! or `incorrect result`.

use anyhow::Result;
use capharness::{
    ConfigOverrides, Diagnoser, HarnessConfig, Sandbox, builtin_registry, builtin_suite,
    exit_code, logging, split_list, summary,
};
use clap::Parser;
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "capability-diagnose",
    version,
    about = "Run diagnostic scenarios for registered capabilities"
)]
struct Cli {
    /// List available diagnostic scenarios and exit.
    #[arg(long)]
    list: bool,

    /// Capability to diagnose (repeatable, or comma separated).
    #[arg(short = 'a', long = "action", value_name = "NAME")]
    actions: Vec<String>,

    /// Run every available scenario (the default when no action is given).
    #[arg(long, conflicts_with = "actions")]
    all: bool,

    /// Only run capabilities the registry marks verifiable on this platform.
    #[arg(long)]
    verifiable: bool,

    /// Catalog JSON to load instead of the built-in registry export.
    #[arg(long, value_name = "PATH")]
    catalog: Option<PathBuf>,

    /// Directory for diagnostic artifacts.
    #[arg(long, value_name = "PATH")]
    log_dir: Option<PathBuf>,

    /// Platform key used to pick capability variants.
    #[arg(long, value_name = "KEY")]
    platform: Option<String>,

    /// Kill a capability body that runs longer than this.
    #[arg(long, value_name = "SECS")]
    timeout_secs: Option<u64>,
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let config = HarnessConfig::resolve(ConfigOverrides {
        log_dir: cli.log_dir,
        catalog: cli.catalog,
        platform: cli.platform,
        timeout_secs: cli.timeout_secs,
    })?;

    let registry = builtin_registry()?;
    let catalog = config.load_catalog(&registry)?;
    let diagnoser = Diagnoser::new(
        catalog,
        builtin_suite(),
        Sandbox::new(config.sandbox_config()),
        config.artifact_store(),
    )
    .platform(config.platform.clone());

    if cli.list {
        println!("Available diagnostic scenarios:");
        for name in diagnoser.available_scenarios() {
            println!(" - {name}");
        }
        return Ok(0);
    }

    let mut names: Vec<String> = if cli.actions.is_empty() || cli.all {
        diagnoser.available_scenarios()
    } else {
        cli.actions.iter().flat_map(|raw| split_list(raw)).collect()
    };
    if cli.verifiable {
        let verifiable: BTreeSet<String> = registry
            .list_verifiable(Some(&config.platform))
            .iter()
            .map(|capability| capability.name().to_string())
            .collect();
        names.retain(|name| verifiable.contains(name));
    }

    info!(
        platform = %config.platform,
        log_dir = %config.log_dir.display(),
        count = names.len(),
        "running diagnostics"
    );
    let records = diagnoser.run(&names)?;
    println!("{}", summary(&records));
    Ok(exit_code(&records))
}
