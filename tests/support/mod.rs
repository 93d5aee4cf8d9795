#![allow(dead_code)]

use anyhow::{Context, Result, bail};
use capharness::{Catalog, CatalogDocument, Sandbox, SandboxConfig};
use serde_json::{Value, json};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::Duration;

pub fn sandbox() -> Sandbox {
    Sandbox::new(SandboxConfig::default())
}

pub fn sandbox_with_timeout(limit: Duration) -> Sandbox {
    Sandbox::new(SandboxConfig {
        timeout: Some(limit),
        ..SandboxConfig::default()
    })
}

/// Path to one of this package's binaries, built by cargo for the test run.
pub fn helper_binary(name: &str) -> PathBuf {
    let path = match name {
        "capability-diagnose" => env!("CARGO_BIN_EXE_capability-diagnose"),
        "capability-catalog" => env!("CARGO_BIN_EXE_capability-catalog"),
        other => panic!("unknown helper binary {other}"),
    };
    PathBuf::from(path)
}

/// Run `cmd` and return its output regardless of exit status.
pub fn run_command(mut cmd: Command) -> Result<Output> {
    cmd.output()
        .with_context(|| format!("failed to run command: {:?}", cmd))
}

/// Run `cmd` and fail unless it exits successfully.
pub fn run_command_ok(cmd: Command) -> Result<Output> {
    let output = run_command(cmd)?;
    if output.status.success() {
        Ok(output)
    } else {
        bail!(
            "command failed: status {:?}\nstdout: {}\nstderr: {}",
            output.status.code(),
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        )
    }
}

/// Catalog document holding a single shell body.
pub fn shell_document(name: &str, code: &str) -> CatalogDocument {
    serde_json::from_value(json!({ "name": name, "code": code }))
        .expect("fixture document deserializes")
}

pub fn catalog_of(documents: impl IntoIterator<Item = CatalogDocument>) -> Catalog {
    Catalog::from_documents(documents)
}

/// Parse every `*.log.json` artifact under `dir`, sorted by file name.
pub fn read_artifacts(dir: &Path) -> Result<Vec<Value>> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("reading {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.ends_with(".log.json"))
        })
        .collect();
    paths.sort();
    paths
        .iter()
        .map(|path| {
            let bytes = fs::read(path)?;
            serde_json::from_slice(&bytes)
                .with_context(|| format!("parsing artifact {}", path.display()))
        })
        .collect()
}
