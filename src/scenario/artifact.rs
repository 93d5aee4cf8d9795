//! Timestamped JSON artifacts, one per scenario outcome.

use crate::sandbox::{ExecutionResult, InputFields};
use crate::scenario::Status;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

const ARTIFACT_SUFFIX: &str = ".log.json";

/// Filesystem-friendly slug: runs of characters outside `[A-Za-z0-9._-]`
/// collapse to `-`, edges are trimmed, and the result is lower-cased.
pub fn slugify(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    let mut pending_dash = false;
    for ch in value.chars() {
        if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_') {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    if slug.is_empty() {
        "capability".to_string()
    } else {
        slug
    }
}

/// Everything known about one scenario run, as persisted on disk.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticRecord {
    pub capability: String,
    pub status: Status,
    pub message: String,
    pub input: InputFields,
    pub raw_output: String,
    pub stderr: String,
    pub parsed_output: Option<Value>,
    pub exception: Option<String>,
    pub traceback: Option<String>,
    pub parse_error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl DiagnosticRecord {
    pub fn new(
        capability: impl Into<String>,
        status: Status,
        message: impl Into<String>,
        input: InputFields,
        result: &ExecutionResult,
    ) -> Self {
        let fault = result.fault();
        Self {
            capability: capability.into(),
            status,
            message: message.into(),
            input,
            raw_output: result.stdout.clone(),
            stderr: result.stderr.clone(),
            parsed_output: result.parsed().cloned(),
            exception: fault.map(|f| f.message.clone()),
            traceback: fault.map(|f| f.trace.clone()),
            parse_error: result.parse_fault().map(|f| f.to_string()),
            timestamp: Utc::now(),
        }
    }

    /// A record for a capability that was never executed.
    pub fn skipped(capability: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            capability,
            Status::Skip,
            message,
            InputFields::new(),
            &ExecutionResult::empty(),
        )
    }
}

/// Writes diagnostic records under a log directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist `record` as pretty JSON and return the file path.
    ///
    /// Names follow `<UTC timestamp>_<slug>.log.json`; a numeric suffix is
    /// added rather than overwrite an existing artifact.
    pub fn write(&self, record: &DiagnosticRecord) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating artifact directory {}", self.dir.display()))?;
        let body = serde_json::to_vec_pretty(record).context("serializing diagnostic record")?;
        let stem = format!(
            "{}_{}",
            record.timestamp.format("%Y%m%dT%H%M%S%6f"),
            slugify(&record.capability)
        );

        let mut attempt = 0u32;
        loop {
            let name = if attempt == 0 {
                format!("{stem}{ARTIFACT_SUFFIX}")
            } else {
                format!("{stem}-{attempt}{ARTIFACT_SUFFIX}")
            };
            let path = self.dir.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(&body)
                        .with_context(|| format!("writing artifact {}", path.display()))?;
                    return Ok(path);
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => attempt += 1,
                Err(err) => {
                    return Err(err)
                        .with_context(|| format!("creating artifact {}", path.display()));
                }
            }
        }
    }
}
