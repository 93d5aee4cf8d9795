//! Named dependency substitutes for isolated runs.
//!
//! A capability body reaches external tools by name through `PATH`. During
//! verification a [`DependencyProvider`] supplies stand-ins for some of those
//! names; the sandbox materializes each one as an executable in a private shim
//! directory that is prepended to the child's `PATH` only.

use anyhow::{Context, Result, bail};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Stand-in for one named external dependency.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Substitute {
    /// Executable script text written verbatim (include a shebang on Unix).
    Script(String),
    /// Forward every invocation to an existing executable.
    Command(PathBuf),
}

/// Resolves named dependencies to their substitutes for one execution.
pub trait DependencyProvider {
    /// Dependency names this provider substitutes.
    fn names(&self) -> Vec<String>;

    /// The substitute for `name`, if this provider knows it.
    fn resolve(&self, name: &str) -> Option<Substitute>;
}

/// Provider that substitutes nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoDependencies;

impl DependencyProvider for NoDependencies {
    fn names(&self) -> Vec<String> {
        Vec::new()
    }

    fn resolve(&self, _name: &str) -> Option<Substitute> {
        None
    }
}

/// Map-backed provider built by scenario preparation steps.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Substitutes {
    entries: BTreeMap<String, Substitute>,
}

impl Substitutes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(mut self, name: impl Into<String>, script: impl Into<String>) -> Self {
        self.insert(name, Substitute::Script(script.into()));
        self
    }

    pub fn with_command(mut self, name: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        self.insert(name, Substitute::Command(program.into()));
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, substitute: Substitute) {
        self.entries.insert(name.into(), substitute);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl DependencyProvider for Substitutes {
    fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    fn resolve(&self, name: &str) -> Option<Substitute> {
        self.entries.get(name).cloned()
    }
}

/// Write every substitute from `provider` into `shim_dir` as an executable.
///
/// Returns the number of shims written. Names that would escape the shim
/// directory are rejected.
pub(crate) fn install_shims(provider: &dyn DependencyProvider, shim_dir: &Path) -> Result<usize> {
    fs::create_dir_all(shim_dir)
        .with_context(|| format!("creating shim directory {}", shim_dir.display()))?;

    let mut installed = 0;
    for name in provider.names() {
        validate_dependency_name(&name)?;
        let Some(substitute) = provider.resolve(&name) else {
            continue;
        };
        let path = shim_dir.join(shim_file_name(&name));
        let contents = match substitute {
            Substitute::Script(text) => text,
            Substitute::Command(program) => forwarding_script(&program),
        };
        fs::write(&path, contents)
            .with_context(|| format!("writing substitute for '{name}' to {}", path.display()))?;
        make_executable(&path)?;
        installed += 1;
    }
    Ok(installed)
}

fn validate_dependency_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\'])
        || name.contains('\0')
    {
        bail!("invalid dependency name '{name}'");
    }
    Ok(())
}

#[cfg(unix)]
fn shim_file_name(name: &str) -> String {
    name.to_string()
}

#[cfg(not(unix))]
fn shim_file_name(name: &str) -> String {
    format!("{name}.cmd")
}

#[cfg(unix)]
fn forwarding_script(program: &Path) -> String {
    let quoted = program.display().to_string().replace('\'', r"'\''");
    format!("#!/bin/sh\nexec '{quoted}' \"$@\"\n")
}

#[cfg(not(unix))]
fn forwarding_script(program: &Path) -> String {
    format!("@\"{}\" %*\r\n", program.display())
}

fn make_executable(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(path)?.permissions();
        perms.set_mode(0o755);
        fs::set_permissions(path, perms)
            .with_context(|| format!("marking {} executable", path.display()))?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}
