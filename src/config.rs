//! Driver configuration resolved from flags, environment, and defaults.
//!
//! Each setting follows the same precedence: an explicit CLI value, then the
//! matching `CAPHARNESS_*` environment variable, then the built-in default.
//! Empty environment values count as unset.

use crate::catalog::{Catalog, CapabilityRegistry};
use crate::platform::{PlatformKey, host_platform};
use crate::sandbox::SandboxConfig;
use crate::scenario::ArtifactStore;
use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const LOG_DIR_ENV: &str = "CAPHARNESS_LOG_DIR";
pub const CATALOG_ENV: &str = "CAPHARNESS_CATALOG";
pub const PLATFORM_ENV: &str = "CAPHARNESS_PLATFORM";
pub const TIMEOUT_ENV: &str = "CAPHARNESS_TIMEOUT_SECS";
pub const DEFAULT_LOG_DIR: &str = "diagnostic/logs/capabilities";

/// Values supplied on the command line; `None` defers to the environment.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub log_dir: Option<PathBuf>,
    pub catalog: Option<PathBuf>,
    pub platform: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HarnessConfig {
    pub log_dir: PathBuf,
    /// Catalog file to load; `None` exports the built-in registry instead.
    pub catalog: Option<PathBuf>,
    pub platform: PlatformKey,
    pub timeout: Option<Duration>,
}

impl HarnessConfig {
    /// Resolve against the process environment.
    pub fn resolve(overrides: ConfigOverrides) -> Result<Self> {
        Self::resolve_with(overrides, |key| env::var(key).ok())
    }

    /// Resolve with an explicit environment lookup.
    pub fn resolve_with<F>(overrides: ConfigOverrides, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env_value = |key: &str| non_empty(lookup(key));

        let log_dir = overrides
            .log_dir
            .or_else(|| env_value(LOG_DIR_ENV).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_DIR));
        let catalog = overrides
            .catalog
            .or_else(|| env_value(CATALOG_ENV).map(PathBuf::from));
        let platform = resolve_platform_with(overrides.platform, &lookup);
        let timeout_secs = match overrides.timeout_secs {
            Some(secs) => Some(secs),
            None => env_value(TIMEOUT_ENV)
                .map(|raw| {
                    raw.parse::<u64>().with_context(|| {
                        format!("{TIMEOUT_ENV} must be a whole number of seconds, got '{raw}'")
                    })
                })
                .transpose()?,
        };

        Ok(Self {
            log_dir,
            catalog,
            platform,
            timeout: timeout_secs.map(Duration::from_secs),
        })
    }

    pub fn sandbox_config(&self) -> SandboxConfig {
        SandboxConfig {
            timeout: self.timeout,
            ..SandboxConfig::default()
        }
    }

    pub fn artifact_store(&self) -> ArtifactStore {
        ArtifactStore::new(&self.log_dir)
    }

    /// The catalog file when one is configured, otherwise `registry`'s export
    /// for the configured platform.
    pub fn load_catalog(&self, registry: &CapabilityRegistry) -> Result<Catalog> {
        match &self.catalog {
            Some(path) => Catalog::load(path),
            None => Ok(Catalog::from_registry(registry, &self.platform)),
        }
    }
}

/// Platform from `flag`, then `CAPHARNESS_PLATFORM`, then the host. Needs
/// none of the other settings to be valid.
pub fn resolve_platform(flag: Option<String>) -> PlatformKey {
    resolve_platform_with(flag, |key| env::var(key).ok())
}

pub fn resolve_platform_with<F>(flag: Option<String>, lookup: F) -> PlatformKey
where
    F: Fn(&str) -> Option<String>,
{
    non_empty(flag)
        .or_else(|| non_empty(lookup(PLATFORM_ENV)))
        .map(PlatformKey::new)
        .unwrap_or_else(host_platform)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
