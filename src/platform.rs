//! Platform keys used to select capability variants.
//!
//! Keys are stored lower-cased so `Linux`, `LINUX`, and `linux` all address
//! the same registry slot. `all` is the universal fallback.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Canonical identifier for an OS family, or the universal `all` fallback.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize)]
#[serde(transparent)]
pub struct PlatformKey(String);

impl PlatformKey {
    pub const ALL: &'static str = "all";
    pub const LINUX: &'static str = "linux";
    pub const WINDOWS: &'static str = "windows";
    pub const DARWIN: &'static str = "darwin";

    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_lowercase())
    }

    pub fn all() -> Self {
        Self(Self::ALL.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_universal(&self) -> bool {
        self.0 == Self::ALL
    }
}

impl fmt::Display for PlatformKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PlatformKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for PlatformKey {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl<'de> Deserialize<'de> for PlatformKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::new(raw))
    }
}

/// Platform key for the OS this binary was compiled for.
///
/// Rust reports macOS as `macos`; the registry's canonical key is `darwin`.
pub fn host_platform() -> PlatformKey {
    platform_for_os(std::env::consts::OS)
}

fn platform_for_os(os: &str) -> PlatformKey {
    match os {
        "macos" => PlatformKey::new(PlatformKey::DARWIN),
        other => PlatformKey::new(other),
    }
}
