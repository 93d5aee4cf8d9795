//! In-memory registry of capability variants.
//!
//! Storage is `name -> platform key -> variant`. A single registration lands
//! under every platform key its metadata declares, sharing one `Arc` so the
//! catalog export can tell which slots hold the same implementation.

use crate::catalog::document::CatalogDocument;
use crate::catalog::metadata::RegisteredCapability;
use crate::platform::{PlatformKey, host_platform};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("capability name must not be empty")]
    EmptyName,
}

/// What a call to [`CapabilityRegistry::register`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub name: String,
    pub platforms: Vec<PlatformKey>,
    /// Platform slots that already held a variant and were overwritten.
    pub replaced: Vec<PlatformKey>,
}

impl Registration {
    pub fn overwrote_existing(&self) -> bool {
        !self.replaced.is_empty()
    }
}

type PlatformVariants = BTreeMap<PlatformKey, Arc<RegisteredCapability>>;

#[derive(Default, Debug)]
pub struct CapabilityRegistry {
    entries: BTreeMap<String, PlatformVariants>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a variant under every platform key in its metadata.
    ///
    /// Overwriting an existing `(name, platform)` slot is allowed: the new
    /// variant wins and a warning is logged and reported in the returned
    /// [`Registration`].
    pub fn register(
        &mut self,
        capability: RegisteredCapability,
    ) -> Result<Registration, RegistryError> {
        let name = capability.name().to_string();
        if name.trim().is_empty() {
            return Err(RegistryError::EmptyName);
        }

        let platforms = capability.metadata.platforms.clone();
        let shared = Arc::new(capability);
        let slots = self.entries.entry(name.clone()).or_default();
        let mut replaced = Vec::new();

        for platform in &platforms {
            let key = PlatformKey::new(platform.as_str());
            if slots.insert(key.clone(), Arc::clone(&shared)).is_some() {
                warn!(
                    capability = %name,
                    platform = %key,
                    "overwriting existing capability implementation"
                );
                replaced.push(key);
            } else {
                debug!(capability = %name, platform = %key, "registered capability");
            }
        }

        Ok(Registration {
            name,
            platforms,
            replaced,
        })
    }

    /// Resolve the best variant for `platform` (host platform when `None`).
    ///
    /// Exact platform match first, then the universal `all` variant. A miss is
    /// `None`, never an error.
    pub fn resolve(
        &self,
        name: &str,
        platform: Option<&PlatformKey>,
    ) -> Option<Arc<RegisteredCapability>> {
        let slots = self.entries.get(name)?;
        let target = platform.cloned().unwrap_or_else(host_platform);
        let target = PlatformKey::new(target.as_str());

        if let Some(found) = slots.get(&target) {
            return Some(Arc::clone(found));
        }
        slots.get(&PlatformKey::all()).map(Arc::clone)
    }

    /// Variants that are safe to exercise automatically on `platform`.
    ///
    /// A name qualifies when its resolved variant carries a verification
    /// payload whose `simulated_mode` is not explicitly false. Output follows
    /// name order.
    pub fn list_verifiable(&self, platform: Option<&PlatformKey>) -> Vec<Arc<RegisteredCapability>> {
        let target = platform.cloned().unwrap_or_else(host_platform);
        let mut verifiable = Vec::new();
        for name in self.entries.keys() {
            let Some(variant) = self.resolve(name, Some(&target)) else {
                continue;
            };
            match &variant.metadata.verification {
                Some(payload) if payload.simulated_mode() => verifiable.push(variant),
                Some(_) => {
                    debug!(capability = %name, "skipping capability with simulated_mode=false");
                }
                None => {}
            }
        }
        verifiable
    }

    /// Export every capability as a catalog document, choosing primaries for
    /// the host platform.
    pub fn export_catalog(&self) -> Vec<CatalogDocument> {
        self.export_catalog_for(&host_platform())
    }

    /// Export every capability, choosing each primary variant for `platform`.
    pub fn export_catalog_for(&self, platform: &PlatformKey) -> Vec<CatalogDocument> {
        self.entries
            .values()
            .filter_map(|slots| CatalogDocument::from_variants(slots, platform))
            .collect()
    }

    /// Catalog document for a single capability name.
    pub fn document(&self, name: &str, platform: Option<&PlatformKey>) -> Option<CatalogDocument> {
        let target = platform.cloned().unwrap_or_else(host_platform);
        let slots = self.entries.get(name)?;
        CatalogDocument::from_variants(slots, &target)
    }

    /// Registered capability names in stable order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Every platform slot registered for `name`.
    pub fn variants(&self, name: &str) -> Option<&BTreeMap<PlatformKey, Arc<RegisteredCapability>>> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
