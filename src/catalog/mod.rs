//! Capability declarations, the platform-aware registry, and catalog export.
//!
//! `metadata` holds the immutable description of one implementation variant,
//! `registry` resolves variants by name and platform, and `document` collapses
//! variants into the exported catalog form consumed by the diagnostic driver.

pub mod document;
pub mod metadata;
pub mod registry;

pub use document::{Catalog, CatalogDocument, PlatformOverride};
pub use metadata::{CapabilityBody, CapabilityMetadata, RegisteredCapability, VerificationPayload};
pub use registry::{CapabilityRegistry, Registration, RegistryError};
