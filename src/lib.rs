//! Shared library for the capability harness.
//!
//! Capabilities are declared once per platform variant in a
//! [`CapabilityRegistry`], exported as [`CatalogDocument`]s, and verified by
//! running their bodies through a [`Sandbox`] under a [`ScenarioCase`]. The
//! binaries (`capability-catalog`, `capability-diagnose`) are thin wrappers
//! over the functions re-exported here.

pub mod builtin;
pub mod catalog;
pub mod config;
pub mod diagnose;
pub mod extract;
pub mod logging;
pub mod platform;
pub mod sandbox;
pub mod scenario;

pub use builtin::{builtin_registry, builtin_suite};
pub use catalog::{
    CapabilityBody, CapabilityMetadata, CapabilityRegistry, Catalog, CatalogDocument,
    PlatformOverride, Registration, RegisteredCapability, RegistryError, VerificationPayload,
};
pub use config::{ConfigOverrides, HarnessConfig};
pub use diagnose::{Diagnoser, exit_code, summary};
pub use extract::{ParseFault, extract, strip_ansi};
pub use platform::{PlatformKey, host_platform};
pub use sandbox::{
    Bindings, DependencyProvider, ExecutionFault, ExecutionOutcome, ExecutionResult, Executor,
    InputFields, Interpreter, NoDependencies, Sandbox, SandboxConfig, Substitute, Substitutes,
};
pub use scenario::{
    ArtifactStore, DiagnosticRecord, PreparedEnvironment, ScenarioCase, ScenarioContext,
    ScenarioSuite, Status, Verdict,
};

/// Split a comma separated list, dropping empty entries.
///
/// Capability names contain spaces, so only commas separate entries here;
/// surrounding whitespace is trimmed.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
