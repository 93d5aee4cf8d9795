//! Capabilities and diagnostic scenarios that ship with the harness.

pub mod capabilities;
pub mod scenarios;

pub use capabilities::{builtin_registry, manifest, register_builtin};
pub use scenarios::builtin_suite;
