//! Tracing subscriber setup shared by the binaries.
//!
//! Stdout carries reports and catalog JSON, so diagnostics always go to
//! stderr. The filter comes from `CAPHARNESS_LOG`, then `RUST_LOG`, then
//! defaults to `warn`.

use std::env;
use std::io;
use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "CAPHARNESS_LOG";
const DEFAULT_FILTER: &str = "warn";

/// Install the global fmt subscriber. Safe to call more than once; later
/// calls leave the first subscriber in place.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn filter() -> EnvFilter {
    env::var(LOG_ENV)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .and_then(|value| EnvFilter::try_new(value).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}
