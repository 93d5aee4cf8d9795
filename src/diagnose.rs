//! Runs diagnostic scenarios for named capabilities and records the results.

use crate::catalog::{Catalog, CatalogDocument};
use crate::platform::{PlatformKey, host_platform};
use crate::sandbox::Executor;
use crate::scenario::{ArtifactStore, DiagnosticRecord, ScenarioSuite};
use anyhow::Result;
use std::borrow::Cow;
use std::fmt::Write as _;
use tracing::{debug, info};

pub const MISSING_CAPABILITY: &str = "Capability definition not found.";
pub const MISSING_SCENARIO: &str = "No diagnostic scenario implemented for this capability.";

pub struct Diagnoser<E> {
    catalog: Catalog,
    suite: ScenarioSuite,
    executor: E,
    store: ArtifactStore,
    platform: PlatformKey,
}

impl<E: Executor> Diagnoser<E> {
    pub fn new(catalog: Catalog, suite: ScenarioSuite, executor: E, store: ArtifactStore) -> Self {
        Self {
            catalog,
            suite,
            executor,
            store,
            platform: host_platform(),
        }
    }

    /// Platform whose override body runs when a catalog document carries one.
    pub fn platform(mut self, platform: PlatformKey) -> Self {
        self.platform = platform;
        self
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Scenario names in sorted order.
    pub fn available_scenarios(&self) -> Vec<String> {
        self.suite.names()
    }

    /// Run each named capability's scenario in order.
    ///
    /// Every outcome, including skips, is persisted before the next name is
    /// processed. Only artifact I/O failures abort the run.
    pub fn run<I, S>(&self, names: I) -> Result<Vec<DiagnosticRecord>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut records = Vec::new();
        for name in names {
            let name = name.as_ref();
            let record = self.run_one(name)?;
            records.push(record);
        }
        Ok(records)
    }

    fn run_one(&self, name: &str) -> Result<DiagnosticRecord> {
        let Some(document) = self.catalog.get(name) else {
            info!(capability = %name, "capability missing from catalog");
            return self.persist(DiagnosticRecord::skipped(name, MISSING_CAPABILITY));
        };
        let Some(case) = self.suite.get(name) else {
            info!(capability = %name, "no scenario registered");
            return self.persist(DiagnosticRecord::skipped(name, MISSING_SCENARIO));
        };
        let document = self.platform_document(document);
        debug!(capability = %name, platform = %self.platform, "running scenario");
        case.run_and_record(&document, &self.executor, &self.store)
    }

    fn platform_document<'a>(&self, document: &'a CatalogDocument) -> Cow<'a, CatalogDocument> {
        let code = document.code_for(&self.platform);
        if code == document.code {
            return Cow::Borrowed(document);
        }
        let mut selected = document.clone();
        selected.code = code.to_string();
        Cow::Owned(selected)
    }

    fn persist(&self, record: DiagnosticRecord) -> Result<DiagnosticRecord> {
        self.store.write(&record)?;
        Ok(record)
    }
}

/// 1 when any record is `error` or `incorrect result`, else 0.
pub fn exit_code(records: &[DiagnosticRecord]) -> i32 {
    if records.iter().any(|record| record.status.is_failure()) {
        1
    } else {
        0
    }
}

/// Human-readable run summary, one line per record.
pub fn summary(records: &[DiagnosticRecord]) -> String {
    let mut out = String::from("Diagnostic summary:");
    for record in records {
        let _ = write!(
            out,
            "\n - {}: {} - {}",
            record.capability, record.status, record.message
        );
    }
    out
}
