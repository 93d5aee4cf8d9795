//! Diagnostic scenarios bound to one logical capability.
//!
//! A [`ScenarioCase`] is declared once and reused: each run allocates a fresh
//! workspace, prepares inputs and substitutes inside it, executes the
//! capability body, classifies the outcome, and drops the workspace before
//! returning. Classification order is fixed: execution fault, then parse
//! fault, then the validator (or the default non-empty rule).

pub mod artifact;

pub use artifact::{ArtifactStore, DiagnosticRecord, slugify};

use crate::catalog::CatalogDocument;
use crate::sandbox::{Bindings, ExecutionResult, Executor, InputFields, Substitutes};
use anyhow::Result;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use tracing::{info, warn};

/// Free-form data a preparation step hands to its validator.
pub type ScenarioContext = Map<String, Value>;

pub type PrepareFn =
    Box<dyn Fn(&Path, &CatalogDocument) -> Result<PreparedEnvironment> + Send + Sync>;
pub type ValidateFn =
    Box<dyn Fn(&ExecutionResult, &InputFields, &ScenarioContext) -> Verdict + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Status {
    #[serde(rename = "passed")]
    Passed,
    #[serde(rename = "incorrect result")]
    IncorrectResult,
    #[serde(rename = "error")]
    Error,
    #[serde(rename = "skip")]
    Skip,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Passed => "passed",
            Status::IncorrectResult => "incorrect result",
            Status::Error => "error",
            Status::Skip => "skip",
        }
    }

    /// Statuses that make the diagnostic run fail. `skip` never does.
    pub fn is_failure(self) -> bool {
        matches!(self, Status::Error | Status::IncorrectResult)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validator's judgement of well-formed output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    Passed(String),
    Incorrect(String),
    Error(String),
}

impl Verdict {
    pub fn passed(message: impl Into<String>) -> Self {
        Verdict::Passed(message.into())
    }

    pub fn incorrect(message: impl Into<String>) -> Self {
        Verdict::Incorrect(message.into())
    }

    pub fn error(message: impl Into<String>) -> Self {
        Verdict::Error(message.into())
    }

    pub fn into_parts(self) -> (Status, String) {
        match self {
            Verdict::Passed(message) => (Status::Passed, message),
            Verdict::Incorrect(message) => (Status::IncorrectResult, message),
            Verdict::Error(message) => (Status::Error, message),
        }
    }
}

/// Per-run inputs produced by a preparation step.
#[derive(Debug, Default, Clone)]
pub struct PreparedEnvironment {
    pub input_overrides: InputFields,
    pub substitutes: Substitutes,
    pub bindings: Bindings,
    pub context: ScenarioContext,
}

impl PreparedEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn input(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.input_overrides.insert(key.into(), value.into());
        self
    }

    pub fn substitutes(mut self, substitutes: Substitutes) -> Self {
        self.substitutes = substitutes;
        self
    }

    pub fn binding(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.bindings.insert(key.into(), value.into());
        self
    }

    pub fn context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Outcome of one scenario run before it is persisted.
#[derive(Debug)]
pub struct ScenarioReport {
    pub capability: String,
    pub status: Status,
    pub message: String,
    pub input: InputFields,
    pub result: ExecutionResult,
}

impl ScenarioReport {
    pub fn to_record(&self) -> DiagnosticRecord {
        DiagnosticRecord::new(
            self.capability.clone(),
            self.status,
            self.message.clone(),
            self.input.clone(),
            &self.result,
        )
    }
}

pub struct ScenarioCase {
    name: String,
    base_input: InputFields,
    prepare: Option<PrepareFn>,
    validator: Option<ValidateFn>,
    skip_reason: Option<String>,
}

impl fmt::Debug for ScenarioCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScenarioCase")
            .field("name", &self.name)
            .field("base_input", &self.base_input)
            .field("prepare", &self.prepare.is_some())
            .field("validator", &self.validator.is_some())
            .field("skip_reason", &self.skip_reason)
            .finish()
    }
}

impl ScenarioCase {
    /// Scenario for the capability called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_input: InputFields::new(),
            prepare: None,
            validator: None,
            skip_reason: None,
        }
    }

    /// Baseline input fields; a non-object value leaves the baseline empty.
    pub fn base_input(mut self, input: Value) -> Self {
        if let Value::Object(fields) = input {
            self.base_input = fields;
        }
        self
    }

    pub fn prepare<F>(mut self, prepare: F) -> Self
    where
        F: Fn(&Path, &CatalogDocument) -> Result<PreparedEnvironment> + Send + Sync + 'static,
    {
        self.prepare = Some(Box::new(prepare));
        self
    }

    pub fn validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&ExecutionResult, &InputFields, &ScenarioContext) -> Verdict + Send + Sync + 'static,
    {
        self.validator = Some(Box::new(validator));
        self
    }

    pub fn skip(mut self, reason: impl Into<String>) -> Self {
        self.skip_reason = Some(reason.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn skip_reason(&self) -> Option<&str> {
        self.skip_reason.as_deref()
    }

    /// Run the scenario against `document` using `executor`.
    ///
    /// The workspace handed to the preparation step is removed before this
    /// returns, on every path.
    pub fn run(&self, document: &CatalogDocument, executor: &dyn Executor) -> ScenarioReport {
        if let Some(reason) = &self.skip_reason {
            return self.report(
                Status::Skip,
                reason.clone(),
                InputFields::new(),
                ExecutionResult::empty(),
            );
        }

        let workspace = match tempfile::Builder::new()
            .prefix(&format!("capability-diag-{}-", slugify(&self.name)))
            .tempdir()
        {
            Ok(dir) => dir,
            Err(err) => {
                return self.report(
                    Status::Error,
                    format!("Unable to allocate scenario workspace: {err}"),
                    self.base_input.clone(),
                    ExecutionResult::empty(),
                );
            }
        };

        let prepared = match &self.prepare {
            Some(prepare) => match prepare(workspace.path(), document) {
                Ok(prepared) => prepared,
                Err(err) => {
                    return self.report(
                        Status::Error,
                        format!("Scenario preparation failed: {err:#}"),
                        self.base_input.clone(),
                        ExecutionResult::empty(),
                    );
                }
            },
            None => PreparedEnvironment::default(),
        };

        let mut input = self.base_input.clone();
        input.extend(prepared.input_overrides);

        let result = executor.execute(
            &document.code,
            &input,
            &prepared.substitutes,
            &prepared.bindings,
        );
        let (status, message) = self.classify(&result, &input, &prepared.context);

        let workspace_path = workspace.path().to_path_buf();
        if let Err(err) = workspace.close() {
            warn!(
                workspace = %workspace_path.display(),
                "failed to remove scenario workspace: {err}"
            );
        }

        self.report(status, message, input, result)
    }

    /// Run the scenario and persist its record through `store`.
    pub fn run_and_record(
        &self,
        document: &CatalogDocument,
        executor: &dyn Executor,
        store: &ArtifactStore,
    ) -> Result<DiagnosticRecord> {
        let report = self.run(document, executor);
        let record = report.to_record();
        store.write(&record)?;
        Ok(record)
    }

    fn classify(
        &self,
        result: &ExecutionResult,
        input: &InputFields,
        context: &ScenarioContext,
    ) -> (Status, String) {
        if let Some(fault) = result.fault() {
            return (
                Status::Error,
                format!("Execution raised a fault.\n{}", fault.trace.trim()),
            );
        }
        if let Some(fault) = result.parse_fault() {
            return (
                Status::Error,
                format!("Failed to parse JSON output: {fault}"),
            );
        }
        match &self.validator {
            Some(validator) => validator(result, input, context).into_parts(),
            None => default_verdict(result).into_parts(),
        }
    }

    fn report(
        &self,
        status: Status,
        message: String,
        input: InputFields,
        result: ExecutionResult,
    ) -> ScenarioReport {
        info!(scenario = %self.name, status = %status, "scenario finished");
        ScenarioReport {
            capability: self.name.clone(),
            status,
            message,
            input,
            result,
        }
    }
}

/// Non-empty object or list passes; anything else is an incorrect result.
pub fn default_verdict(result: &ExecutionResult) -> Verdict {
    match result.parsed() {
        Some(Value::Object(map)) if !map.is_empty() => {
            Verdict::passed("Capability produced a non-empty JSON object.")
        }
        Some(Value::Array(items)) if !items.is_empty() => {
            Verdict::passed("Capability produced a non-empty list.")
        }
        _ => Verdict::incorrect("Capability output was empty."),
    }
}

/// Named scenarios, one per capability.
#[derive(Default, Debug)]
pub struct ScenarioSuite {
    cases: BTreeMap<String, ScenarioCase>,
}

impl ScenarioSuite {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `case`, replacing (and logging) any scenario with the same name.
    pub fn register(&mut self, case: ScenarioCase) {
        let name = case.name().to_string();
        if self.cases.insert(name.clone(), case).is_some() {
            warn!(scenario = %name, "replacing existing diagnostic scenario");
        }
    }

    pub fn with(mut self, case: ScenarioCase) -> Self {
        self.register(case);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ScenarioCase> {
        self.cases.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.cases.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }
}
