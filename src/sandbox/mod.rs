//! Runs capability bodies in a child interpreter and captures their output.
//!
//! Every execution gets a private scratch directory holding the script, the
//! serialized input, and the dependency shims. The child sees its input
//! through environment bindings (`INPUT_DATA`, `INPUT_FILE`, `INPUT_<FIELD>`)
//! and its substitutes through a `PATH` that starts with the shim directory.
//! Nothing in the harness process is patched, so overlapping executions are
//! independent. The scratch directory is removed when the call returns,
//! whatever the outcome.
//!
//! On Unix the child leads its own process group, and the whole group is
//! killed once the body exits or overruns [`SandboxConfig::timeout`], so
//! nothing the body started outlives the call. Bodies are otherwise trusted
//! code: there is no jailing beyond the child process boundary. Runs are
//! unbounded unless a timeout is set.

pub mod dependencies;

pub use dependencies::{DependencyProvider, NoDependencies, Substitute, Substitutes};

use crate::extract::{ParseFault, extract};
use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::env;
use std::ffi::OsString;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Flat name -> value mapping handed to a capability body.
pub type InputFields = Map<String, Value>;

/// Extra environment bindings exported to the child after the input fields.
pub type Bindings = BTreeMap<String, String>;

pub const INPUT_DATA_VAR: &str = "INPUT_DATA";
pub const INPUT_FILE_VAR: &str = "INPUT_FILE";
pub const SCRATCH_VAR: &str = "CAPHARNESS_SCRATCH";
const FIELD_VAR_PREFIX: &str = "INPUT_";

const POLL_INTERVAL: Duration = Duration::from_millis(20);
const DRAIN_GRACE: Duration = Duration::from_secs(1);

/// A capability body failed to run to completion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ExecutionFault {
    pub message: String,
    pub exit_code: Option<i32>,
    /// Human-readable account of the failure; never empty.
    pub trace: String,
}

impl ExecutionFault {
    fn from_status(status: ExitStatus, stderr: &str) -> Self {
        let message = describe_status(status);
        Self {
            trace: trace_with_stderr(&message, stderr),
            exit_code: status.code(),
            message,
        }
    }

    fn timed_out(limit: Duration, stderr: &str) -> Self {
        let message = format!(
            "capability exceeded the {}ms time limit and was killed",
            limit.as_millis()
        );
        Self {
            trace: trace_with_stderr(&message, stderr),
            exit_code: None,
            message,
        }
    }

    fn from_error(err: &anyhow::Error) -> Self {
        Self {
            message: err.to_string(),
            exit_code: None,
            trace: format!("{err:?}"),
        }
    }
}

fn describe_status(status: ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("capability exited with status {code}");
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("capability terminated by signal {signal}");
        }
    }
    "capability terminated abnormally".to_string()
}

fn trace_with_stderr(message: &str, stderr: &str) -> String {
    if stderr.is_empty() {
        format!("{message} (no stderr output)")
    } else {
        format!("{message}\n--- stderr ---\n{stderr}")
    }
}

/// Exactly one of: a parsed payload, an execution fault, or a parse fault.
#[derive(Debug)]
pub enum ExecutionOutcome {
    Completed(Value),
    Faulted(ExecutionFault),
    Malformed(ParseFault),
}

/// Captured streams plus the classified outcome of one execution.
#[derive(Debug)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub outcome: ExecutionOutcome,
}

impl ExecutionResult {
    /// Result of an execution that never ran; parsed output is `{}`.
    pub fn empty() -> Self {
        Self {
            stdout: String::new(),
            stderr: String::new(),
            outcome: ExecutionOutcome::Completed(Value::Object(Map::new())),
        }
    }

    /// Classify captured output from a body that ran to completion.
    pub fn from_output(stdout: &str, stderr: &str) -> Self {
        let stdout = stdout.trim().to_string();
        let outcome = match extract(&stdout) {
            Ok(value) => ExecutionOutcome::Completed(value),
            Err(fault) => ExecutionOutcome::Malformed(fault),
        };
        Self {
            stdout,
            stderr: stderr.trim().to_string(),
            outcome,
        }
    }

    pub fn faulted(stdout: &str, stderr: &str, fault: ExecutionFault) -> Self {
        Self {
            stdout: stdout.trim().to_string(),
            stderr: stderr.trim().to_string(),
            outcome: ExecutionOutcome::Faulted(fault),
        }
    }

    pub fn parsed(&self) -> Option<&Value> {
        match &self.outcome {
            ExecutionOutcome::Completed(value) => Some(value),
            _ => None,
        }
    }

    pub fn fault(&self) -> Option<&ExecutionFault> {
        match &self.outcome {
            ExecutionOutcome::Faulted(fault) => Some(fault),
            _ => None,
        }
    }

    pub fn parse_fault(&self) -> Option<&ParseFault> {
        match &self.outcome {
            ExecutionOutcome::Malformed(fault) => Some(fault),
            _ => None,
        }
    }

    pub fn has_fault(&self) -> bool {
        matches!(self.outcome, ExecutionOutcome::Faulted(_))
    }
}

/// Anything that can run a capability body against an input set.
///
/// Implementations never let a body's failure escape as an `Err`; it is
/// always folded into the returned [`ExecutionResult`].
pub trait Executor {
    fn execute(
        &self,
        source: &str,
        input: &InputFields,
        dependencies: &dyn DependencyProvider,
        bindings: &Bindings,
    ) -> ExecutionResult;
}

/// Program used to run a body, plus the extension its script file gets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Interpreter {
    pub program: OsString,
    pub args: Vec<OsString>,
    pub extension: String,
}

impl Interpreter {
    pub fn new(program: impl Into<OsString>, extension: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            extension: extension.into(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// `sh` on Unix, PowerShell elsewhere.
    pub fn host_default() -> Self {
        if cfg!(windows) {
            Self::new("powershell", "ps1")
                .arg("-NoProfile")
                .arg("-ExecutionPolicy")
                .arg("Bypass")
                .arg("-File")
        } else {
            Self::new("sh", "sh")
        }
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::host_default()
    }
}

#[derive(Clone, Debug, Default)]
pub struct SandboxConfig {
    pub interpreter: Interpreter,
    /// Kill bodies still running after this long. `None` runs to completion.
    pub timeout: Option<Duration>,
    /// Working directory for the child; inherits the harness's when unset.
    pub working_dir: Option<PathBuf>,
}

/// Child-process executor for capability bodies.
#[derive(Clone, Debug, Default)]
pub struct Sandbox {
    config: SandboxConfig,
}

impl Sandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    fn run_child(
        &self,
        source: &str,
        input: &InputFields,
        dependencies: &dyn DependencyProvider,
        bindings: &Bindings,
    ) -> Result<ExecutionResult> {
        let scratch = tempfile::Builder::new()
            .prefix("capharness-exec-")
            .tempdir()
            .context("creating execution scratch directory")?;
        let interpreter = &self.config.interpreter;

        let script_path = scratch
            .path()
            .join(format!("capability.{}", interpreter.extension));
        fs::write(&script_path, source)
            .with_context(|| format!("writing capability body to {}", script_path.display()))?;

        let input_json = serde_json::to_string(input).context("serializing input fields")?;
        let input_path = scratch.path().join("input.json");
        fs::write(&input_path, &input_json)
            .with_context(|| format!("writing input to {}", input_path.display()))?;

        let shim_dir = scratch.path().join("shims");
        let shims = dependencies::install_shims(dependencies, &shim_dir)?;
        debug!(
            scratch = %scratch.path().display(),
            shims,
            "staged capability execution"
        );

        let mut command = Command::new(&interpreter.program);
        command
            .args(&interpreter.args)
            .arg(&script_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env("PATH", path_with_shims(&shim_dir)?);
        for (name, value) in field_bindings(input) {
            command.env(name, value);
        }
        // Fixed bindings go last so no input field can shadow them.
        command
            .env(INPUT_DATA_VAR, &input_json)
            .env(INPUT_FILE_VAR, &input_path)
            .env(SCRATCH_VAR, scratch.path());
        for (key, value) in bindings {
            command.env(key, value);
        }
        if let Some(dir) = &self.config.working_dir {
            command.current_dir(dir);
        }
        own_process_group(&mut command);

        let mut child = command.spawn().with_context(|| {
            format!(
                "spawning interpreter {}",
                interpreter.program.to_string_lossy()
            )
        })?;
        let stdout_rx = drain(child.stdout.take());
        let stderr_rx = drain(child.stderr.take());

        let finished = wait_with_limit(&mut child, self.config.timeout)?;
        // Anything the body left running dies with it; this also releases
        // pipes held open by background children.
        kill_process_group(&mut child);
        let stdout = collect(&stdout_rx, "stdout")?;
        let stderr = collect(&stderr_rx, "stderr")?;

        let result = match finished {
            Some(status) => {
                debug!(code = ?status.code(), "capability finished");
                if status.success() {
                    ExecutionResult::from_output(&stdout, &stderr)
                } else {
                    ExecutionResult::faulted(
                        &stdout,
                        &stderr,
                        ExecutionFault::from_status(status, stderr.trim()),
                    )
                }
            }
            None => {
                let limit = self.config.timeout.unwrap_or_default();
                ExecutionResult::faulted(
                    &stdout,
                    &stderr,
                    ExecutionFault::timed_out(limit, stderr.trim()),
                )
            }
        };
        Ok(result)
    }
}

impl Executor for Sandbox {
    fn execute(
        &self,
        source: &str,
        input: &InputFields,
        dependencies: &dyn DependencyProvider,
        bindings: &Bindings,
    ) -> ExecutionResult {
        match self.run_child(source, input, dependencies, bindings) {
            Ok(result) => result,
            Err(err) => ExecutionResult::faulted("", "", ExecutionFault::from_error(&err)),
        }
    }
}

/// `INPUT_<FIELD>` name for an input key.
pub fn field_variable(key: &str) -> String {
    let mut name = String::with_capacity(FIELD_VAR_PREFIX.len() + key.len());
    name.push_str(FIELD_VAR_PREFIX);
    name.extend(key.chars().map(|c| {
        if c.is_ascii_alphanumeric() {
            c.to_ascii_uppercase()
        } else {
            '_'
        }
    }));
    name
}

/// Environment text for an input value: strings raw, null empty, the rest
/// as compact JSON.
pub fn field_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// `INPUT_<FIELD>` bindings for `input`, one per variable name.
///
/// Fields whose name would shadow a fixed binding are dropped, and when two
/// keys normalize to the same variable the first key in order wins. Both
/// cases are logged.
pub fn field_bindings(input: &InputFields) -> BTreeMap<String, String> {
    let mut bound: BTreeMap<String, (&str, String)> = BTreeMap::new();
    for (key, value) in input {
        let name = field_variable(key);
        if name == INPUT_DATA_VAR || name == INPUT_FILE_VAR {
            warn!(
                field = %key,
                variable = %name,
                "input field shadows a fixed binding; not exported"
            );
            continue;
        }
        if let Some((first, _)) = bound.get(&name) {
            warn!(
                field = %key,
                kept = %first,
                variable = %name,
                "input fields collide on one variable; keeping the first"
            );
            continue;
        }
        bound.insert(name, (key.as_str(), field_value(value)));
    }
    bound
        .into_iter()
        .map(|(name, (_, value))| (name, value))
        .collect()
}

fn path_with_shims(shim_dir: &Path) -> Result<OsString> {
    let mut entries = vec![shim_dir.to_path_buf()];
    if let Some(existing) = env::var_os("PATH") {
        entries.extend(env::split_paths(&existing));
    }
    env::join_paths(entries).context("building PATH with dependency shims")
}

fn drain<R>(stream: Option<R>) -> Receiver<io::Result<String>>
where
    R: Read + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        let read = match stream {
            Some(mut reader) => reader.read_to_end(&mut buf).map(|_| ()),
            None => Ok(()),
        };
        let _ = tx.send(read.map(|()| String::from_utf8_lossy(&buf).into_owned()));
    });
    rx
}

/// Output captured by a `drain` thread. A reader that is still blocked after
/// the grace period (a descendant escaped the process group) yields nothing.
fn collect(rx: &Receiver<io::Result<String>>, stream: &str) -> Result<String> {
    match rx.recv_timeout(DRAIN_GRACE) {
        Ok(read) => read.with_context(|| format!("reading capability {stream}")),
        Err(_) => {
            warn!(stream, "capability output still open after exit; discarding");
            Ok(String::new())
        }
    }
}

/// Wait for `child`, killing its process group once `limit` elapses. `None`
/// means killed.
fn wait_with_limit(child: &mut Child, limit: Option<Duration>) -> Result<Option<ExitStatus>> {
    let Some(limit) = limit else {
        return child
            .wait()
            .map(Some)
            .context("waiting for capability process");
    };

    let deadline = Instant::now() + limit;
    loop {
        if let Some(status) = child
            .try_wait()
            .context("polling capability process")?
        {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            kill_process_group(child);
            let _ = child.kill();
            let _ = child.wait();
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(unix)]
fn own_process_group(command: &mut Command) {
    use std::os::unix::process::CommandExt;
    command.process_group(0);
}

#[cfg(not(unix))]
fn own_process_group(_command: &mut Command) {}

/// SIGKILL every process in the child's group. The group id is the child's
/// pid; an already empty group is not an error.
#[cfg(unix)]
fn kill_process_group(child: &mut Child) {
    let Ok(pgid) = libc::pid_t::try_from(child.id()) else {
        return;
    };
    // SAFETY: kill(2) takes no pointers; a negative pid addresses the group.
    let _ = unsafe { libc::kill(-pgid, libc::SIGKILL) };
}

#[cfg(not(unix))]
fn kill_process_group(child: &mut Child) {
    let _ = child.kill();
}
