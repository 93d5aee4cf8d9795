#![cfg(unix)]

// Integration suite for the capability harness: runs real `sh` bodies through
// the sandbox, the scenario engine, and the two binaries.
mod support;

use anyhow::Result;
use capharness::sandbox::SCRATCH_VAR;
use capharness::scenario::ArtifactStore;
use capharness::{
    Bindings, Diagnoser, ExecutionOutcome, Executor, InputFields, NoDependencies, PlatformKey,
    PreparedEnvironment, ScenarioCase, ScenarioSuite, Status, Substitutes, Verdict,
    builtin_registry, builtin_suite, exit_code, host_platform,
};
use capharness::{Catalog, split_list};
use serde_json::{Value, json};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use support::{
    catalog_of, helper_binary, read_artifacts, run_command, run_command_ok, sandbox,
    sandbox_with_timeout, shell_document,
};
use tempfile::TempDir;

fn fields(value: Value) -> InputFields {
    value.as_object().cloned().unwrap_or_default()
}

fn add_number_scenario() -> ScenarioCase {
    ScenarioCase::new("add number")
        .base_input(json!({"a": 0, "b": 0}))
        .prepare(|_, _| Ok(PreparedEnvironment::new().input("a", 7).input("b", 5)))
        .validator(|result, input, _| {
            let expected = input["a"].as_i64().unwrap_or(0) + input["b"].as_i64().unwrap_or(0);
            match result.parsed().and_then(|v| v.get("result")).and_then(Value::as_i64) {
                Some(actual) if actual == expected => Verdict::passed("sum matches"),
                other => Verdict::incorrect(format!("expected {expected}, got {other:?}")),
            }
        })
}

#[test]
fn builtin_add_number_passes_with_merged_input() -> Result<()> {
    let registry = builtin_registry()?;
    let document = registry
        .document("add number", Some(&host_platform()))
        .expect("add number is bundled");
    let report = add_number_scenario().run(&document, &sandbox());
    assert_eq!(report.status, Status::Passed, "{}", report.message);
    assert_eq!(report.input, fields(json!({"a": 7, "b": 5})));
    assert_eq!(report.result.parsed(), Some(&json!({"result": 12})));
    Ok(())
}

#[test]
fn failing_body_is_error_with_stderr_in_trace() -> Result<()> {
    let document = shell_document("crash", "echo 'ValueError: boom' >&2\nexit 3\n");
    let case = ScenarioCase::new("crash").validator(|_, _, _| Verdict::passed("unreachable"));
    let report = case.run(&document, &sandbox());
    assert_eq!(report.status, Status::Error);
    assert!(report.message.contains("ValueError: boom"), "{}", report.message);

    let fault = report.result.fault().expect("fault recorded");
    assert_eq!(fault.exit_code, Some(3));
    assert!(!fault.trace.is_empty());
    assert!(report.result.parse_fault().is_none());
    Ok(())
}

#[test]
fn chatter_without_payload_is_parse_error() -> Result<()> {
    let document = shell_document("chatty", "echo ok\n");
    let case = ScenarioCase::new("chatty").validator(|_, _, _| Verdict::incorrect("unused"));
    let report = case.run(&document, &sandbox());
    assert_eq!(report.status, Status::Error);
    assert!(report.message.starts_with("Failed to parse JSON output"));
    assert!(matches!(report.result.outcome, ExecutionOutcome::Malformed(_)));
    assert_eq!(report.result.stdout, "ok");
    Ok(())
}

#[test]
fn empty_object_fails_default_rule_and_sets_exit_code() -> Result<()> {
    let temp = TempDir::new()?;
    let catalog = catalog_of([shell_document("hollow", "printf '{}'\n")]);
    let suite = ScenarioSuite::new().with(ScenarioCase::new("hollow"));
    let diagnoser = Diagnoser::new(catalog, suite, sandbox(), ArtifactStore::new(temp.path()));

    let records = diagnoser.run(["hollow"])?;
    assert_eq!(records[0].status, Status::IncorrectResult);
    assert_eq!(records[0].message, "Capability output was empty.");
    assert_eq!(exit_code(&records), 1);
    Ok(())
}

#[test]
fn ansi_colored_output_is_extracted() -> Result<()> {
    let body = "printf 'loading\\n\\033[32m{\"status\": \"success\"}\\033[0m\\n'\n";
    let result = sandbox().execute(body, &InputFields::new(), &NoDependencies, &Bindings::new());
    assert_eq!(result.parsed(), Some(&json!({"status": "success"})));
    Ok(())
}

#[test]
fn input_fields_and_bindings_reach_the_body() -> Result<()> {
    let body = r#"printf '{"name": "%s", "nested": %s, "region": "%s", "data": %s, "scratch_set": %s}\n' \
    "$INPUT_FOLDER_NAME" "$INPUT_OPTIONS" "$REGION" "$INPUT_DATA" \
    "$([ -d "$CAPHARNESS_SCRATCH" ] && echo true || echo false)"
"#;
    let input = fields(json!({"folder_name": "reports", "options": {"deep": true}}));
    let mut bindings = Bindings::new();
    bindings.insert("REGION".into(), "eu-west".into());

    let result = sandbox().execute(body, &input, &NoDependencies, &bindings);
    let output = result.parsed().expect("payload parsed");
    assert_eq!(output["name"], "reports");
    assert_eq!(output["nested"], json!({"deep": true}));
    assert_eq!(output["region"], "eu-west");
    assert_eq!(output["data"], Value::Object(input.clone()));
    assert_eq!(output["scratch_set"], true);
    assert!(env::var_os(SCRATCH_VAR).is_none());
    Ok(())
}

#[test]
fn substitutes_apply_to_one_execution_only() -> Result<()> {
    let body = "printf '{\"stamp\": \"%s\"}' \"$(date +%Y)\"\n";
    let stubbed = Substitutes::new().with_script("date", "#!/bin/sh\necho 1999\n");
    let path_before = env::var_os("PATH");

    let first = sandbox().execute(body, &InputFields::new(), &stubbed, &Bindings::new());
    assert_eq!(first.parsed(), Some(&json!({"stamp": "1999"})));
    assert_eq!(env::var_os("PATH"), path_before);

    let second = sandbox().execute(body, &InputFields::new(), &NoDependencies, &Bindings::new());
    let stamp = second.parsed().and_then(|v| v["stamp"].as_str().map(str::to_string));
    assert_ne!(stamp.as_deref(), Some("1999"));
    Ok(())
}

#[test]
fn substitutes_are_dropped_even_when_the_body_fails() -> Result<()> {
    let body = "date\nexit 1\n";
    let stubbed = Substitutes::new().with_script("date", "#!/bin/sh\necho stubbed\n");
    let failed = sandbox().execute(body, &InputFields::new(), &stubbed, &Bindings::new());
    assert!(failed.has_fault());

    let probe = "printf '{\"date\": \"%s\"}' \"$(command -v date)\"\n";
    let after = sandbox().execute(probe, &InputFields::new(), &NoDependencies, &Bindings::new());
    let resolved = after.parsed().and_then(|v| v["date"].as_str().map(str::to_string));
    assert!(
        resolved.as_deref().is_some_and(|p| !p.contains("capharness-exec-")),
        "{resolved:?}"
    );
    Ok(())
}

#[test]
fn command_substitute_forwards_arguments() -> Result<()> {
    let temp = TempDir::new()?;
    let target = temp.path().join("echo-args");
    fs::write(&target, "#!/bin/sh\nprintf '{\"args\": \"%s\"}' \"$*\"\n")?;
    let mut perms = fs::metadata(&target)?.permissions();
    std::os::unix::fs::PermissionsExt::set_mode(&mut perms, 0o755);
    fs::set_permissions(&target, perms)?;

    let subs = Substitutes::new().with_command("fetcher", &target);
    let result = sandbox().execute(
        "fetcher one two\n",
        &InputFields::new(),
        &subs,
        &Bindings::new(),
    );
    assert_eq!(result.parsed(), Some(&json!({"args": "one two"})));
    Ok(())
}

#[test]
fn runaway_body_is_killed_at_the_timeout() -> Result<()> {
    let temp = TempDir::new()?;
    let marker = temp.path().join("marker");
    let mut bindings = Bindings::new();
    bindings.insert("MARKER".into(), marker.display().to_string());

    let started = Instant::now();
    let result = sandbox_with_timeout(Duration::from_millis(300)).execute(
        "( sleep 1; touch \"$MARKER\" ) &\nsleep 10\n",
        &InputFields::new(),
        &NoDependencies,
        &bindings,
    );
    assert!(started.elapsed() < Duration::from_secs(5));
    let fault = result.fault().expect("timeout is a fault");
    assert!(fault.message.contains("time limit"), "{}", fault.message);
    assert_eq!(fault.exit_code, None);

    // The background subshell belonged to the killed body.
    std::thread::sleep(Duration::from_millis(1500));
    assert!(!marker.exists(), "grandchild outlived the timeout kill");
    Ok(())
}

#[test]
fn background_children_do_not_hold_the_run_open() -> Result<()> {
    let temp = TempDir::new()?;
    let marker = temp.path().join("marker");
    let mut bindings = Bindings::new();
    bindings.insert("MARKER".into(), marker.display().to_string());

    let started = Instant::now();
    let result = sandbox().execute(
        "( sleep 1; touch \"$MARKER\" ) &\nprintf '{\"a\": 1}'\n",
        &InputFields::new(),
        &NoDependencies,
        &bindings,
    );
    assert!(started.elapsed() < Duration::from_millis(900), "{:?}", started.elapsed());
    assert_eq!(result.parsed(), Some(&json!({"a": 1})));

    std::thread::sleep(Duration::from_millis(1500));
    assert!(!marker.exists(), "background child outlived the body");
    Ok(())
}

#[test]
fn input_field_named_data_keeps_serialized_input() -> Result<()> {
    let input = fields(json!({"data": "hello", "url": "x"}));
    let result = sandbox().execute(
        "printf '%s' \"$INPUT_DATA\"\n",
        &input,
        &NoDependencies,
        &Bindings::new(),
    );
    assert_eq!(result.parsed(), Some(&Value::Object(input)));
    Ok(())
}

#[test]
fn list_folder_escapes_control_characters_in_names() -> Result<()> {
    let temp = TempDir::new()?;
    let names = ["line\nbreak.txt", "tab\there", "quote\"d", "back\\slash"];
    for name in names {
        fs::write(temp.path().join(name), "x")?;
    }
    let registry = builtin_registry()?;
    let document = registry
        .document("list folder", Some(&PlatformKey::new(PlatformKey::LINUX)))
        .expect("list folder is bundled");
    let input = fields(json!({"path": temp.path().display().to_string()}));
    let result = sandbox().execute(&document.code, &input, &NoDependencies, &Bindings::new());

    let output = result.parsed().expect("listing is valid JSON");
    assert_eq!(output["status"], "success");
    let mut listed: Vec<&str> = output["contents"]
        .as_array()
        .expect("contents array")
        .iter()
        .filter_map(Value::as_str)
        .collect();
    listed.sort_unstable();
    let mut expected = names.to_vec();
    expected.sort_unstable();
    assert_eq!(listed, expected);
    Ok(())
}

#[test]
fn workspace_is_gone_after_preparation_failure() -> Result<()> {
    let seen: Arc<Mutex<Option<PathBuf>>> = Arc::new(Mutex::new(None));
    let capture = Arc::clone(&seen);
    let case = ScenarioCase::new("broken").prepare(move |dir, _| {
        fs::write(dir.join("partial.txt"), "x")?;
        *capture.lock().unwrap() = Some(dir.to_path_buf());
        anyhow::bail!("fixture server unavailable")
    });

    let temp = TempDir::new()?;
    let catalog = catalog_of([shell_document("broken", "printf '{\"ran\": true}'\n")]);
    let diagnoser = Diagnoser::new(
        catalog,
        ScenarioSuite::new().with(case),
        sandbox(),
        ArtifactStore::new(temp.path()),
    );
    let records = diagnoser.run(["broken"])?;
    assert_eq!(records[0].status, Status::Error);
    assert!(records[0].message.starts_with("Scenario preparation failed: "));
    assert!(records[0].raw_output.is_empty());

    let workspace = seen.lock().unwrap().clone().expect("prepare ran");
    assert!(!workspace.exists());
    assert_eq!(read_artifacts(temp.path())?.len(), 1);
    Ok(())
}

#[test]
fn builtin_suite_passes_on_this_host() -> Result<()> {
    let temp = TempDir::new()?;
    let platform = host_platform();
    let registry = builtin_registry()?;
    let catalog = Catalog::from_registry(&registry, &platform);
    let diagnoser = Diagnoser::new(
        catalog,
        builtin_suite(),
        sandbox(),
        ArtifactStore::new(temp.path()),
    )
    .platform(platform);

    let names = diagnoser.available_scenarios();
    let records = diagnoser.run(&names)?;
    for record in &records {
        let expected = match record.capability.as_str() {
            "ignore" | "mouse move" => Status::Skip,
            _ => Status::Passed,
        };
        assert_eq!(
            record.status, expected,
            "{}: {}",
            record.capability, record.message
        );
    }
    assert_eq!(exit_code(&records), 0);

    let artifacts = read_artifacts(temp.path())?;
    assert_eq!(artifacts.len(), names.len());
    for artifact in &artifacts {
        for key in [
            "capability",
            "status",
            "message",
            "input",
            "raw_output",
            "stderr",
            "parsed_output",
            "exception",
            "traceback",
            "parse_error",
            "timestamp",
        ] {
            assert!(artifact.get(key).is_some(), "artifact missing {key}");
        }
    }
    Ok(())
}

#[test]
fn windows_export_carries_powershell_override() -> Result<()> {
    let registry = builtin_registry()?;
    let linux = registry
        .document("list folder", Some(&PlatformKey::new(PlatformKey::LINUX)))
        .expect("list folder is bundled");
    let overrides = linux.platform_overrides.as_ref().expect("windows override");
    let windows_code = &overrides[&PlatformKey::new(PlatformKey::WINDOWS)].code;
    assert!(windows_code.contains("Get-ChildItem"));
    assert_ne!(&linux.code, windows_code);
    Ok(())
}

#[test]
fn catalog_binary_exports_registry() -> Result<()> {
    let mut cmd = Command::new(helper_binary("capability-catalog"));
    cmd.arg("--platform").arg("linux");
    let output = run_command_ok(cmd)?;
    let documents: Vec<Value> = serde_json::from_slice(&output.stdout)?;
    let names: Vec<&str> = documents
        .iter()
        .filter_map(|doc| doc["name"].as_str())
        .collect();
    assert!(names.contains(&"add number"));
    assert!(names.contains(&"mouse move"));

    let mut cmd = Command::new(helper_binary("capability-catalog"));
    cmd.args(["--platform", "windows", "--verifiable"]);
    let output = run_command_ok(cmd)?;
    let verifiable = String::from_utf8(output.stdout)?;
    assert_eq!(
        verifiable.lines().collect::<Vec<_>>(),
        vec!["add number", "get current time", "list folder"]
    );
    Ok(())
}

#[test]
fn catalog_binary_ignores_unrelated_settings() -> Result<()> {
    let mut cmd = Command::new(helper_binary("capability-catalog"));
    cmd.args(["--platform", "linux", "--verifiable"])
        .env("CAPHARNESS_TIMEOUT_SECS", "soon");
    let output = run_command_ok(cmd)?;
    assert!(String::from_utf8(output.stdout)?.contains("add number"));
    Ok(())
}

#[test]
fn diagnose_binary_reports_and_records() -> Result<()> {
    let temp = TempDir::new()?;
    let log_dir = temp.path().join("logs");

    let mut cmd = Command::new(helper_binary("capability-diagnose"));
    cmd.arg("--log-dir")
        .arg(&log_dir)
        .args(["-a", "add number, teleport"])
        .env_remove("CAPHARNESS_CATALOG");
    let output = run_command(cmd)?;
    let stdout = String::from_utf8(output.stdout)?;
    assert_eq!(output.status.code(), Some(0), "{stdout}");
    assert!(stdout.starts_with("Diagnostic summary:\n"));
    assert!(stdout.contains(" - add number: passed - "));
    assert!(stdout.contains(" - teleport: skip - Capability definition not found."));
    assert_eq!(read_artifacts(&log_dir)?.len(), 2);
    Ok(())
}

#[test]
fn diagnose_binary_fails_on_incorrect_result() -> Result<()> {
    let temp = TempDir::new()?;
    let catalog_path = temp.path().join("catalog.json");
    // A catalog whose `add number` body miscomputes the sum.
    fs::write(
        &catalog_path,
        serde_json::to_vec(&json!([
            {"name": "add number", "code": "printf '{\"result\": 0}'\n"}
        ]))?,
    )?;

    let mut cmd = Command::new(helper_binary("capability-diagnose"));
    cmd.arg("--catalog")
        .arg(&catalog_path)
        .arg("--log-dir")
        .arg(temp.path().join("logs"))
        .args(["--action", "add number"]);
    let output = run_command(cmd)?;
    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8(output.stdout)?;
    assert!(stdout.contains(" - add number: incorrect result - "), "{stdout}");
    Ok(())
}

#[test]
fn diagnose_binary_lists_scenarios() -> Result<()> {
    let mut cmd = Command::new(helper_binary("capability-diagnose"));
    cmd.arg("--list");
    let output = run_command_ok(cmd)?;
    let stdout = String::from_utf8(output.stdout)?;
    let listed: Vec<&str> = stdout
        .lines()
        .skip(1)
        .filter_map(|line| line.strip_prefix(" - "))
        .collect();
    let expected = split_list(
        "add number, create folder, get current time, ignore, list folder, mouse move, send http request",
    );
    assert_eq!(listed, expected);
    Ok(())
}
