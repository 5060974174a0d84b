//! End-To-End Analysis Tests
//!
//! Full-pipeline scenarios: sources on disk, models, configuration,
//! fixpoint, issue output.

use std::fs;

use taintflow::driver::{run_analysis, AnalysisRequest};
use taintflow::report::issues_to_json;
use taintflow::taint::{SinkKind, SourceKind};
use taintflow::AnalysisOutcome;

const CONFIG: &str = r#"{
    "sources": [
        {"name": "Test"},
        {"name": "UserControlled"},
        {"name": "PermissiveContext"}
    ],
    "sinks": [{"name": "Test"}, {"name": "SQL"}],
    "rules": [{
        "code": 5001,
        "name": "test flow",
        "sources": ["Test"],
        "sinks": ["Test"],
        "message_format": "Data from {$sources} may reach {$sinks}"
    }],
    "combined_source_rules": [{
        "code": 6001,
        "name": "paired flow",
        "message_format": "both halves arrived",
        "rule": [
            {"sources": ["UserControlled"], "partial_sink": "P_A"},
            {"sources": ["PermissiveContext"], "partial_sink": "P_B"}
        ]
    }]
}"#;

/// Writes a project into a temp directory and analyzes it.
fn analyze(files: &[(&str, &str)]) -> (AnalysisOutcome, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut model_paths = Vec::new();
    let mut config_path = None;

    for (name, content) in files {
        let path = dir.path().join(name);
        fs::write(&path, content).expect("write fixture");
        if name.ends_with(".tfmodel") {
            model_paths.push(path);
        } else if name.ends_with(".json") {
            config_path = Some(path);
        }
    }

    let request = AnalysisRequest {
        source_root: dir.path().to_path_buf(),
        model_paths,
        taint_config: config_path,
        output: None,
        save_models_to: Some(dir.path().join("models-out.json")),
        jobs: Some(2),
        verify_models: true,
        find_missing_flows: None,
        quiet: true,
    };
    let outcome = run_analysis(&request).expect("analysis runs");
    (outcome, dir)
}

fn saved_models(dir: &tempfile::TempDir) -> serde_json::Value {
    let content = fs::read_to_string(dir.path().join("models-out.json")).expect("models written");
    serde_json::from_str(&content).expect("model JSON parses")
}

const STUBS: &str = "\
def source():
    ...

def sink(arg):
    ...
";

const STUB_MODELS: &str = "\
def m.source() -> TaintSource[Test]: ...
def m.sink(arg: TaintSink[Test]): ...
";

// ============================================================================
// Scenario: direct pipe
// ============================================================================

#[test]
fn direct_pipe_reports_one_issue() {
    let code = format!(
        "{STUBS}
def f(x):
    sink(x)

def main():
    f(source())
"
    );
    let (outcome, _dir) = analyze(&[
        ("m.py", &code),
        ("models.tfmodel", STUB_MODELS),
        ("config.json", CONFIG),
    ]);

    assert_eq!(outcome.issues.len(), 1, "exactly one issue expected");
    let issue = &outcome.issues[0];
    assert_eq!(issue.code, 5001);
    assert_eq!(issue.callable.canonical(), "m.main");
    assert!(issue.source_taint.contains(&SourceKind::new("Test")));
    assert!(issue.sink_taint.contains(&SinkKind::named("Test")));
    // One hop through `f` on the sink side.
    let sink_flow = issue
        .sink_taint
        .get(&SinkKind::named("Test"))
        .expect("sink flow");
    assert_eq!(sink_flow.min_trace_length(), 1);
}

#[test]
fn untainted_code_reports_nothing() {
    let code = "\
def helper(x):
    return x + 1

def main():
    helper(42)
";
    let (outcome, _dir) = analyze(&[("m.py", code), ("config.json", CONFIG)]);
    assert!(outcome.issues.is_empty());
    assert!(outcome.callables >= 2);
}

#[test]
fn empty_model_means_no_issues_regardless_of_callers() {
    let code = format!(
        "{STUBS}
def noop(x):
    pass

def main():
    noop(source())
"
    );
    let (outcome, _dir) = analyze(&[
        ("m.py", &code),
        ("models.tfmodel", STUB_MODELS),
        ("config.json", CONFIG),
    ]);
    assert!(outcome.issues.is_empty());
}

// ============================================================================
// Scenario: taint-in-taint-out
// ============================================================================

#[test]
fn tito_through_list_wrapper_is_tracked() {
    let code = format!(
        "{STUBS}
def wrap(x):
    return [x]

def main():
    sink(wrap(source()))
"
    );
    let (outcome, dir) = analyze(&[
        ("m.py", &code),
        ("models.tfmodel", STUB_MODELS),
        ("config.json", CONFIG),
    ]);

    assert_eq!(outcome.issues.len(), 1);
    assert_eq!(outcome.issues[0].code, 5001);
    assert_eq!(outcome.issues[0].callable.canonical(), "m.main");

    // The wrapper's summary records the any-index subfield on its
    // return path.
    let models = saved_models(&dir);
    let wrap = models
        .as_array()
        .expect("array")
        .iter()
        .find(|model| model["callable"] == "m.wrap")
        .expect("wrap model saved");
    let tito = wrap["tito"].as_array().expect("tito entries");
    let rendered = serde_json::to_string(tito).expect("render");
    assert!(
        rendered.contains("\"any\""),
        "return path should record the any-index subfield: {rendered}"
    );
}

#[test]
fn tito_preserves_field_precision() {
    let code = format!(
        "{STUBS}
def pick_safe(pair):
    return pair[1]

def main():
    sink(pick_safe((source(), 0)))
"
    );
    let (outcome, _dir) = analyze(&[
        ("m.py", &code),
        ("models.tfmodel", STUB_MODELS),
        ("config.json", CONFIG),
    ]);
    // Only index 0 of the tuple is tainted; the wrapper reads index 1.
    assert!(outcome.issues.is_empty(), "index-precise tito must not leak");
}

// ============================================================================
// Scenario: combined-source rules
// ============================================================================

const COMBINED_CODE: &str = "\
def user_input():
    ...

def context():
    ...

def multi(a, b):
    ...
";

const COMBINED_MODELS: &str = "\
def m.user_input() -> TaintSource[UserControlled]: ...
def m.context() -> TaintSource[PermissiveContext]: ...
def m.multi(a: PartialSink[P_A], b: PartialSink[P_B]): ...
";

#[test]
fn combined_rule_fires_when_both_halves_arrive() {
    let code = format!(
        "{COMBINED_CODE}
def main():
    multi(user_input(), context())
"
    );
    let (outcome, _dir) = analyze(&[
        ("m.py", &code),
        ("models.tfmodel", COMBINED_MODELS),
        ("config.json", CONFIG),
    ]);

    assert_eq!(outcome.issues.len(), 1);
    let issue = &outcome.issues[0];
    assert_eq!(issue.code, 6001);
    assert!(issue
        .source_taint
        .contains(&SourceKind::new("UserControlled")));
    assert!(issue
        .source_taint
        .contains(&SourceKind::new("PermissiveContext")));
}

#[test]
fn combined_rule_needs_both_halves() {
    let code = format!(
        "{COMBINED_CODE}
def only_first():
    multi(user_input(), \"benign\")

def only_second():
    multi(\"benign\", context())
"
    );
    let (outcome, _dir) = analyze(&[
        ("m.py", &code),
        ("models.tfmodel", COMBINED_MODELS),
        ("config.json", CONFIG),
    ]);
    assert!(outcome.issues.is_empty(), "one half alone must not fire");
}

// ============================================================================
// Scenario: sanitize barrier
// ============================================================================

#[test]
fn sanitizer_blocks_the_flow_through_it() {
    let code = format!(
        "{STUBS}
def clean(x):
    return x

def through_sanitizer():
    sink(clean(source()))

def direct():
    sink(source())
"
    );
    let models = format!(
        "{STUB_MODELS}def m.clean(x) -> Sanitize[TaintSource]: ...\n"
    );
    let (outcome, _dir) = analyze(&[
        ("m.py", &code),
        ("models.tfmodel", &models),
        ("config.json", CONFIG),
    ]);

    // The direct flow is still reported; the sanitized one is not.
    assert_eq!(outcome.issues.len(), 1);
    assert_eq!(outcome.issues[0].callable.canonical(), "m.direct");
}

// ============================================================================
// Scenario: dataclass constructor inference
// ============================================================================

#[test]
fn dataclass_field_flow_is_detected() {
    let code = format!(
        "from dataclasses import dataclass

{STUBS}
@dataclass
class P:
    x: int
    y: int

def leaky():
    p = P(source(), 0)
    sink(p.x)

def safe():
    p = P(0, source())
    sink(p.x)
"
    );
    let (outcome, _dir) = analyze(&[
        ("m.py", &code),
        ("models.tfmodel", STUB_MODELS),
        ("config.json", CONFIG),
    ]);

    assert_eq!(outcome.issues.len(), 1, "only the x field is tainted");
    assert_eq!(outcome.issues[0].callable.canonical(), "m.leaky");
}

// ============================================================================
// Cross-module resolution
// ============================================================================

#[test]
fn flows_cross_module_boundaries() {
    let library = "\
def forward_it(x):
    return x
";
    let code = format!(
        "import lib

{STUBS}
def main():
    sink(lib.forward_it(source()))
"
    );
    let (outcome, _dir) = analyze(&[
        ("lib.py", library),
        ("m.py", &code),
        ("models.tfmodel", STUB_MODELS),
        ("config.json", CONFIG),
    ]);
    assert_eq!(outcome.issues.len(), 1);
}

// ============================================================================
// Model validation surface
// ============================================================================

#[test]
fn invalid_models_are_collected_without_verify() {
    let code = "def real(a):\n    pass\n";
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("m.py"), code).expect("write");
    fs::write(
        dir.path().join("models.tfmodel"),
        "def m.missing() -> TaintSource[Test]: ...\n",
    )
    .expect("write");
    fs::write(dir.path().join("config.json"), CONFIG).expect("write");

    let request = AnalysisRequest {
        source_root: dir.path().to_path_buf(),
        model_paths: vec![dir.path().join("models.tfmodel")],
        taint_config: Some(dir.path().join("config.json")),
        jobs: Some(2),
        verify_models: false,
        quiet: true,
        ..AnalysisRequest::default()
    };
    let outcome = run_analysis(&request).expect("analysis tolerates bad models");
    assert_eq!(outcome.model_errors.len(), 1);
    assert!(outcome.issues.is_empty());
}

#[test]
fn verify_mode_aborts_on_invalid_model() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("m.py"), "def real(a):\n    pass\n").expect("write");
    fs::write(
        dir.path().join("models.tfmodel"),
        "def m.missing() -> TaintSource[Test]: ...\n",
    )
    .expect("write");
    fs::write(dir.path().join("config.json"), CONFIG).expect("write");

    let request = AnalysisRequest {
        source_root: dir.path().to_path_buf(),
        model_paths: vec![dir.path().join("models.tfmodel")],
        taint_config: Some(dir.path().join("config.json")),
        jobs: Some(2),
        verify_models: true,
        quiet: true,
        ..AnalysisRequest::default()
    };
    let error = run_analysis(&request).expect_err("verify aborts");
    assert_eq!(error.exit_code(), taintflow::errors::exit_codes::CONFIGURATION_ERROR);
}

// ============================================================================
// Determinism
// ============================================================================

#[test]
fn repeated_runs_are_byte_identical() {
    let code = format!(
        "{STUBS}
def wrap(x):
    return [x]

def f(x):
    sink(x)

def main():
    f(source())
    sink(wrap(source()))
"
    );
    let files: Vec<(&str, &str)> = vec![
        ("m.py", &code),
        ("models.tfmodel", STUB_MODELS),
        ("config.json", CONFIG),
    ];

    let dir = tempfile::tempdir().expect("tempdir");
    let mut model_paths = Vec::new();
    let mut config_path = None;
    for (name, content) in &files {
        let path = dir.path().join(name);
        fs::write(&path, content).expect("write fixture");
        if name.ends_with(".tfmodel") {
            model_paths.push(path);
        } else if name.ends_with(".json") {
            config_path = Some(path);
        }
    }
    let request = AnalysisRequest {
        source_root: dir.path().to_path_buf(),
        model_paths,
        taint_config: config_path,
        jobs: Some(4),
        quiet: true,
        ..AnalysisRequest::default()
    };

    let first = run_analysis(&request).expect("first run");
    let second = run_analysis(&request).expect("second run");
    let first_json = serde_json::to_string(&issues_to_json(&first.issues)).expect("render");
    let second_json = serde_json::to_string(&issues_to_json(&second.issues)).expect("render");
    assert_eq!(first_json, second_json);
    assert!(!first.issues.is_empty());
}

// ============================================================================
// Output files
// ============================================================================

#[test]
fn issue_json_carries_the_documented_fields() {
    let code = format!(
        "{STUBS}
def main():
    sink(source())
"
    );
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("m.py"), &code).expect("write");
    fs::write(dir.path().join("models.tfmodel"), STUB_MODELS).expect("write");
    fs::write(dir.path().join("config.json"), CONFIG).expect("write");
    let output = dir.path().join("issues.json");

    let request = AnalysisRequest {
        source_root: dir.path().to_path_buf(),
        model_paths: vec![dir.path().join("models.tfmodel")],
        taint_config: Some(dir.path().join("config.json")),
        output: Some(output.clone()),
        jobs: Some(2),
        quiet: true,
        ..AnalysisRequest::default()
    };
    let outcome = run_analysis(&request).expect("analysis");
    assert_eq!(outcome.issues.len(), 1);

    let rendered: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(output).expect("output written"))
            .expect("valid JSON");
    let issue = &rendered.as_array().expect("array")[0];
    for field in [
        "callable",
        "callable_line",
        "code",
        "line",
        "start",
        "end",
        "filename",
        "message",
        "traces",
        "features",
        "sink_handle",
        "master_handle",
    ] {
        assert!(issue.get(field).is_some(), "issue JSON must carry `{field}`");
    }
    assert_eq!(issue["code"], 5001);
    assert_eq!(issue["sink_handle"]["callee"], "m.sink");
    let handle = issue["master_handle"].as_str().expect("handle");
    assert!(handle.starts_with("m.main:5001:"));
}
