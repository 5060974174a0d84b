//! CLI Tests
//!
//! Exit codes and terminal output of the `analyze` command.

use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;

const CONFIG: &str = r#"{
    "sources": [{"name": "Test"}],
    "sinks": [{"name": "Test"}],
    "rules": [{
        "code": 5001,
        "name": "test flow",
        "sources": ["Test"],
        "sinks": ["Test"],
        "message_format": "{$sources} to {$sinks}"
    }]
}"#;

fn write_project(dir: &tempfile::TempDir, code: &str) {
    fs::write(dir.path().join("m.py"), code).expect("write module");
    fs::write(
        dir.path().join("models.tfmodel"),
        "def m.source() -> TaintSource[Test]: ...\ndef m.sink(arg: TaintSink[Test]): ...\n",
    )
    .expect("write models");
    fs::write(dir.path().join("config.json"), CONFIG).expect("write config");
}

fn taintflow() -> Command {
    Command::cargo_bin("taintflow-bin").expect("binary builds")
}

#[test]
fn clean_project_exits_zero() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_project(
        &dir,
        "def source():\n    ...\n\ndef sink(arg):\n    ...\n\ndef main():\n    sink(\"constant\")\n",
    );

    taintflow()
        .arg("analyze")
        .arg(dir.path())
        .args(["--models"])
        .arg(dir.path().join("models.tfmodel"))
        .args(["--taint-config"])
        .arg(dir.path().join("config.json"))
        .args(["--jobs", "2", "--quiet"])
        .assert()
        .success()
        .stdout(predicate::str::contains("0 issues"));
}

#[test]
fn findings_exit_with_code_one() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_project(
        &dir,
        "def source():\n    ...\n\ndef sink(arg):\n    ...\n\ndef main():\n    sink(source())\n",
    );

    taintflow()
        .arg("analyze")
        .arg(dir.path())
        .args(["--models"])
        .arg(dir.path().join("models.tfmodel"))
        .args(["--taint-config"])
        .arg(dir.path().join("config.json"))
        .args(["--jobs", "2"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("1 issues"));
}

#[test]
fn invalid_configuration_exits_with_code_two() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_project(&dir, "def main():\n    pass\n");
    fs::write(dir.path().join("config.json"), "{not json").expect("write config");

    taintflow()
        .arg("analyze")
        .arg(dir.path())
        .args(["--taint-config"])
        .arg(dir.path().join("config.json"))
        .args(["--jobs", "2", "--quiet"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("error"));
}

#[test]
fn issue_output_file_is_written() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_project(
        &dir,
        "def source():\n    ...\n\ndef sink(arg):\n    ...\n\ndef main():\n    sink(source())\n",
    );
    let output = dir.path().join("issues.json");

    taintflow()
        .arg("analyze")
        .arg(dir.path())
        .args(["--models"])
        .arg(dir.path().join("models.tfmodel"))
        .args(["--taint-config"])
        .arg(dir.path().join("config.json"))
        .args(["--output"])
        .arg(&output)
        .args(["--jobs", "2", "--quiet"])
        .assert()
        .code(1);

    let rendered: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(output).expect("output exists"))
            .expect("valid JSON");
    assert_eq!(rendered.as_array().expect("array").len(), 1);
}
