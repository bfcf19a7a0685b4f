use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn write(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn scan() -> Command {
    let mut cmd = Command::cargo_bin("iac-scan").unwrap();
    cmd.env_remove("IAC_TEMPLATE_ENGINE").env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_clean_project_passes() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "cm.yaml", "kind: ConfigMap\ndata:\n  url: https://api.example.com\n");

    scan().arg(dir.path()).assert().success().stdout(predicate::str::is_empty());
}

#[test]
fn test_findings_fail_the_run() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "cm.yaml", "kind: ConfigMap\ndata:\n  url: http://api.example.com\n");

    scan()
        .arg(dir.path())
        .assert()
        .code(1)
        .stdout(predicate::str::contains("cm.yaml"))
        .stdout(predicate::str::contains("3:7"))
        .stdout(predicate::str::contains("K8S002"));
}

#[test]
fn test_threshold_above_findings_passes() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "cm.yaml", "url: http://api.example.com\n");

    scan()
        .arg(dir.path())
        .args(["--threshold", "error"])
        .assert()
        .success()
        .stdout(predicate::str::contains("K8S002"));
}

#[test]
fn test_json_output() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "cm.yaml", "url: http://api.example.com\n");

    let output = scan()
        .arg(dir.path())
        .args(["--format", "json", "--threshold", "none"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["issues"][0]["ruleId"], "K8S002");
    assert_eq!(report["issues"][0]["file"], "cm.yaml");
    assert_eq!(report["summary"]["filesAnalyzed"], 1);
}

#[test]
fn test_config_file_is_loaded() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "cm.yaml", "url: http://api.example.com\n");
    write(dir.path(), ".iac-analyzer.yaml", "ignored: [K8S002]\n");

    scan().arg(dir.path()).assert().success();
}

#[test]
fn test_missing_engine_is_fatal() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "cm.yaml", "a: 1\n");

    scan()
        .arg(dir.path())
        .args(["--engine", "/nonexistent/engine"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Template engine not found"));
}

#[test]
fn test_missing_directory_is_fatal() {
    let dir = TempDir::new().unwrap();
    scan()
        .arg(dir.path().join("missing"))
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Not a directory"));
}
