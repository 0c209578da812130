//! Integration tests for `osm adapt` with the offline mock model.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn osm(temp_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("osm").unwrap();
    cmd.current_dir(temp_dir.path())
        .env("HOME", temp_dir.path())
        .arg("--log-level")
        .arg("error")
        .arg("--data-dir")
        .arg(temp_dir.path().join("playbook"));
    cmd
}

fn write_samples(temp_dir: &TempDir, lines: &[&str]) -> std::path::PathBuf {
    let path = temp_dir.path().join("samples.jsonl");
    fs::write(&path, lines.join("\n")).unwrap();
    path
}

#[test]
fn test_adapt_requires_playbook() {
    let temp_dir = TempDir::new().unwrap();
    let samples = write_samples(&temp_dir, &[r#"{"id": "s1", "feedback": "too vague"}"#]);

    osm(&temp_dir)
        .arg("adapt")
        .arg("--samples")
        .arg(&samples)
        .assert()
        .failure()
        .stderr(predicate::str::contains("osm init"));
}

#[test]
fn test_adapt_runs_epochs_with_mock_model() {
    let temp_dir = TempDir::new().unwrap();
    osm(&temp_dir).arg("init").assert().success();
    let samples = write_samples(
        &temp_dir,
        &[
            r#"{"id": "s1", "requirements": {"task": "dilute acid"}, "feedback": "Missing safety step"}"#,
            "",
            r#"{"id": "s2", "requirements": {"task": "store acid"}, "ground_truth": {"steps": []}}"#,
            r#"{"id": "s3", "requirements": {"task": "unlabeled"}}"#,
        ],
    );

    let output = osm(&temp_dir)
        .arg("adapt")
        .arg("--samples")
        .arg(&samples)
        .arg("--epochs")
        .arg("2")
        .arg("--json")
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let reports: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let reports = reports.as_array().unwrap();
    assert_eq!(reports.len(), 2);
    for report in reports {
        assert_eq!(report["processed"], 2);
        assert_eq!(report["failed"], 1);
    }
    assert!(reports[1]["version"].as_u64().unwrap() > reports[0]["version"].as_u64().unwrap());
}

#[test]
fn test_adapt_rejects_malformed_sample_line() {
    let temp_dir = TempDir::new().unwrap();
    osm(&temp_dir).arg("init").assert().success();
    let samples = write_samples(&temp_dir, &[r#"{"id": "s1", "feedback": "ok"}"#, "not json"]);

    osm(&temp_dir)
        .arg("adapt")
        .arg("--samples")
        .arg(&samples)
        .assert()
        .failure()
        .stderr(predicate::str::contains("samples.jsonl:2"));
}
