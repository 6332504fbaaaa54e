use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::path::Path;
use std::process::Command;
use tempfile::tempdir;

fn strata(dir: &Path) -> Command {
    #[allow(deprecated)]
    let mut cmd = Command::cargo_bin("strata").unwrap();
    cmd.current_dir(dir);
    cmd
}

fn add(dir: &Path, args: &[&str]) -> String {
    let output = strata(dir).arg("add").args(args).output().unwrap();
    assert!(output.status.success(), "add failed: {output:?}");
    String::from_utf8(output.stdout).unwrap().trim().to_string()
}

#[test]
fn test_commands_require_init() {
    let dir = tempdir().unwrap();
    strata(dir.path())
        .arg("show")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("strata init"));
}

#[test]
fn test_init_is_idempotent() {
    let dir = tempdir().unwrap();
    strata(dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Initialized outline"));
    strata(dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Already initialized"));
}

#[test]
fn test_add_and_show_outline() {
    let dir = tempdir().unwrap();
    strata(dir.path()).arg("init").assert().success();

    let inbox = add(dir.path(), &["Inbox"]);
    add(dir.path(), &["Buy milk", "--parent", &inbox[..8], "--tag", "home"]);
    add(dir.path(), &["Later"]);

    strata(dir.path())
        .arg("show")
        .assert()
        .success()
        .stdout(predicate::str::contains("- [todo] Inbox"))
        .stdout(predicate::str::contains("  - [todo] Buy milk #home"))
        .stdout(predicate::str::contains("- [todo] Later"));
}

#[test]
fn test_rm_hides_and_restore_brings_back() {
    let dir = tempdir().unwrap();
    strata(dir.path()).arg("init").assert().success();
    let node = add(dir.path(), &["Temporary"]);

    strata(dir.path()).args(["rm", &node]).assert().success();
    strata(dir.path())
        .arg("show")
        .assert()
        .success()
        .stdout(predicate::str::contains("Outline is empty."));
    strata(dir.path())
        .args(["show", "--all"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Temporary (deleted)"));

    strata(dir.path()).args(["restore", &node]).assert().success();
    strata(dir.path())
        .arg("show")
        .assert()
        .success()
        .stdout(predicate::str::contains("- [todo] Temporary"));
}

#[test]
fn test_show_json_and_log() {
    let dir = tempdir().unwrap();
    strata(dir.path()).arg("init").assert().success();
    let node = add(dir.path(), &["Write report"]);
    strata(dir.path())
        .args(["status", &node, "done"])
        .assert()
        .success();
    strata(dir.path())
        .args(["edit", &node, "Write the report"])
        .assert()
        .success();

    let output = strata(dir.path()).args(["show", "--json"]).output().unwrap();
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["lastSeq"], 3);
    let first = &json["nodes"][0];
    assert_eq!(first["text"], "Write the report");
    assert_eq!(first["status"], "done");
    assert_eq!(first["depth"], 0);
    assert_eq!(first["id"], node.as_str());

    let output = strata(dir.path()).args(["log", "--json"]).output().unwrap();
    let ops: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let types: Vec<&str> = ops
        .as_array()
        .unwrap()
        .iter()
        .map(|op| op["type"].as_str().unwrap())
        .collect();
    assert_eq!(types, vec!["create", "setStatus", "updateText"]);
}

#[test]
fn test_unknown_status_is_rejected() {
    let dir = tempdir().unwrap();
    strata(dir.path()).arg("init").assert().success();
    let node = add(dir.path(), &["Task"]);
    strata(dir.path())
        .args(["status", &node, "blocked"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown status"));
}

#[test]
fn test_config_adds_statuses() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("strata.json");
    std::fs::write(
        &config,
        r##"{"statuses": [
            {"id": "open", "label": "Open", "color": "#888888"},
            {"id": "blocked", "label": "Blocked", "color": "#cc3333"}
        ]}"##,
    )
    .unwrap();
    strata(dir.path()).arg("init").assert().success();

    let output = strata(dir.path())
        .args(["--config", config.to_str().unwrap(), "add", "Task"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let node = String::from_utf8(output.stdout).unwrap().trim().to_string();

    strata(dir.path())
        .args(["--config", config.to_str().unwrap(), "status", &node, "blocked"])
        .assert()
        .success();
    strata(dir.path())
        .args(["--config", config.to_str().unwrap(), "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("- [blocked] Task"));
}

#[test]
fn test_move_and_compact() {
    let dir = tempdir().unwrap();
    strata(dir.path()).arg("init").assert().success();
    let a = add(dir.path(), &["A"]);
    let b = add(dir.path(), &["B"]);
    strata(dir.path())
        .args(["mv", &b, "--parent", &a])
        .assert()
        .success();
    strata(dir.path())
        .arg("compact")
        .assert()
        .success()
        .stdout(predicate::str::contains("dropped 3 operations"));
    strata(dir.path())
        .arg("show")
        .assert()
        .success()
        .stdout(predicate::str::contains("  - [todo] B"));
}

#[test]
fn test_unknown_node_prefix() {
    let dir = tempdir().unwrap();
    strata(dir.path()).arg("init").assert().success();
    strata(dir.path())
        .args(["rm", "ffffffff"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no node matches"));
}
