//! The hook binary end to end: one process per command, as the host runs it.

use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::{Value, json};
use tempfile::TempDir;

/// A home directory with a fast-KDF config and a scratch working tree.
fn home() -> TempDir {
    let home = TempDir::new().unwrap();
    let config_dir = home.path().join(".config/agent-gate");
    std::fs::create_dir_all(&config_dir).unwrap();
    std::fs::write(
        config_dir.join("config.toml"),
        "[audit]\nkdf_iterations = 10\nconsole_alerts = false\n",
    )
    .unwrap();
    std::fs::create_dir_all(home.path().join("work/scratch")).unwrap();
    std::fs::write(home.path().join("work/scratch/notes.md"), "# notes\n").unwrap();
    home
}

fn hook(home: &Path, session: &str, command: &str) -> Command {
    let payload = json!({
        "tool_name": "Bash",
        "tool_input": { "command": command },
        "session_id": session,
        "cwd": home.join("work"),
    });
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_agent-gate"));
    cmd.env("HOME", home).write_stdin(payload.to_string());
    cmd
}

fn decision(home: &Path, session: &str, command: &str) -> Value {
    let output = hook(home, session, command).output().unwrap();
    assert!(output.status.success());
    let out: Value = serde_json::from_slice(&output.stdout).unwrap();
    out["hookSpecificOutput"].clone()
}

#[test]
fn safe_command_is_allowed() {
    let home = home();
    let d = decision(home.path(), "s0", "ls -la");
    assert_eq!(d["permissionDecision"], "allow");
}

#[test]
fn workflow_spans_separate_processes() {
    let home = home();
    let first = decision(home.path(), "s1", "git reset --hard HEAD~3");
    assert_eq!(first["permissionDecision"], "ask");

    let second = decision(home.path(), "s1", "git push --force origin main");
    assert_eq!(second["permissionDecision"], "deny");
    assert!(
        second["permissionDecisionReason"]
            .as_str()
            .unwrap()
            .contains("HISTORY_REWRITE")
    );

    // A different session has no such history.
    let other = decision(home.path(), "s9", "git push --force origin main");
    assert_eq!(other["permissionDecision"], "ask");
}

#[test]
fn delete_is_previewed_backed_up_and_asked_once() {
    let home = home();
    let d = decision(home.path(), "s2", "rm -rf scratch");
    assert_eq!(d["permissionDecision"], "ask");
    let reason = d["permissionDecisionReason"].as_str().unwrap();
    assert!(reason.contains("will delete 1 file, 1 directory"), "{reason}");
    assert!(reason.contains("backup saved to"), "{reason}");

    let backups = home.path().join(".local/share/agent-gate/backups/work");
    assert_eq!(std::fs::read_dir(&backups).unwrap().count(), 1);

    hook(home.path(), "s2", "rm -rf scratch")
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
    assert!(home.path().join("work/scratch/notes.md").exists());
}

#[test]
fn other_tools_are_ignored() {
    let home = home();
    let payload = json!({ "tool_name": "Read", "tool_input": { "file_path": "x" } });
    Command::new(env!("CARGO_BIN_EXE_agent-gate"))
        .env("HOME", home.path())
        .write_stdin(payload.to_string())
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}
