//! Runs the built binary against scratch workspaces.

use std::process::{Command, Output};

use serde_json::Value;

fn run(workspace: &std::path::Path, args: &[&str], env: &[(&str, &str)]) -> Output {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_impact-core"));
    cmd.arg("--workspace").arg(workspace).args(args);
    cmd.env_remove("IMPACT_SOURCE")
        .env_remove("IMPACT_BASE_URL")
        .env_remove("IMPACT_TOKEN");
    for (key, value) in env {
        cmd.env(key, value);
    }
    cmd.output().unwrap()
}

#[test]
fn can_ignores_broken_config() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("impact.toml"), "timeout_secs = \"soon\"").unwrap();

    let out = run(
        dir.path(),
        &["can", "--role", "ba", "--action", "trigger-analysis"],
        &[],
    );
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let response: Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(response["role"], "ba");
    assert_eq!(response["action"], "trigger-analysis");
    assert_eq!(response["allowed"], true);

    let out = run(dir.path(), &["--user", "ba@example.com", "dashboard"], &[]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("impact.toml"));
}

#[test]
fn can_ignores_rest_source_without_url() {
    let dir = tempfile::tempdir().unwrap();
    let out = run(
        dir.path(),
        &["can", "--role", "developer", "--action", "manage-users"],
        &[("IMPACT_SOURCE", "rest")],
    );
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let response: Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(response["allowed"], false);
}

#[test]
fn unknown_action_exits_nonzero() {
    let dir = tempfile::tempdir().unwrap();
    let out = run(dir.path(), &["can", "--role", "ba", "--action", "launch"], &[]);
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("Error:"));
}
