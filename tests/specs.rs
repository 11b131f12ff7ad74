// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workspace-level CLI specs for the `flux` binary.

use assert_cmd::Command;
use tempfile::TempDir;

fn flux() -> Command {
    let mut cmd = Command::cargo_bin("flux").unwrap();
    // Isolate from any real ~/.flux on the machine running the suite
    let state = TempDir::new().unwrap();
    cmd.env("FLUX_STATE_DIR", state.path());
    cmd.env_remove("FLUX_COORDINATOR_URL");
    cmd.env_remove("FLUX_TOKEN");
    // Keep the TempDir alive for the process duration
    Box::leak(Box::new(state));
    cmd
}

#[test]
fn help_lists_the_daemon_subcommand() {
    let output = flux().arg("--help").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("daemon"), "help output missing daemon: {stdout}");
}

#[test]
fn daemon_without_credentials_exits_one_with_error_prefix() {
    let output = flux().arg("daemon").output().unwrap();
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Error:"), "stderr missing Error prefix: {stderr}");
}

#[test]
fn config_prints_redacted_resolved_configuration() {
    let output = flux()
        .arg("config")
        .env("FLUX_COORDINATOR_URL", "https://coord.example.com")
        .env("FLUX_TOKEN", "super-secret-token")
        .env("FLUX_ORG_ID", "org-1")
        .output()
        .unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let value: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(value["coordinatorUrl"], "https://coord.example.com");
    assert_eq!(value["orgId"], "org-1");
    assert!(!stdout.contains("super-secret-token"));
}
