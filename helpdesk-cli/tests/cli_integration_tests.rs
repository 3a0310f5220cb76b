//! Integration tests for the `helpdesk` binary.

use std::time::Duration;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::PredicateBooleanExt;
use tempfile::TempDir;

#[test]
fn top_level_help_lists_the_commands() {
    let mut cmd = cargo_bin_cmd!("helpdesk");
    cmd.arg("--help");

    cmd.assert()
        .success()
        .stdout(predicates::str::contains("Command-line client for the HelpDesk support desk"))
        .stdout(predicates::str::contains("session"))
        .stdout(predicates::str::contains("tickets"))
        .stdout(predicates::str::contains("ticket"))
        .stdout(predicates::str::contains("completion"));
}

#[test]
fn tickets_help_shows_filters() {
    let mut cmd = cargo_bin_cmd!("helpdesk");
    cmd.arg("tickets").arg("--help");

    cmd.assert()
        .success()
        .stdout(predicates::str::contains("--status"))
        .stdout(predicates::str::contains("--header"))
        .stdout(predicates::str::contains("--unread"))
        .stdout(predicates::str::contains("--watch"));
}

#[test]
fn unknown_status_is_rejected_by_the_parser() {
    let mut cmd = cargo_bin_cmd!("helpdesk");
    cmd.args(["tickets", "--status", "archived"])
        .timeout(Duration::from_secs(5));

    cmd.assert()
        .failure()
        .stderr(predicates::str::contains("invalid value"))
        .stderr(predicates::str::contains("unknown ticket status"));
}

#[test]
fn ticket_status_requires_a_numeric_id() {
    let mut cmd = cargo_bin_cmd!("helpdesk");
    cmd.args(["ticket", "status", "twelve", "active"])
        .timeout(Duration::from_secs(5));

    cmd.assert()
        .failure()
        .stderr(predicates::str::contains("invalid value"));
}

#[test]
fn ticket_create_requires_a_header() {
    let mut cmd = cargo_bin_cmd!("helpdesk");
    cmd.args(["ticket", "create", "VPN is down"])
        .timeout(Duration::from_secs(5));

    cmd.assert()
        .failure()
        .stderr(predicates::str::contains(
            "the following required arguments were not provided",
        ))
        .stderr(predicates::str::contains("--header <HEADER>"));
}

#[test]
fn commands_without_a_session_point_at_login() {
    let session_dir = TempDir::new().unwrap();
    let mut cmd = cargo_bin_cmd!("helpdesk");
    cmd.env("HELPDESK_SESSION_DIR", session_dir.path())
        .env_remove("HELPDESK_API_URL")
        .env_remove("HELPDESK_WS_URL")
        .args(["tickets", "--api-url", "http://127.0.0.1:9/api"])
        .timeout(Duration::from_secs(10));

    cmd.assert().failure().stderr(
        predicates::str::contains("no active session found")
            .and(predicates::str::contains("helpdesk session login")),
    );
}

#[test]
fn logout_without_a_session_is_harmless() {
    let session_dir = TempDir::new().unwrap();
    let mut cmd = cargo_bin_cmd!("helpdesk");
    cmd.env("HELPDESK_SESSION_DIR", session_dir.path())
        .args(["session", "logout"])
        .timeout(Duration::from_secs(10));

    cmd.assert()
        .success()
        .stdout(predicates::str::contains("No stored session found"));
}

#[test]
fn config_command_writes_the_requested_format() {
    let workdir = TempDir::new().unwrap();
    let mut cmd = cargo_bin_cmd!("helpdesk");
    cmd.current_dir(workdir.path()).args(["config", "--format", "toml"]);

    cmd.assert()
        .success()
        .stdout(predicates::str::contains("helpdesk.toml"));

    let written = std::fs::read_to_string(workdir.path().join("helpdesk.toml")).unwrap();
    assert!(written.contains("page_size = 5"));
    assert!(written.contains("reconnect_delay_ms = 5000"));
}

#[test]
fn config_command_rejects_unknown_formats() {
    let workdir = TempDir::new().unwrap();
    let mut cmd = cargo_bin_cmd!("helpdesk");
    cmd.current_dir(workdir.path()).args(["config", "--format", "ini"]);

    cmd.assert()
        .failure()
        .stderr(predicates::str::contains("unsupported format `ini`"));
}

#[test]
fn completion_script_is_generated() {
    let mut cmd = cargo_bin_cmd!("helpdesk");
    cmd.args(["completion", "--shell", "bash"]);

    cmd.assert()
        .success()
        .stdout(predicates::str::contains("_helpdesk"));
}
