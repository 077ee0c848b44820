//! Smoke tests -- verify the binary runs and key subcommands exist.

use assert_cmd::Command;

#[test]
fn test_cli_help() {
    Command::cargo_bin("netpulse")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicates::str::contains(
            "Self-hosted mobile-network diagnostics",
        ));
}

#[test]
fn test_cli_version() {
    Command::cargo_bin("netpulse")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicates::str::contains("netpulse"));
}

#[test]
fn test_serve_subcommand_exists() {
    Command::cargo_bin("netpulse")
        .unwrap()
        .args(["serve", "--help"])
        .assert()
        .success();
}

#[test]
fn test_test_subcommand_exists() {
    Command::cargo_bin("netpulse")
        .unwrap()
        .args(["test", "--help"])
        .assert()
        .success();
}

#[test]
fn test_schedule_list_subcommand_exists() {
    Command::cargo_bin("netpulse")
        .unwrap()
        .args(["schedule", "list", "--help"])
        .assert()
        .success();
}

#[test]
fn test_stats_subcommand_exists() {
    Command::cargo_bin("netpulse")
        .unwrap()
        .args(["stats", "--help"])
        .assert()
        .success();
}
