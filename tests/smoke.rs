//! Smoke tests -- verify the binary runs and key subcommands load.

use assert_cmd::Command;

#[test]
fn test_cli_help() {
    Command::cargo_bin("gridwarden")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicates::str::contains(
            "Telemetry anomaly detection and firmware patch rollout",
        ));
}

#[test]
fn test_cli_version() {
    Command::cargo_bin("gridwarden")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicates::str::contains("gridwarden"));
}

#[test]
fn test_serve_subcommand_exists() {
    Command::cargo_bin("gridwarden")
        .unwrap()
        .args(["serve", "--help"])
        .assert()
        .success();
}

#[test]
fn test_alerts_subcommand_exists() {
    Command::cargo_bin("gridwarden")
        .unwrap()
        .args(["alerts", "--help"])
        .assert()
        .success();
}

#[test]
fn test_patch_subcommand_exists() {
    Command::cargo_bin("gridwarden")
        .unwrap()
        .args(["patch", "--help"])
        .assert()
        .success();
}

#[test]
fn test_simulate_attack_subcommand_exists() {
    Command::cargo_bin("gridwarden")
        .unwrap()
        .args(["simulate-attack", "--help"])
        .assert()
        .success();
}
