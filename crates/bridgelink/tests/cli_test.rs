//! Integration tests for the `bridgelink` CLI binary.
//!
//! These tests validate argument parsing, help output, shell completions,
//! config handling and error exit codes, all without a live bridge.
#![allow(clippy::unwrap_used)]

use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a [`Command`] for the `bridgelink` binary with env isolation.
///
/// Clears all `BRIDGELINK_*` env vars and points config directories at
/// `home` so tests never touch the user's real configuration.
fn bridgelink_cmd(home: &Path) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("bridgelink");
    cmd.env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join(".config"))
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG")
        .env_remove("BRIDGELINK_PROFILE")
        .env_remove("BRIDGELINK_HOST")
        .env_remove("BRIDGELINK_AUTH_KEY")
        .env_remove("BRIDGELINK_OUTPUT")
        .env_remove("BRIDGELINK_TIMEOUT")
        .env_remove("BRIDGELINK_DEFAULT_PROFILE");
    cmd
}

fn write_config(home: &Path, contents: &str) {
    let dir = home.join(".config").join("bridgelink");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("config.toml"), contents).unwrap();
}

/// Concatenate stdout + stderr from a command output for flexible matching.
fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let home = tempfile::tempdir().unwrap();
    let output = bridgelink_cmd(home.path()).output().unwrap();
    assert_eq!(output.status.code(), Some(2), "Expected exit code 2");
    let text = combined_output(&output);
    assert!(text.contains("Usage"), "Expected 'Usage' in output:\n{text}");
}

#[test]
fn test_help_lists_commands() {
    let home = tempfile::tempdir().unwrap();
    bridgelink_cmd(home.path()).arg("--help").assert().success().stdout(
        predicate::str::contains("devices")
            .and(predicate::str::contains("rooms"))
            .and(predicate::str::contains("switch"))
            .and(predicate::str::contains("dim"))
            .and(predicate::str::contains("watch")),
    );
}

#[test]
fn test_version_flag() {
    let home = tempfile::tempdir().unwrap();
    bridgelink_cmd(home.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("bridgelink"));
}

// ── Shell completions ───────────────────────────────────────────────

#[test]
fn test_completions_bash() {
    let home = tempfile::tempdir().unwrap();
    bridgelink_cmd(home.path())
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty().not());
}

#[test]
fn test_completions_zsh() {
    let home = tempfile::tempdir().unwrap();
    bridgelink_cmd(home.path())
        .args(["completions", "zsh"])
        .assert()
        .success()
        .stdout(predicate::str::contains("#compdef"));
}

// ── Argument errors ─────────────────────────────────────────────────

#[test]
fn test_invalid_subcommand() {
    let home = tempfile::tempdir().unwrap();
    let output = bridgelink_cmd(home.path()).arg("foobar").output().unwrap();
    assert!(!output.status.success());
    let text = combined_output(&output);
    assert!(
        text.contains("unrecognized") || text.contains("foobar"),
        "Expected error mentioning invalid subcommand:\n{text}"
    );
}

#[test]
fn test_switch_requires_on_or_off() {
    let home = tempfile::tempdir().unwrap();
    bridgelink_cmd(home.path())
        .args(["switch", "12", "maybe"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("possible values"));
}

#[test]
fn test_invalid_output_format() {
    let home = tempfile::tempdir().unwrap();
    bridgelink_cmd(home.path())
        .args(["--output", "yaml", "devices", "list"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("possible values"));
}

#[test]
fn test_room_subcommands_exist() {
    let home = tempfile::tempdir().unwrap();
    bridgelink_cmd(home.path())
        .args(["room", "3", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("switch").and(predicate::str::contains("dim")));
}

// ── Configuration ───────────────────────────────────────────────────

#[test]
fn test_devices_list_without_config() {
    let home = tempfile::tempdir().unwrap();
    bridgelink_cmd(home.path())
        .args(["devices", "list"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("No bridge configured"));
}

#[test]
fn test_unknown_profile() {
    let home = tempfile::tempdir().unwrap();
    write_config(
        home.path(),
        r#"
        [profiles.home]
        host = "192.168.1.20"
        auth_key = "k"
        "#,
    );
    bridgelink_cmd(home.path())
        .args(["--profile", "office", "devices", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("office").and(predicate::str::contains("home")));
}

#[test]
fn test_profile_without_auth_key() {
    let home = tempfile::tempdir().unwrap();
    write_config(
        home.path(),
        r#"
        default_profile = "home"

        [profiles.home]
        host = "192.168.1.20"
        "#,
    );
    bridgelink_cmd(home.path())
        .args(["devices", "list"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("No auth key configured"));
}

#[test]
fn test_blank_auth_key_is_rejected() {
    let home = tempfile::tempdir().unwrap();
    bridgelink_cmd(home.path())
        .args(["--host", "127.0.0.1:1", "--auth-key", "   ", "devices"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("auth_key"));
}

#[test]
fn test_config_path_points_into_config_home() {
    let home = tempfile::tempdir().unwrap();
    bridgelink_cmd(home.path())
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("bridgelink").and(predicate::str::contains("config.toml")));
}

#[test]
fn test_config_show_without_file() {
    let home = tempfile::tempdir().unwrap();
    bridgelink_cmd(home.path())
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[defaults]"));
}

#[test]
fn test_config_show_masks_auth_key() {
    let home = tempfile::tempdir().unwrap();
    write_config(
        home.path(),
        r#"
        default_profile = "home"

        [profiles.home]
        host = "192.168.1.20"
        auth_key = "super-secret"
        "#,
    );
    bridgelink_cmd(home.path())
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("[profiles.home]")
                .and(predicate::str::contains("****"))
                .and(predicate::str::contains("super-secret").not()),
        );
}

#[test]
fn test_config_profiles_marks_active() {
    let home = tempfile::tempdir().unwrap();
    write_config(
        home.path(),
        r#"
        default_profile = "office"

        [profiles.home]
        host = "192.168.1.20"

        [profiles.office]
        host = "10.0.0.5"
        "#,
    );
    bridgelink_cmd(home.path())
        .args(["config", "profiles"])
        .assert()
        .success()
        .stdout(predicate::str::contains("* office").and(predicate::str::contains("  home")));
}

// ── Connection errors ───────────────────────────────────────────────

#[test]
fn test_unreachable_bridge_exits_with_connection_code() {
    let home = tempfile::tempdir().unwrap();
    bridgelink_cmd(home.path())
        .args([
            "--host",
            "127.0.0.1:1",
            "--auth-key",
            "secret",
            "--timeout",
            "2",
            "devices",
            "list",
        ])
        .assert()
        .code(7)
        .stderr(predicate::str::contains("Could not connect"));
}
