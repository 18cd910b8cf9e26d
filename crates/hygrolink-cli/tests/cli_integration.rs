//! CLI Integration Tests
//!
//! These tests run the built binary and check output formats and command
//! behaviors that need no Bluetooth hardware.
//!
//! ```
//! cargo test --package hygrolink-cli --test cli_integration
//! ```

use std::path::Path;
use std::process::{Command, Output};

use tempfile::tempdir;

const FRAME: &str = "aa aa a2 00 06 00 fa 00 32 01 00 00 55";

/// Run hygrolink with an isolated config file and no colors.
fn run_hygrolink_with_config(config: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_hygrolink"))
        .args(args)
        .env("HYGROLINK_CONFIG", config)
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG")
        .env_remove("HYGROLINK_DEVICE")
        .output()
        .expect("Failed to run hygrolink binary")
}

fn run_hygrolink(args: &[&str]) -> Output {
    let dir = tempdir().unwrap();
    run_hygrolink_with_config(&dir.path().join("config.toml"), args)
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
fn test_help_command() {
    let output = run_hygrolink(&["--help"]);

    assert!(output.status.success(), "Help should succeed");

    let stdout = stdout(&output);
    assert!(stdout.contains("hygrolink"), "Help should mention hygrolink");
    assert!(stdout.contains("scan"), "Help should list scan command");
    assert!(stdout.contains("monitor"), "Help should list monitor command");
    assert!(stdout.contains("decode"), "Help should list decode command");
}

#[test]
fn test_version_command() {
    let output = run_hygrolink(&["--version"]);

    assert!(output.status.success(), "Version should succeed");
    assert!(stdout(&output).contains("hygrolink"));
}

#[test]
fn test_subcommand_help() {
    for cmd in ["scan", "monitor", "decode", "config", "completions"] {
        let output = run_hygrolink(&[cmd, "--help"]);

        assert!(output.status.success(), "{} --help should succeed", cmd);
        assert!(
            !stdout(&output).is_empty(),
            "{} --help should produce output",
            cmd
        );
    }
}

#[test]
fn test_monitor_rejects_invalid_address() {
    let output = run_hygrolink(&["monitor", "--device", "not-an-address"]);

    assert!(!output.status.success());
    assert!(stderr(&output).contains("Invalid Bluetooth address"));
}

// =============================================================================
// Decode Command
// =============================================================================

#[test]
fn test_decode_text() {
    let output = run_hygrolink(&["decode", FRAME]);

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let stdout = stdout(&output);
    assert!(stdout.contains("Raw Data: aa aa a2 00 06 00 fa 00 32 01 00 00 55"));
    assert!(stdout.contains("Temperature: 25.0°C (77.0°F)"));
    assert!(stdout.contains("Humidity: 5.0%"));
    assert!(stdout.ends_with("Humidity: 5.0%\n"));
}

#[test]
fn test_decode_fahrenheit() {
    let output = run_hygrolink(&["decode", FRAME, "--fahrenheit"]);

    assert!(output.status.success());
    assert!(stdout(&output).contains("Temperature: 77.0°F (25.0°C)"));
}

#[test]
fn test_decode_json() {
    let output = run_hygrolink(&["decode", FRAME, "--format", "json"]);

    assert!(output.status.success());
    let value: serde_json::Value =
        serde_json::from_str(&stdout(&output)).expect("decode --format json should emit JSON");
    assert_eq!(value["temperature_celsius"], 25.0);
    assert_eq!(value["temperature_fahrenheit"], 77.0);
    assert_eq!(value["humidity_percent"], 5.0);
    assert_eq!(value["temperature_unit"], "celsius");
}

#[test]
fn test_decode_compact_json_is_one_line() {
    let output = run_hygrolink(&["decode", FRAME, "--format", "json", "--compact"]);

    assert!(output.status.success());
    assert_eq!(stdout(&output).lines().count(), 1);
}

#[test]
fn test_decode_short_frame_fails() {
    let output = run_hygrolink(&["decode", "aa aa a2 00"]);

    assert!(!output.status.success());
    assert!(stderr(&output).contains("too short"));
}

#[test]
fn test_decode_invalid_hex_fails() {
    let output = run_hygrolink(&["decode", "zz"]);

    assert!(!output.status.success());
    assert!(stderr(&output).contains("Invalid hex"));
}

#[test]
fn test_decode_uses_config_unit() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("config.toml");
    std::fs::write(&config, "fahrenheit = true\n").unwrap();

    let output = run_hygrolink_with_config(&config, &["decode", FRAME]);
    assert!(stdout(&output).contains("Temperature: 77.0°F (25.0°C)"));

    let output = run_hygrolink_with_config(&config, &["decode", FRAME, "--celsius"]);
    assert!(stdout(&output).contains("Temperature: 25.0°C (77.0°F)"));
}

// =============================================================================
// Config Command
// =============================================================================

#[test]
fn test_config_path() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("config.toml");

    let output = run_hygrolink_with_config(&config, &["config", "path"]);

    assert!(output.status.success());
    assert_eq!(stdout(&output).trim(), config.display().to_string());
}

#[test]
fn test_config_init_and_show() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("nested").join("config.toml");

    let output = run_hygrolink_with_config(&config, &["config", "init"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(config.exists());

    let output = run_hygrolink_with_config(&config, &["config", "show"]);
    assert!(output.status.success());
    let stdout = stdout(&output);
    assert!(stdout.contains("service_uuid = 65509"));
    assert!(stdout.contains("connect_timeout = 15"));

    // A second init refuses to clobber the file
    let output = run_hygrolink_with_config(&config, &["config", "init"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("already exists"));

    let output = run_hygrolink_with_config(&config, &["config", "init", "--force"]);
    assert!(output.status.success());
}

#[test]
fn test_malformed_config_falls_back_to_defaults() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("config.toml");
    std::fs::write(&config, "fahrenheit = \"sometimes\"").unwrap();

    let output = run_hygrolink_with_config(&config, &["decode", FRAME]);

    assert!(output.status.success());
    assert!(stdout(&output).contains("Temperature: 25.0°C (77.0°F)"));
    assert!(stderr(&output).contains("using defaults"));
}

// =============================================================================
// Completions
// =============================================================================

#[test]
fn test_bash_completions() {
    let output = run_hygrolink(&["completions", "bash"]);

    assert!(output.status.success());
    assert!(stdout(&output).contains("hygrolink"));
}
