// crates/lineage-cli/tests/cli_commands.rs
// ============================================================================
// Module: CLI Command Tests
// Description: Integration tests that run the `lineage` binary end to end.
// Purpose: Ensure exit codes and stdout/stderr contracts hold for each command.
// Dependencies: lineage-cli binary
// ============================================================================
//! ## Overview
//! Runs the compiled binary with a scrubbed `LINEAGE_*` environment against
//! temporary configuration and database files.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::process::Command;
use std::process::Output;

use serde_json::Value;
use tempfile::TempDir;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn lineage_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_lineage"))
}

fn run(dir: &Path, args: &[&str]) -> Output {
    Command::new(lineage_bin())
        .args(args)
        .current_dir(dir)
        .env_remove("LINEAGE_CONFIG")
        .env_remove("LINEAGE_BIND")
        .env_remove("LINEAGE_STORE_PATH")
        .env_remove("LINEAGE_MATCH_WINDOW_MINUTES")
        .output()
        .expect("run lineage")
}

fn write_sqlite_config(dir: &Path) -> PathBuf {
    let path = dir.join("lineage.toml");
    let content = format!(
        "[store]\ntype = \"sqlite\"\npath = \"{}\"\n\n[audit]\nsink = \"none\"\n",
        dir.join("lineage.db").display()
    );
    fs::write(&path, content).expect("write config");
    path
}

fn stdout_json(output: &Output) -> Value {
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    serde_json::from_slice(&output.stdout).expect("stdout json")
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[test]
fn config_validate_accepts_default_file_in_working_directory() {
    let dir = TempDir::new().unwrap();
    write_sqlite_config(dir.path());
    let output = run(dir.path(), &["config", "validate"]);
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.starts_with("config valid"));
    assert!(stdout.contains("lineage.toml"));
}

#[test]
fn config_validate_rejects_invalid_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bad.toml");
    fs::write(&path, "[matching]\nwindow_minutes = 0\n").unwrap();
    let output = run(dir.path(), &["config", "validate", "--config", path.to_str().unwrap()]);
    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.starts_with("config load failed"));
}

#[test]
fn resolve_then_history_share_the_durable_store() {
    let dir = TempDir::new().unwrap();
    let config = write_sqlite_config(dir.path());
    let config = config.to_str().unwrap();
    let args = [
        "resolve",
        "--ip",
        "192.0.2.7",
        "--provider",
        "acme",
        "--application",
        "portal",
        "--config",
        config,
    ];

    let first = stdout_json(&run(dir.path(), &args));
    let second = stdout_json(&run(dir.path(), &args));
    assert_eq!(first, second);

    let history =
        stdout_json(&run(dir.path(), &["history", "--ip", "192.0.2.7", "--config", config]));
    let rows = history.as_array().expect("history array");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["group_id"], first["group_id"]);
    assert_eq!(rows[0]["visit_id"], first["visit_id"]);
}

#[test]
fn history_with_default_memory_store_fails_closed() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("lineage.toml"), "[audit]\nsink = \"none\"\n").unwrap();
    let output = run(dir.path(), &["history", "--ip", "192.0.2.7"]);
    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("require store.type"));
}

#[test]
fn missing_subcommand_fails() {
    let dir = TempDir::new().unwrap();
    let output = run(dir.path(), &[]);
    assert!(!output.status.success());
}
