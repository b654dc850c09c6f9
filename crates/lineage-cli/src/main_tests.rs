// crates/lineage-cli/src/main_tests.rs
// ============================================================================
// Module: CLI Main Helpers Tests
// Description: Unit tests for argument parsing and the offline store commands.
// Purpose: Ensure resolve and history share one durable store and fail closed.
// Dependencies: lineage-cli main helpers
// ============================================================================

//! ## Overview
//! Exercises the command helpers against a temporary `SQLite` store so the
//! results of separate invocations can be compared.

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

use std::path::Path;

use clap::Parser;
use lineage_config::LineageConfig;
use lineage_core::Interaction;
use serde_json::Value;
use tempfile::TempDir;

use super::Cli;
use super::CliError;
use super::Commands;
use super::ConfigCommand;
use super::history_listing;
use super::load_config;
use super::resolve_summary;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn sqlite_config(dir: &Path) -> LineageConfig {
    let db = dir.join("lineage.db");
    let content = format!(
        "[store]\ntype = \"sqlite\"\npath = \"{}\"\n\n[audit]\nsink = \"none\"\n",
        db.display()
    );
    let config = LineageConfig::parse(&content).unwrap();
    config.validate().unwrap();
    config
}

fn summary(config: &LineageConfig, interaction: &Interaction) -> Value {
    serde_json::from_str(&resolve_summary(config, interaction).unwrap()).unwrap()
}

// ============================================================================
// SECTION: Parsing
// ============================================================================

#[test]
fn resolve_requires_every_interaction_field() {
    let missing = Cli::try_parse_from(["lineage", "resolve", "--ip", "10.0.0.1"]);
    assert!(missing.is_err());

    let cli = Cli::try_parse_from([
        "lineage",
        "resolve",
        "--ip",
        "10.0.0.1",
        "--provider",
        "p",
        "--application",
        "a",
        "--config",
        "custom.toml",
    ])
    .unwrap();
    let Commands::Resolve(command) = cli.command else {
        panic!("expected resolve command");
    };
    assert_eq!(command.ip, "10.0.0.1");
    assert_eq!(command.config.config.as_deref(), Some(Path::new("custom.toml")));
}

#[test]
fn config_validate_parses_as_nested_subcommand() {
    let cli = Cli::try_parse_from(["lineage", "config", "validate"]).unwrap();
    let Commands::Config {
        command: ConfigCommand::Validate(args),
    } = cli.command
    else {
        panic!("expected config validate");
    };
    assert!(args.config.is_none());
}

// ============================================================================
// SECTION: Commands
// ============================================================================

#[test]
fn repeated_resolve_reuses_the_stored_visit() {
    let dir = TempDir::new().unwrap();
    let config = sqlite_config(dir.path());
    let interaction = Interaction::new("10.0.0.1", "acme", "portal");

    let first = summary(&config, &interaction);
    let second = summary(&config, &interaction);
    assert_eq!(first, second);
    assert!(first["group_id"].is_string());
    assert!(first["visit_id"].is_string());
}

#[test]
fn new_triple_joins_the_existing_group() {
    let dir = TempDir::new().unwrap();
    let config = sqlite_config(dir.path());

    let first = summary(&config, &Interaction::new("10.0.0.1", "acme", "portal"));
    let second = summary(&config, &Interaction::new("10.0.0.1", "acme", "billing"));
    assert_eq!(first["group_id"], second["group_id"]);
    assert_ne!(first["visit_id"], second["visit_id"]);

    let rows: Vec<Value> =
        serde_json::from_str(&history_listing(&config, "10.0.0.1").unwrap()).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["application"], "portal");
    assert_eq!(rows[1]["application"], "billing");
}

#[test]
fn history_for_unknown_ip_is_empty() {
    let dir = TempDir::new().unwrap();
    let config = sqlite_config(dir.path());
    let rows: Vec<Value> =
        serde_json::from_str(&history_listing(&config, "10.9.9.9").unwrap()).unwrap();
    assert!(rows.is_empty());
}

#[test]
fn blank_field_fails_resolution() {
    let dir = TempDir::new().unwrap();
    let config = sqlite_config(dir.path());
    let err = resolve_summary(&config, &Interaction::new("10.0.0.1", " ", "portal")).unwrap_err();
    assert!(matches!(err, CliError::Resolve(_)));
}

#[test]
fn in_memory_store_is_refused_by_resolve_and_history() {
    let config = LineageConfig::parse("[audit]\nsink = \"none\"\n").unwrap();
    config.validate().unwrap();

    let interaction = Interaction::new("10.0.0.1", "acme", "portal");
    let err = resolve_summary(&config, &interaction).unwrap_err();
    assert!(matches!(err, CliError::Config(_)));
    assert!(err.to_string().contains("store.type = \"sqlite\""));

    let err = history_listing(&config, "10.0.0.1").unwrap_err();
    assert!(matches!(err, CliError::Config(_)));
    assert!(err.to_string().contains("LINEAGE_STORE_PATH"));
}

#[test]
fn missing_config_file_reports_config_error() {
    let dir = TempDir::new().unwrap();
    let err = load_config(Some(&dir.path().join("absent.toml"))).unwrap_err();
    assert!(matches!(err, CliError::Config(_)));
    assert!(err.to_string().starts_with("config load failed"));
}
