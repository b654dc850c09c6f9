// crates/lineage-cli/src/main.rs
// ============================================================================
// Module: Lineage CLI Entry Point
// Description: Command dispatcher for the Lineage identity resolver.
// Purpose: Run the HTTP server and offline store operations from one binary.
// Dependencies: clap, lineage-config, lineage-core, lineage-server, tokio.
// ============================================================================

//! ## Overview
//! The `lineage` binary serves the HTTP request collaborator, resolves a
//! single interaction against the configured store, lists a lineage's rows,
//! and validates configuration files. Every command loads configuration the
//! same way the server does, so environment overrides apply uniformly.
//! `resolve` and `history` need the durable `SQLite` store; an in-memory store
//! would not outlive the process. Output goes through explicit writers;
//! failures print one line to stderr and exit non-zero.

// ============================================================================
// SECTION: Modules
// ============================================================================

#[cfg(test)]
mod main_tests;

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use lineage_config::LineageConfig;
use lineage_config::StoreType;
use lineage_core::Clock;
use lineage_core::IdentifierGenerator;
use lineage_core::IdentityHistory;
use lineage_core::Interaction;
use lineage_core::MatchEngine;
use lineage_core::RandomIdGenerator;
use lineage_core::SharedIdentityStore;
use lineage_core::SystemClock;
use lineage_server::LineageServer;
use lineage_server::ServerEngine;
use lineage_server::build_identity_store;
use thiserror::Error;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "lineage", version, disable_help_subcommand = true)]
struct Cli {
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP identity resolver.
    Serve(ConfigArgs),
    /// Resolve one interaction against the configured store.
    Resolve(ResolveCommand),
    /// List every stored row for an IP, oldest first.
    History(HistoryCommand),
    /// Configuration utilities.
    Config {
        /// Selected config subcommand.
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

/// Shared `--config` argument.
#[derive(Args, Debug)]
struct ConfigArgs {
    /// Path to the configuration file (defaults to `LINEAGE_CONFIG`, then `lineage.toml`).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

/// Arguments for `resolve`.
#[derive(Args, Debug)]
struct ResolveCommand {
    /// Client IP address.
    #[arg(long, value_name = "IP")]
    ip: String,
    /// Provider label.
    #[arg(long, value_name = "PROVIDER")]
    provider: String,
    /// Application label.
    #[arg(long, value_name = "APPLICATION")]
    application: String,
    /// Configuration selection.
    #[command(flatten)]
    config: ConfigArgs,
}

/// Arguments for `history`.
#[derive(Args, Debug)]
struct HistoryCommand {
    /// Client IP address whose lineage is listed.
    #[arg(long, value_name = "IP")]
    ip: String,
    /// Configuration selection.
    #[command(flatten)]
    config: ConfigArgs,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Load and validate a configuration file.
    Validate(ConfigArgs),
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI failures, each rendered as a single stderr line.
#[derive(Debug, Error)]
enum CliError {
    /// Configuration could not be loaded or validated.
    #[error("config load failed: {0}")]
    Config(String),
    /// Store or server initialization failed.
    #[error("initialization failed: {0}")]
    Init(String),
    /// Resolution failed.
    #[error("resolve failed: {0}")]
    Resolve(String),
    /// Store listing failed.
    #[error("history failed: {0}")]
    History(String),
    /// The server stopped with an error.
    #[error("server failed: {0}")]
    Serve(String),
    /// Writing command output failed.
    #[error("failed to write {stream}: {error}")]
    Output {
        /// Stream label.
        stream: &'static str,
        /// Underlying I/O error text.
        error: String,
    },
}

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    match run(Cli::parse()).await {
        Ok(code) => code,
        Err(err) => emit_error(&err.to_string()),
    }
}

/// Executes the parsed command.
async fn run(cli: Cli) -> CliResult<ExitCode> {
    match cli.command {
        Commands::Serve(args) => command_serve(&args).await,
        Commands::Resolve(command) => command_resolve(&command),
        Commands::History(command) => command_history(&command),
        Commands::Config {
            command: ConfigCommand::Validate(args),
        } => command_config_validate(&args),
    }
}

// ============================================================================
// SECTION: Commands
// ============================================================================

/// Starts the HTTP server and blocks until it stops.
async fn command_serve(args: &ConfigArgs) -> CliResult<ExitCode> {
    let config = load_config(args.config.as_deref())?;
    let server = tokio::task::spawn_blocking(move || LineageServer::from_config(config))
        .await
        .map_err(|err| CliError::Init(format!("init join failed: {err}")))?
        .map_err(|err| CliError::Init(err.to_string()))?;
    server.serve().await.map_err(|err| CliError::Serve(err.to_string()))?;
    Ok(ExitCode::SUCCESS)
}

/// Resolves one interaction and prints its summary.
fn command_resolve(command: &ResolveCommand) -> CliResult<ExitCode> {
    let config = load_config(command.config.config.as_deref())?;
    let interaction =
        Interaction::new(command.ip.clone(), command.provider.clone(), command.application.clone());
    let output = resolve_summary(&config, &interaction)?;
    write_stdout_line(&output)?;
    Ok(ExitCode::SUCCESS)
}

/// Prints the rows stored for one IP.
fn command_history(command: &HistoryCommand) -> CliResult<ExitCode> {
    let config = load_config(command.config.config.as_deref())?;
    let output = history_listing(&config, &command.ip)?;
    write_stdout_line(&output)?;
    Ok(ExitCode::SUCCESS)
}

/// Loads configuration and reports where it came from.
fn command_config_validate(args: &ConfigArgs) -> CliResult<ExitCode> {
    let config = load_config(args.config.as_deref())?;
    let message = config.source_path.as_ref().map_or_else(
        || "config valid".to_string(),
        |path| format!("config valid: {}", path.display()),
    );
    write_stdout_line(&message)?;
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Loads and validates configuration.
fn load_config(path: Option<&Path>) -> CliResult<LineageConfig> {
    LineageConfig::load(path).map_err(|err| CliError::Config(err.to_string()))
}

/// Opens the configured store, refusing the in-memory store.
///
/// Each CLI invocation is its own process, so an in-memory store would start
/// empty every time and report a fresh lineage for every resolve.
fn open_durable_store(config: &LineageConfig) -> CliResult<SharedIdentityStore> {
    if config.store.store_type != StoreType::Sqlite {
        return Err(CliError::Config(
            "resolve and history require store.type = \"sqlite\" or LINEAGE_STORE_PATH"
                .to_string(),
        ));
    }
    build_identity_store(config).map_err(|err| CliError::Init(err.to_string()))
}

/// Builds an engine over the durable store with production generator and clock.
fn build_engine(config: &LineageConfig) -> CliResult<ServerEngine> {
    let store = open_durable_store(config)?;
    Ok(MatchEngine::new(
        store,
        Arc::new(RandomIdGenerator) as Arc<dyn IdentifierGenerator + Send + Sync>,
        Arc::new(SystemClock) as Arc<dyn Clock + Send + Sync>,
        config.engine_config(),
    ))
}

/// Resolves `interaction` and renders the summary as a JSON object.
fn resolve_summary(config: &LineageConfig, interaction: &Interaction) -> CliResult<String> {
    let engine = build_engine(config)?;
    let resolution =
        engine.resolve(interaction).map_err(|err| CliError::Resolve(err.to_string()))?;
    serde_json::to_string(&resolution.summary()).map_err(|err| CliError::Resolve(err.to_string()))
}

/// Renders every row stored for `ip` as a pretty JSON array.
fn history_listing(config: &LineageConfig, ip: &str) -> CliResult<String> {
    let store = open_durable_store(config)?;
    let rows = store.history(ip).map_err(|err| CliError::History(err.to_string()))?;
    serde_json::to_string_pretty(&rows).map_err(|err| CliError::History(err.to_string()))
}

/// Writes one line to stdout.
fn write_stdout_line(message: &str) -> CliResult<()> {
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{message}").map_err(|err| CliError::Output {
        stream: "stdout",
        error: err.to_string(),
    })
}

/// Emits an error message to stderr and returns a failure exit code.
fn emit_error(message: &str) -> ExitCode {
    let mut stderr = std::io::stderr();
    let _ = writeln!(&mut stderr, "{message}");
    ExitCode::FAILURE
}
