// crates/lineage-config/src/config.rs
// ============================================================================
// Module: Lineage Configuration
// Description: Configuration loading and validation for the lineage resolver.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: lineage-core, lineage-store-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size and path limits.
//! A missing `--config` argument falls back to `LINEAGE_CONFIG`, then to
//! `lineage.toml` in the working directory. Environment overrides are applied
//! after parsing and before validation, so an override can never smuggle in a
//! value the file itself could not hold.
//! Security posture: config inputs are untrusted.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::ffi::OsString;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use lineage_core::MatchEngineConfig;
use lineage_store_sqlite::SqliteStoreConfig;
use lineage_store_sqlite::SqliteStoreMode;
use lineage_store_sqlite::SqliteSyncMode;
use serde::Deserialize;
use thiserror::Error;

use crate::env::EnvOverride;
use crate::env::parse_positive;
use crate::env::process_env;
use crate::env::read_nonempty;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "lineage.toml";
/// Maximum configuration file size in bytes.
pub(crate) const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
pub(crate) const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
pub(crate) const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Default listen address.
pub(crate) const DEFAULT_BIND: &str = "127.0.0.1:4000";
/// Default resolve route.
pub(crate) const DEFAULT_ROUTE: &str = "/identities";
/// Maximum route length.
pub(crate) const MAX_ROUTE_LENGTH: usize = 256;
/// Routes reserved for probes.
pub(crate) const RESERVED_ROUTES: [&str; 2] = ["/healthz", "/readyz"];
/// Default maximum request body size in bytes.
pub(crate) const DEFAULT_MAX_BODY_BYTES: usize = 16 * 1024;
/// Maximum allowed request body size in bytes.
pub(crate) const MAX_MAX_BODY_BYTES: usize = 1024 * 1024;
/// Default end-to-end request timeout in milliseconds.
pub(crate) const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
/// Default matching window in minutes.
pub(crate) const DEFAULT_WINDOW_MINUTES: u64 = 120;
/// Maximum matching window in minutes (one year).
pub(crate) const MAX_WINDOW_MINUTES: u64 = 525_600;
/// Default gate acquisition timeout in milliseconds.
pub(crate) const DEFAULT_GATE_TIMEOUT_MS: u64 = 2_000;
/// Default store call timeout in milliseconds.
pub(crate) const DEFAULT_STORE_TIMEOUT_MS: u64 = 5_000;
/// Maximum allowed value for any millisecond timeout (ten minutes).
pub(crate) const MAX_TIMEOUT_MS: u64 = 600_000;

// ============================================================================
// SECTION: Configuration Types
// ============================================================================

/// Lineage resolver service configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct LineageConfig {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Matching policy configuration.
    #[serde(default)]
    pub matching: MatchingConfig,
    /// Latency bounds for the match engine.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Identity store configuration.
    #[serde(default)]
    pub store: StoreConfig,
    /// Audit sink configuration.
    #[serde(default)]
    pub audit: AuditConfig,
    /// Path the configuration was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl LineageConfig {
    /// Loads configuration from disk using the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading, overriding, or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(path, process_env)
    }

    /// Loads configuration from disk, reading environment values via `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading, overriding, or validation fails.
    pub fn load_with_env<F>(path: Option<&Path>, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<OsString>,
    {
        let resolved = resolve_path(path, &lookup)?;
        validate_path(&resolved)?;
        let bytes = fs::read(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        let mut config = Self::parse(content)?;
        config.source_path = Some(resolved);
        config.apply_env_overrides(&lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Parses TOML text without applying overrides or validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the text is not valid config TOML.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Applies `LINEAGE_*` overrides read through `lookup`.
    ///
    /// `LINEAGE_STORE_PATH` also switches the store type to sqlite.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when a set variable is blank,
    /// non-UTF-8, or unparseable.
    pub fn apply_env_overrides<F>(&mut self, lookup: &F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<OsString>,
    {
        if let Some(bind) = read_nonempty(lookup, EnvOverride::Bind)? {
            self.server.bind = bind;
        }
        if let Some(path) = read_nonempty(lookup, EnvOverride::StorePath)? {
            self.store.store_type = StoreType::Sqlite;
            self.store.path = Some(PathBuf::from(path));
        }
        if let Some(raw) = read_nonempty(lookup, EnvOverride::MatchWindowMinutes)? {
            self.matching.window_minutes = parse_positive(EnvOverride::MatchWindowMinutes, &raw)?;
        }
        Ok(())
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.matching.validate()?;
        self.timeouts.validate()?;
        self.store.validate()?;
        self.audit.validate()?;
        Ok(())
    }

    /// Returns the match engine configuration derived from this config.
    #[must_use]
    pub const fn engine_config(&self) -> MatchEngineConfig {
        MatchEngineConfig {
            match_window: self.matching.window(),
            gate_timeout: Duration::from_millis(self.timeouts.gate_timeout_ms),
            store_timeout: Duration::from_millis(self.timeouts.store_timeout_ms),
        }
    }

    /// Returns the `SQLite` store configuration when the sqlite store is selected.
    ///
    /// The busy timeout falls back to `timeouts.store_timeout_ms` when unset.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the sqlite store has no path.
    pub fn sqlite_store_config(&self) -> Result<Option<SqliteStoreConfig>, ConfigError> {
        match self.store.store_type {
            StoreType::Memory => Ok(None),
            StoreType::Sqlite => {
                let path = self.store.path.clone().ok_or_else(|| {
                    ConfigError::Invalid("sqlite store requires path".to_string())
                })?;
                Ok(Some(SqliteStoreConfig {
                    path,
                    busy_timeout_ms: self
                        .store
                        .busy_timeout_ms
                        .unwrap_or(self.timeouts.store_timeout_ms),
                    journal_mode: self.store.journal_mode,
                    sync_mode: self.store.sync_mode,
                }))
            }
        }
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Listen address (`host:port`).
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Route accepting resolve requests.
    #[serde(default = "default_route")]
    pub route: String,
    /// Maximum request body size in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// End-to-end bound on a single resolve request in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            route: default_route(),
            max_body_bytes: default_max_body_bytes(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl ServerConfig {
    /// Parses the configured listen address.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when `bind` is not a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind.trim().parse().map_err(|_| {
            ConfigError::Invalid(format!("server.bind is not a socket address: {}", self.bind))
        })
    }

    /// Returns the request timeout as a duration.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Validates server configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        self.bind_addr()?;
        if !self.route.starts_with('/') {
            return Err(ConfigError::Invalid("server.route must start with '/'".to_string()));
        }
        if self.route.len() > MAX_ROUTE_LENGTH {
            return Err(ConfigError::Invalid("server.route exceeds max length".to_string()));
        }
        if RESERVED_ROUTES.contains(&self.route.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "server.route must not shadow probe route {}",
                self.route
            )));
        }
        if self.max_body_bytes == 0 {
            return Err(ConfigError::Invalid(
                "server.max_body_bytes must be greater than zero".to_string(),
            ));
        }
        if self.max_body_bytes > MAX_MAX_BODY_BYTES {
            return Err(ConfigError::Invalid(format!(
                "server.max_body_bytes must be <= {MAX_MAX_BODY_BYTES}"
            )));
        }
        validate_timeout_ms("server.request_timeout_ms", self.request_timeout_ms)
    }
}

/// Matching policy configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct MatchingConfig {
    /// Trailing window within which a triple match is reused, in minutes.
    #[serde(default = "default_window_minutes")]
    pub window_minutes: u64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            window_minutes: default_window_minutes(),
        }
    }
}

impl MatchingConfig {
    /// Returns the matching window as a duration.
    #[must_use]
    pub const fn window(&self) -> Duration {
        Duration::from_secs(self.window_minutes.saturating_mul(60))
    }

    /// Validates matching configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.window_minutes == 0 {
            return Err(ConfigError::Invalid(
                "matching.window_minutes must be greater than zero".to_string(),
            ));
        }
        if self.window_minutes > MAX_WINDOW_MINUTES {
            return Err(ConfigError::Invalid(format!(
                "matching.window_minutes must be <= {MAX_WINDOW_MINUTES}"
            )));
        }
        Ok(())
    }
}

/// Latency bounds for gate acquisition and store calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct TimeoutConfig {
    /// Maximum wait for per-IP gate ownership, in milliseconds.
    #[serde(default = "default_gate_timeout_ms")]
    pub gate_timeout_ms: u64,
    /// Maximum latency of a single store call, in milliseconds.
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            gate_timeout_ms: default_gate_timeout_ms(),
            store_timeout_ms: default_store_timeout_ms(),
        }
    }
}

impl TimeoutConfig {
    /// Validates timeout configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        validate_timeout_ms("timeouts.gate_timeout_ms", self.gate_timeout_ms)?;
        validate_timeout_ms("timeouts.store_timeout_ms", self.store_timeout_ms)
    }
}

/// Identity store configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct StoreConfig {
    /// Store backend type.
    #[serde(rename = "type", default)]
    pub store_type: StoreType,
    /// `SQLite` database path when using the sqlite backend.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Busy timeout in milliseconds; defaults to `timeouts.store_timeout_ms`.
    #[serde(default)]
    pub busy_timeout_ms: Option<u64>,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// `SQLite` synchronous mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
}

impl StoreConfig {
    /// Validates store configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        match self.store_type {
            StoreType::Memory => {
                if self.path.is_some() {
                    return Err(ConfigError::Invalid(
                        "memory store must not set path".to_string(),
                    ));
                }
                Ok(())
            }
            StoreType::Sqlite => {
                let path = self.path.as_ref().ok_or_else(|| {
                    ConfigError::Invalid("sqlite store requires path".to_string())
                })?;
                validate_path_string("store.path", &path.to_string_lossy())?;
                if let Some(busy) = self.busy_timeout_ms {
                    validate_timeout_ms("store.busy_timeout_ms", busy)?;
                }
                Ok(())
            }
        }
    }
}

/// Identity store backend type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreType {
    /// Use the in-memory store.
    #[default]
    Memory,
    /// Use the `SQLite`-backed durable store.
    Sqlite,
}

/// Audit sink configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AuditConfig {
    /// Sink receiving audit events.
    #[serde(default)]
    pub sink: AuditSinkType,
    /// Audit log path (JSON lines) for the file sink.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl AuditConfig {
    /// Validates audit configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        match (self.sink, &self.path) {
            (AuditSinkType::File, None) => {
                Err(ConfigError::Invalid("file audit sink requires audit.path".to_string()))
            }
            (AuditSinkType::File, Some(path)) => {
                validate_path_string("audit.path", &path.to_string_lossy())
            }
            (AuditSinkType::Stderr | AuditSinkType::None, Some(_)) => Err(ConfigError::Invalid(
                "audit.path is only valid with the file sink".to_string(),
            )),
            (AuditSinkType::Stderr | AuditSinkType::None, None) => Ok(()),
        }
    }
}

/// Audit sink selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuditSinkType {
    /// JSON lines on stderr.
    #[default]
    Stderr,
    /// JSON lines appended to `audit.path`.
    File,
    /// Discard audit events.
    None,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Resolves the config path from CLI or environment defaults.
fn resolve_path<F>(path: Option<&Path>, lookup: &F) -> Result<PathBuf, ConfigError>
where
    F: Fn(&str) -> Option<OsString>,
{
    if let Some(path) = path {
        return Ok(path.to_path_buf());
    }
    if let Some(env_path) = read_nonempty(lookup, EnvOverride::Config)? {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok(PathBuf::from(env_path));
    }
    Ok(PathBuf::from(DEFAULT_CONFIG_NAME))
}

/// Validates the resolved path against security limits.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    let text = path.to_string_lossy();
    if text.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
    }
    for component in path.components() {
        let value = component.as_os_str().to_string_lossy();
        if value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid("config path component too long".to_string()));
        }
    }
    Ok(())
}

/// Validates a path string against length constraints.
fn validate_path_string(field: &str, value: &str) -> Result<(), ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Invalid(format!("{field} must be non-empty")));
    }
    if trimmed.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid(format!("{field} exceeds max length")));
    }
    for component in Path::new(trimmed).components() {
        let component_value = component.as_os_str().to_string_lossy();
        if component_value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid(format!("{field} path component too long")));
        }
    }
    Ok(())
}

/// Validates a millisecond timeout is non-zero and bounded.
fn validate_timeout_ms(field: &str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid(format!("{field} must be greater than zero")));
    }
    if value > MAX_TIMEOUT_MS {
        return Err(ConfigError::Invalid(format!("{field} must be <= {MAX_TIMEOUT_MS}")));
    }
    Ok(())
}

/// Returns the default listen address.
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}

/// Returns the default resolve route.
fn default_route() -> String {
    DEFAULT_ROUTE.to_string()
}

/// Returns the default maximum request body size.
const fn default_max_body_bytes() -> usize {
    DEFAULT_MAX_BODY_BYTES
}

/// Returns the default request timeout.
const fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

/// Returns the default matching window.
const fn default_window_minutes() -> u64 {
    DEFAULT_WINDOW_MINUTES
}

/// Returns the default gate timeout.
const fn default_gate_timeout_ms() -> u64 {
    DEFAULT_GATE_TIMEOUT_MS
}

/// Returns the default store timeout.
const fn default_store_timeout_ms() -> u64 {
    DEFAULT_STORE_TIMEOUT_MS
}

// ============================================================================
// SECTION: Tests
// ============================================================================
