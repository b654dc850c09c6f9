// crates/lineage-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Identity Store
// Description: Durable IdentityStore backed by SQLite WAL.
// Purpose: Persist identity rows with indexed lineage and window lookups.
// Dependencies: lineage-core, rusqlite, serde, thiserror
// ============================================================================

//! ## Overview
//! This module implements a durable [`IdentityStore`] using `SQLite`. The
//! `identities` table is created on first open and versioned through a
//! `store_meta` table. Lookups are single indexed queries ordered by
//! `created_at` then `row_key`; inserts run inside a transaction so a failed
//! insert leaves no row.
//!
//! Error mapping: uniqueness violations surface as [`StoreError::Conflict`],
//! busy or locked databases (after `busy_timeout_ms`) surface as
//! [`StoreError::Timeout`], everything else as [`StoreError::Store`].
//! Security posture: database contents are untrusted and decoded strictly.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::time::Duration;

use lineage_core::GroupId;
use lineage_core::Identity;
use lineage_core::IdentityHistory;
use lineage_core::IdentityStore;
use lineage_core::NewIdentity;
use lineage_core::RowKey;
use lineage_core::StoreError;
use lineage_core::Timestamp;
use lineage_core::VisitId;
use rusqlite::Connection;
use rusqlite::ErrorCode;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::Row;
use rusqlite::params;
use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// `SQLite` schema version for the store.
pub const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Column list shared by every row query.
const IDENTITY_COLUMNS: &str =
    "row_key, group_id, visit_id, ip, provider, application, created_at";

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` journal mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `journal_mode` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteStoreMode {
    /// WAL journal mode (recommended).
    #[default]
    Wal,
    /// Delete journal mode (legacy).
    Delete,
}

impl SqliteStoreMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// `SQLite` sync mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `synchronous` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode (safest).
    #[default]
    Full,
    /// Normal synchronous mode (balanced).
    Normal,
}

impl SqliteSyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Configuration for the `SQLite` identity store.
///
/// # Invariants
/// - `path` must resolve to a file path (not a directory).
/// - `busy_timeout_ms` bounds how long a store call waits on a locked database.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SqliteStoreConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
}

impl SqliteStoreConfig {
    /// Creates a configuration for `path` with default pragmas.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            journal_mode: SqliteStoreMode::default(),
            sync_mode: SqliteSyncMode::default(),
        }
    }
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// `SQLite` store errors.
///
/// # Invariants
/// - Error messages avoid embedding stored row contents.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SqliteStoreError {
    /// Store I/O error.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// Database stayed busy or locked past the busy timeout.
    #[error("sqlite store busy: {0}")]
    Busy(String),
    /// Uniqueness constraint violation.
    #[error("sqlite store constraint violation: {0}")]
    Conflict(String),
    /// Store schema version mismatch.
    #[error("sqlite store version mismatch: {0}")]
    VersionMismatch(String),
    /// Invalid store data or configuration.
    #[error("sqlite store invalid data: {0}")]
    Invalid(String),
}

impl From<SqliteStoreError> for StoreError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Io(message) => Self::Io(message),
            SqliteStoreError::Db(message) => Self::Store(message),
            SqliteStoreError::Busy(message) => Self::Timeout(message),
            SqliteStoreError::Conflict(message) => Self::Conflict(message),
            SqliteStoreError::VersionMismatch(message) => {
                Self::Store(format!("schema version mismatch: {message}"))
            }
            SqliteStoreError::Invalid(message) => Self::Invalid(message),
        }
    }
}

/// Classifies a `rusqlite` error.
fn db_error(err: rusqlite::Error) -> SqliteStoreError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == ErrorCode::ConstraintViolation =>
        {
            SqliteStoreError::Conflict(err.to_string())
        }
        rusqlite::Error::SqliteFailure(failure, _)
            if matches!(failure.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) =>
        {
            SqliteStoreError::Busy(err.to_string())
        }
        _ => SqliteStoreError::Db(err.to_string()),
    }
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// `SQLite`-backed identity store with WAL support.
///
/// # Invariants
/// - `SQLite` connection access is serialized through a mutex.
/// - Rows are only ever inserted; no statement updates or deletes them.
#[derive(Clone)]
pub struct SqliteIdentityStore {
    /// Store configuration.
    config: SqliteStoreConfig,
    /// Shared connection guarded by a mutex.
    connection: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteIdentityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteIdentityStore")
            .field("path", &self.config.path)
            .finish_non_exhaustive()
    }
}

impl SqliteIdentityStore {
    /// Opens an `SQLite`-backed identity store, creating the schema if needed.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the path is unsafe or the database
    /// cannot be opened or initialized.
    pub fn new(config: SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        validate_store_path(&config.path)?;
        ensure_parent_dir(&config.path)?;
        let mut connection = open_connection(&config)?;
        initialize_schema(&mut connection)?;
        Ok(Self {
            config,
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Returns the store configuration.
    #[must_use]
    pub const fn config(&self) -> &SqliteStoreConfig {
        &self.config
    }

    /// Returns the total number of stored rows.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the query fails.
    pub fn row_count(&self) -> Result<u64, SqliteStoreError> {
        let guard = self.lock()?;
        let count: i64 = guard
            .query_row("SELECT COUNT(1) FROM identities", params![], |row| row.get(0))
            .map_err(db_error)?;
        drop(guard);
        u64::try_from(count)
            .map_err(|_| SqliteStoreError::Invalid("negative row count".to_string()))
    }

    /// Locks the shared connection.
    fn lock(&self) -> Result<MutexGuard<'_, Connection>, SqliteStoreError> {
        self.connection
            .lock()
            .map_err(|_| SqliteStoreError::Io("sqlite connection mutex poisoned".to_string()))
    }

    /// Runs a query expected to return at most one row.
    fn query_optional(
        &self,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Option<Identity>, SqliteStoreError> {
        let guard = self.lock()?;
        let mut stmt = guard.prepare_cached(sql).map_err(db_error)?;
        let row = stmt.query_row(params, decode_row).optional().map_err(db_error)?;
        drop(stmt);
        drop(guard);
        row.map(Identity::try_from).transpose()
    }

    /// Inserts a row in its own transaction and returns it with its key.
    fn insert_row(&self, identity: NewIdentity) -> Result<Identity, SqliteStoreError> {
        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(db_error)?;
        tx.execute(
            "INSERT INTO identities (group_id, visit_id, ip, provider, application, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                identity.group_id.as_str(),
                identity.visit_id.as_str(),
                identity.ip,
                identity.provider,
                identity.application,
                identity.created_at.as_unix_millis(),
            ],
        )
        .map_err(db_error)?;
        let row_key = tx.last_insert_rowid();
        tx.commit().map_err(db_error)?;
        drop(guard);
        Ok(identity.into_identity(RowKey::from_raw(row_key)))
    }

    /// Verifies the store can execute a simple SQL statement.
    fn check_connection(&self) -> Result<(), SqliteStoreError> {
        let guard = self.lock()?;
        guard.query_row("SELECT 1", params![], |row| row.get::<_, i64>(0)).map_err(db_error)?;
        drop(guard);
        Ok(())
    }
}

impl IdentityStore for SqliteIdentityStore {
    fn find_latest_by_ip(&self, ip: &str) -> Result<Option<Identity>, StoreError> {
        let sql = format!(
            "SELECT {IDENTITY_COLUMNS} FROM identities WHERE ip = ?1
             ORDER BY created_at DESC, row_key DESC LIMIT 1"
        );
        self.query_optional(&sql, &[&ip]).map_err(StoreError::from)
    }

    fn find_latest_within_window(
        &self,
        ip: &str,
        provider: &str,
        application: &str,
        not_before: Timestamp,
    ) -> Result<Option<Identity>, StoreError> {
        let sql = format!(
            "SELECT {IDENTITY_COLUMNS} FROM identities
             WHERE ip = ?1 AND provider = ?2 AND application = ?3 AND created_at >= ?4
             ORDER BY created_at DESC, row_key DESC LIMIT 1"
        );
        let not_before = not_before.as_unix_millis();
        self.query_optional(&sql, &[&ip, &provider, &application, &not_before])
            .map_err(StoreError::from)
    }

    fn insert(&self, identity: NewIdentity) -> Result<Identity, StoreError> {
        self.insert_row(identity).map_err(StoreError::from)
    }

    fn readiness(&self) -> Result<(), StoreError> {
        self.check_connection().map_err(StoreError::from)
    }
}

impl IdentityHistory for SqliteIdentityStore {
    fn history(&self, ip: &str) -> Result<Vec<Identity>, StoreError> {
        let sql =
            format!("SELECT {IDENTITY_COLUMNS} FROM identities WHERE ip = ?1 ORDER BY row_key ASC");
        let guard = self.lock()?;
        let mut stmt = guard.prepare_cached(&sql).map_err(db_error)?;
        let rows = stmt
            .query_map(params![ip], decode_row)
            .map_err(db_error)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_error)?;
        drop(stmt);
        drop(guard);
        rows.into_iter()
            .map(|row| Identity::try_from(row).map_err(StoreError::from))
            .collect()
    }
}

// ============================================================================
// SECTION: Row Decoding
// ============================================================================

/// Raw column values for one identity row.
struct StoredRow {
    /// `row_key` column.
    row_key: i64,
    /// `group_id` column.
    group_id: String,
    /// `visit_id` column.
    visit_id: String,
    /// `ip` column.
    ip: String,
    /// `provider` column.
    provider: String,
    /// `application` column.
    application: String,
    /// `created_at` column (unix millis).
    created_at: i64,
}

/// Reads raw column values in [`IDENTITY_COLUMNS`] order.
fn decode_row(row: &Row<'_>) -> rusqlite::Result<StoredRow> {
    Ok(StoredRow {
        row_key: row.get(0)?,
        group_id: row.get(1)?,
        visit_id: row.get(2)?,
        ip: row.get(3)?,
        provider: row.get(4)?,
        application: row.get(5)?,
        created_at: row.get(6)?,
    })
}

impl TryFrom<StoredRow> for Identity {
    type Error = SqliteStoreError;

    fn try_from(row: StoredRow) -> Result<Self, Self::Error> {
        if row.group_id.is_empty() || row.visit_id.is_empty() {
            return Err(SqliteStoreError::Invalid(format!(
                "row {} has an empty identifier",
                row.row_key
            )));
        }
        Ok(Self {
            row_key: RowKey::from_raw(row.row_key),
            group_id: GroupId::new(row.group_id),
            visit_id: VisitId::new(row.visit_id),
            ip: row.ip,
            provider: row.provider,
            application: row.application,
            created_at: Timestamp::from_unix_millis(row.created_at),
        })
    }
}

// ============================================================================
// SECTION: Connection Setup
// ============================================================================

/// Creates the parent directory for the store file.
fn ensure_parent_dir(path: &Path) -> Result<(), SqliteStoreError> {
    let Some(parent) = path.parent() else {
        return Err(SqliteStoreError::Io("store path missing parent directory".to_string()));
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(parent).map_err(|err| SqliteStoreError::Io(err.to_string()))
}

/// Validates store paths for safety limits.
fn validate_store_path(path: &Path) -> Result<(), SqliteStoreError> {
    if path.as_os_str().is_empty() {
        return Err(SqliteStoreError::Invalid("store path must not be empty".to_string()));
    }
    let path_string = path.display().to_string();
    if path_string.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(SqliteStoreError::Invalid("store path exceeds length limit".to_string()));
    }
    for component in path.components() {
        let name = component.as_os_str().to_string_lossy();
        if name.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(SqliteStoreError::Invalid(
                "store path contains an overlong component".to_string(),
            ));
        }
    }
    if path.is_dir() {
        return Err(SqliteStoreError::Invalid(
            "store path must be a file, not a directory".to_string(),
        ));
    }
    Ok(())
}

/// Opens an `SQLite` connection with secure defaults.
fn open_connection(config: &SqliteStoreConfig) -> Result<Connection, SqliteStoreError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let connection = Connection::open_with_flags(&config.path, flags).map_err(db_error)?;
    apply_pragmas(&connection, config)?;
    Ok(connection)
}

/// Applies `SQLite` pragmas required for durability.
fn apply_pragmas(
    connection: &Connection,
    config: &SqliteStoreConfig,
) -> Result<(), SqliteStoreError> {
    connection
        .execute_batch(&format!("PRAGMA journal_mode = {};", config.journal_mode.pragma_value()))
        .map_err(db_error)?;
    connection
        .execute_batch(&format!("PRAGMA synchronous = {};", config.sync_mode.pragma_value()))
        .map_err(db_error)?;
    connection.busy_timeout(Duration::from_millis(config.busy_timeout_ms)).map_err(db_error)?;
    Ok(())
}

/// Initializes the `SQLite` schema or validates the existing version.
fn initialize_schema(connection: &mut Connection) -> Result<(), SqliteStoreError> {
    let tx = connection.transaction().map_err(db_error)?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);")
        .map_err(db_error)?;
    let version: Option<i64> = tx
        .query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| row.get(0))
        .optional()
        .map_err(db_error)?;
    match version {
        None => {
            tx.execute("INSERT INTO store_meta (version) VALUES (?1)", params![SCHEMA_VERSION])
                .map_err(db_error)?;
            tx.execute_batch(
                "CREATE TABLE IF NOT EXISTS identities (
                    row_key INTEGER PRIMARY KEY AUTOINCREMENT,
                    group_id TEXT NOT NULL,
                    visit_id TEXT NOT NULL UNIQUE,
                    ip TEXT NOT NULL,
                    provider TEXT NOT NULL,
                    application TEXT NOT NULL,
                    created_at INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_identities_ip_created
                    ON identities (ip, created_at);
                CREATE INDEX IF NOT EXISTS idx_identities_triple_created
                    ON identities (ip, provider, application, created_at);",
            )
            .map_err(db_error)?;
        }
        Some(value) if value == SCHEMA_VERSION => {}
        Some(value) => {
            return Err(SqliteStoreError::VersionMismatch(format!(
                "unsupported schema version: {value}"
            )));
        }
    }
    tx.commit().map_err(db_error)?;
    Ok(())
}
