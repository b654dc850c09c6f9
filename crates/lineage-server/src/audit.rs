// crates/lineage-server/src/audit.rs
// ============================================================================
// Module: Lineage Audit Logging
// Description: Structured audit events for resolve requests and lifecycle.
// Purpose: Emit JSON-line audit logs without a logging framework dependency.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! This module defines audit event payloads and sinks. Events serialize to
//! one JSON object per line so deployments can route them to their preferred
//! pipeline. Interaction provider and application values are never logged;
//! only the IP and the decision labels are.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Serialize;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Audit event emitted once per resolve request.
#[derive(Debug, Clone, Serialize)]
pub struct ResolutionAuditEvent {
    /// Event identifier.
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: u128,
    /// Peer socket IP of the caller.
    pub peer_ip: Option<String>,
    /// Interaction IP when the body decoded.
    pub ip: Option<String>,
    /// Resolution outcome label on success.
    pub outcome: Option<&'static str>,
    /// Whether a new row was stored, on success.
    pub created: Option<bool>,
    /// Error kind label on failure.
    pub error_kind: Option<&'static str>,
    /// Failing resolution level, when known.
    pub level: Option<&'static str>,
    /// HTTP status code returned.
    pub status: u16,
    /// True when the worker finished after the caller already got a response.
    pub late: bool,
    /// Handler latency in milliseconds.
    pub latency_ms: u128,
}

/// Inputs required to construct a resolution audit event.
#[derive(Debug, Clone, Default)]
pub struct ResolutionAuditEventParams {
    /// Peer socket IP of the caller.
    pub peer_ip: Option<String>,
    /// Interaction IP when the body decoded.
    pub ip: Option<String>,
    /// Resolution outcome label on success.
    pub outcome: Option<&'static str>,
    /// Whether a new row was stored, on success.
    pub created: Option<bool>,
    /// Error kind label on failure.
    pub error_kind: Option<&'static str>,
    /// Failing resolution level, when known.
    pub level: Option<&'static str>,
    /// HTTP status code returned.
    pub status: u16,
    /// True when the worker finished after the caller already got a response.
    pub late: bool,
    /// Handler latency in milliseconds.
    pub latency_ms: u128,
}

impl ResolutionAuditEvent {
    /// Creates a new audit event with a consistent timestamp.
    #[must_use]
    pub fn new(params: ResolutionAuditEventParams) -> Self {
        Self {
            event: "identity_resolution",
            timestamp_ms: now_ms(),
            peer_ip: params.peer_ip,
            ip: params.ip,
            outcome: params.outcome,
            created: params.created,
            error_kind: params.error_kind,
            level: params.level,
            status: params.status,
            late: params.late,
            latency_ms: params.latency_ms,
        }
    }
}

/// Lifecycle audit event (startup, bind, store readiness).
#[derive(Debug, Clone, Serialize)]
pub struct ServerAuditEvent {
    /// Event identifier.
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: u128,
    /// Lifecycle event kind.
    pub kind: &'static str,
    /// Optional detail message.
    pub message: Option<String>,
}

impl ServerAuditEvent {
    /// Creates a new lifecycle event with a consistent timestamp.
    #[must_use]
    pub fn new(kind: &'static str, message: Option<String>) -> Self {
        Self {
            event: "server_lifecycle",
            timestamp_ms: now_ms(),
            kind,
            message,
        }
    }
}

/// Returns milliseconds since the unix epoch, or zero before it.
fn now_ms() -> u128 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis()
}

// ============================================================================
// SECTION: Trait
// ============================================================================

/// Audit sink for server events.
pub trait AuditSink: Send + Sync {
    /// Record a resolve request event.
    fn record_resolution(&self, event: &ResolutionAuditEvent);

    /// Record a lifecycle event.
    fn record_server(&self, _event: &ServerAuditEvent) {}
}

/// Audit sink that logs JSON lines to stderr.
#[derive(Debug, Clone, Copy, Default)]
pub struct StderrAuditSink;

impl AuditSink for StderrAuditSink {
    fn record_resolution(&self, event: &ResolutionAuditEvent) {
        write_json_line(&mut io::stderr(), event);
    }

    fn record_server(&self, event: &ServerAuditEvent) {
        write_json_line(&mut io::stderr(), event);
    }
}

/// Audit sink that appends JSON lines to a file.
#[derive(Debug)]
pub struct FileAuditSink {
    /// File handle used for append-only logging.
    file: Mutex<File>,
}

impl FileAuditSink {
    /// Opens the audit log file in append mode, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn new(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    /// Appends one serialized event.
    fn append<T: Serialize>(&self, event: &T) {
        if let Ok(mut file) = self.file.lock() {
            write_json_line(&mut *file, event);
            let _ = file.flush();
        }
    }
}

impl AuditSink for FileAuditSink {
    fn record_resolution(&self, event: &ResolutionAuditEvent) {
        self.append(event);
    }

    fn record_server(&self, event: &ServerAuditEvent) {
        self.append(event);
    }
}

/// No-op audit sink.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record_resolution(&self, _event: &ResolutionAuditEvent) {}
}

/// Serializes `event` and writes it as one line; failures are dropped.
fn write_json_line<W: Write, T: Serialize>(writer: &mut W, event: &T) {
    if let Ok(payload) = serde_json::to_string(event) {
        let _ = writeln!(writer, "{payload}");
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
