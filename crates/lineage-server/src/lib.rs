// crates/lineage-server/src/lib.rs
// ============================================================================
// Module: Lineage Server Library
// Description: HTTP request collaborator for identity resolution.
// Purpose: Map HTTP requests onto the match engine and emit audit events.
// Dependencies: axum, lineage-config, lineage-core, tokio
// ============================================================================

//! ## Overview
//! `lineage-server` exposes [`lineage_core::MatchEngine`] over HTTP. A single
//! `POST` route accepts `{ip, provider, application}` and answers with
//! `{group_id, visit_id}`; `/healthz` and `/readyz` serve probes. Every
//! resolve request produces one structured audit event.
//!
//! Security posture: request bodies are untrusted, size-limited, and
//! validated before any store access.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod audit;
pub mod server;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use audit::AuditSink;
pub use audit::FileAuditSink;
pub use audit::NoopAuditSink;
pub use audit::ResolutionAuditEvent;
pub use audit::ResolutionAuditEventParams;
pub use audit::ServerAuditEvent;
pub use audit::StderrAuditSink;
pub use server::LineageServer;
pub use server::ServerEngine;
pub use server::ServerError;
pub use server::ServerState;
pub use server::build_audit_sink;
pub use server::build_identity_store;
