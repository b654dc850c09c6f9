// crates/lineage-server/src/server.rs
// ============================================================================
// Module: Lineage HTTP Server
// Description: HTTP request collaborator for the lineage match engine.
// Purpose: Decode resolve requests, run the engine off the async runtime,
//          and map outcomes onto HTTP status codes.
// Dependencies: axum, lineage-config, lineage-core, lineage-store-sqlite, tokio
// ============================================================================

//! ## Overview
//! [`LineageServer`] wires configuration, store, engine, and audit sink
//! together and serves three routes:
//!
//! - `POST <server.route>`: resolve `{ip, provider, application}` into
//!   `{group_id, visit_id}`.
//! - `GET /healthz`: process liveness.
//! - `GET /readyz`: store readiness.
//!
//! The engine is synchronous, so each resolution runs on
//! [`tokio::task::spawn_blocking`] bounded by `server.request_timeout_ms`.
//! When the bound elapses the caller gets a 503 `request_timeout` while the
//! worker runs to completion in the background; the engine's gate guarantees
//! it never leaves a partial row. The outcome of such a request is pending,
//! not failed: the worker may still store a row, so callers must not treat it
//! like a gate or store `timeout`. Its eventual result is audited as a second
//! event with `late` set.
//!
//! Status mapping: validation and decode failures are 400, oversized bodies
//! 413, timeouts 503, storage and identifier failures 500. Error bodies are
//! `{"error": <kind>, "message": <text>}`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::ConnectInfo;
use axum::extract::DefaultBodyLimit;
use axum::extract::State;
use axum::extract::rejection::BytesRejection;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use lineage_config::AuditConfig;
use lineage_config::AuditSinkType;
use lineage_config::LineageConfig;
use lineage_config::ServerConfig;
use lineage_config::StoreType;
use lineage_core::Clock;
use lineage_core::IdentifierGenerator;
use lineage_core::IdentityStore;
use lineage_core::InMemoryIdentityStore;
use lineage_core::Interaction;
use lineage_core::MatchEngine;
use lineage_core::RandomIdGenerator;
use lineage_core::Resolution;
use lineage_core::ResolutionLevel;
use lineage_core::ResolveError;
use lineage_core::SharedIdentityStore;
use lineage_core::SystemClock;
use lineage_store_sqlite::SqliteIdentityStore;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::audit::AuditSink;
use crate::audit::FileAuditSink;
use crate::audit::NoopAuditSink;
use crate::audit::ResolutionAuditEvent;
use crate::audit::ResolutionAuditEventParams;
use crate::audit::ServerAuditEvent;
use crate::audit::StderrAuditSink;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Engine type served over HTTP.
pub type ServerEngine = MatchEngine<
    SharedIdentityStore,
    Arc<dyn IdentifierGenerator + Send + Sync>,
    Arc<dyn Clock + Send + Sync>,
>;

/// Shared state handed to every handler.
pub struct ServerState {
    /// Match engine shared with blocking workers.
    engine: Arc<ServerEngine>,
    /// Audit sink.
    audit: Arc<dyn AuditSink>,
    /// Maximum accepted request body size in bytes.
    max_body_bytes: usize,
    /// End-to-end bound on a resolve request.
    request_timeout: Duration,
}

impl ServerState {
    /// Creates handler state from an engine, an audit sink, and server limits.
    #[must_use]
    pub fn new(engine: ServerEngine, audit: Arc<dyn AuditSink>, server: &ServerConfig) -> Self {
        Self {
            engine: Arc::new(engine),
            audit,
            max_body_bytes: server.max_body_bytes,
            request_timeout: server.request_timeout(),
        }
    }

    /// Returns the shared match engine.
    #[must_use]
    pub const fn engine(&self) -> &Arc<ServerEngine> {
        &self.engine
    }
}

impl std::fmt::Debug for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerState")
            .field("max_body_bytes", &self.max_body_bytes)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// SECTION: Lineage Server
// ============================================================================

/// HTTP server for identity resolution.
#[derive(Debug)]
pub struct LineageServer {
    /// Validated configuration.
    config: LineageConfig,
    /// Handler state.
    state: Arc<ServerState>,
}

impl LineageServer {
    /// Builds a server from configuration with the production generator and clock.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError`] when configuration is invalid or the store or
    /// audit sink cannot be opened.
    pub fn from_config(config: LineageConfig) -> Result<Self, ServerError> {
        config.validate().map_err(|err| ServerError::Config(err.to_string()))?;
        let store = build_identity_store(&config)?;
        let audit = build_audit_sink(&config.audit)?;
        let engine = MatchEngine::new(
            store,
            Arc::new(RandomIdGenerator) as Arc<dyn IdentifierGenerator + Send + Sync>,
            Arc::new(SystemClock) as Arc<dyn Clock + Send + Sync>,
            config.engine_config(),
        );
        let state = ServerState::new(engine, audit, &config.server);
        state.audit.record_server(&ServerAuditEvent::new(
            "startup",
            Some(format!("store={}", store_label(&config))),
        ));
        Ok(Self {
            config,
            state: Arc::new(state),
        })
    }

    /// Returns the handler state.
    #[must_use]
    pub fn state(&self) -> Arc<ServerState> {
        Arc::clone(&self.state)
    }

    /// Builds the axum router for the configured routes.
    #[must_use]
    pub fn router(&self) -> Router {
        build_router(&self.config.server, Arc::clone(&self.state))
    }

    /// Binds `server.bind` and serves until the listener fails.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError`] when binding or serving fails.
    pub async fn serve(self) -> Result<(), ServerError> {
        let addr =
            self.config.server.bind_addr().map_err(|err| ServerError::Config(err.to_string()))?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|err| ServerError::Transport(format!("http bind failed: {err}")))?;
        self.serve_listener(listener).await
    }

    /// Serves on an already bound listener.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Transport`] when the server loop fails.
    pub async fn serve_listener(self, listener: TcpListener) -> Result<(), ServerError> {
        let local = listener.local_addr().ok().map(|addr| addr.to_string());
        self.state.audit.record_server(&ServerAuditEvent::new("listening", local));
        let app = self.router();
        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .await
            .map_err(|err| ServerError::Transport(format!("http server failed: {err}")))
    }
}

/// Builds the router over `state`.
fn build_router(server: &ServerConfig, state: Arc<ServerState>) -> Router {
    Router::new()
        .route(&server.route, post(handle_resolve))
        .route("/healthz", get(handle_health))
        .route("/readyz", get(handle_ready))
        .layer(DefaultBodyLimit::max(server.max_body_bytes))
        .with_state(state)
}

/// Opens the identity store selected by `config.store`.
///
/// # Errors
///
/// Returns [`ServerError`] when the store configuration is incomplete or the
/// `SQLite` database cannot be opened.
pub fn build_identity_store(config: &LineageConfig) -> Result<SharedIdentityStore, ServerError> {
    let sqlite =
        config.sqlite_store_config().map_err(|err| ServerError::Config(err.to_string()))?;
    let store = match sqlite {
        None => SharedIdentityStore::from_store(InMemoryIdentityStore::new()),
        Some(sqlite_config) => {
            let store = SqliteIdentityStore::new(sqlite_config)
                .map_err(|err| ServerError::Init(err.to_string()))?;
            SharedIdentityStore::from_store(store)
        }
    };
    Ok(store)
}

/// Opens the audit sink selected by `audit.sink`.
///
/// # Errors
///
/// Returns [`ServerError`] when the file sink has no path or cannot be opened.
pub fn build_audit_sink(audit: &AuditConfig) -> Result<Arc<dyn AuditSink>, ServerError> {
    let sink: Arc<dyn AuditSink> = match audit.sink {
        AuditSinkType::Stderr => Arc::new(StderrAuditSink),
        AuditSinkType::None => Arc::new(NoopAuditSink),
        AuditSinkType::File => {
            let path = audit.path.as_ref().ok_or_else(|| {
                ServerError::Config("file audit sink requires audit.path".to_string())
            })?;
            let sink = FileAuditSink::new(path)
                .map_err(|err| ServerError::Init(format!("audit log open failed: {err}")))?;
            Arc::new(sink)
        }
    };
    Ok(sink)
}

/// Returns a label for the configured store backend.
fn store_label(config: &LineageConfig) -> &'static str {
    match config.store.store_type {
        StoreType::Memory => "memory",
        StoreType::Sqlite => "sqlite",
    }
}

// ============================================================================
// SECTION: Handlers
// ============================================================================

/// Error body returned for every failed request.
#[derive(Debug, Serialize)]
struct ErrorBody {
    /// Stable error kind.
    error: &'static str,
    /// Human-readable detail.
    message: String,
}

/// Probe body.
#[derive(Debug, Serialize)]
struct StatusBody {
    /// Probe status label.
    status: &'static str,
}

/// Request failure mapped to an HTTP response.
#[derive(Debug)]
struct ApiError {
    /// Response status.
    status: StatusCode,
    /// Stable error kind.
    kind: &'static str,
    /// Failing resolution level, when known.
    level: Option<&'static str>,
    /// Response message.
    message: String,
}

impl ApiError {
    /// Creates an error without level context.
    fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            level: None,
            message: message.into(),
        }
    }

    /// Maps an engine error onto its HTTP status.
    fn from_resolve(err: &ResolveError) -> Self {
        let level = err.level().map(ResolutionLevel::as_str);
        let (status, message) = match err {
            ResolveError::Validation(inner) => (StatusCode::BAD_REQUEST, inner.to_string()),
            ResolveError::Timeout {
                level, ..
            } => {
                (StatusCode::SERVICE_UNAVAILABLE, format!("resolution timed out at {level} level"))
            }
            ResolveError::Storage {
                level, ..
            } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("identity store failure at {level} level"),
            ),
            ResolveError::IdentifierGeneration {
                ..
            } => (StatusCode::INTERNAL_SERVER_ERROR, "identifier generation failed".to_string()),
        };
        Self {
            status,
            kind: err.kind(),
            level,
            message,
        }
    }

    /// Maps a body extraction failure.
    fn from_rejection(rejection: &BytesRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            Self::new(StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large", "request body too large")
        } else {
            Self::new(StatusCode::BAD_REQUEST, "invalid_request", rejection.body_text())
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.kind,
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

/// Blocking resolution worker.
type ResolveWorker = JoinHandle<Result<Resolution, ResolveError>>;

/// Result of decoding and resolving one request body.
struct ResolveAttempt {
    /// Interaction IP, when the body decoded.
    ip: Option<String>,
    /// Response-facing result.
    result: Result<Resolution, ApiError>,
    /// Worker still running after the request timeout elapsed.
    pending: Option<ResolveWorker>,
}

/// Resolves one interaction and records an audit event.
async fn handle_resolve(
    State(state): State<Arc<ServerState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let started = Instant::now();
    let attempt = resolve_body(&state, body).await;
    let mut params = ResolutionAuditEventParams {
        peer_ip: Some(peer.ip().to_string()),
        ip: attempt.ip,
        ..ResolutionAuditEventParams::default()
    };
    let response = match attempt.result {
        Ok(resolution) => {
            params.outcome = Some(resolution.outcome.as_str());
            params.created = Some(resolution.created);
            params.status = StatusCode::OK.as_u16();
            (StatusCode::OK, Json(resolution.summary())).into_response()
        }
        Err(err) => {
            params.error_kind = Some(err.kind);
            params.level = err.level;
            params.status = err.status.as_u16();
            err.into_response()
        }
    };
    params.latency_ms = started.elapsed().as_millis();
    state.audit.record_resolution(&ResolutionAuditEvent::new(params.clone()));
    if let Some(worker) = attempt.pending {
        let late = ResolutionAuditEventParams {
            peer_ip: params.peer_ip,
            ip: params.ip,
            status: params.status,
            late: true,
            ..ResolutionAuditEventParams::default()
        };
        tokio::spawn(record_late_resolution(Arc::clone(&state), late, worker, started));
    }
    response
}

/// Awaits a worker that outlived its request and audits what it did.
async fn record_late_resolution(
    state: Arc<ServerState>,
    mut params: ResolutionAuditEventParams,
    worker: ResolveWorker,
    started: Instant,
) {
    match worker.await {
        Ok(Ok(resolution)) => {
            params.outcome = Some(resolution.outcome.as_str());
            params.created = Some(resolution.created);
        }
        Ok(Err(err)) => {
            params.error_kind = Some(err.kind());
            params.level = err.level().map(ResolutionLevel::as_str);
        }
        Err(_) => params.error_kind = Some("internal"),
    }
    params.latency_ms = started.elapsed().as_millis();
    state.audit.record_resolution(&ResolutionAuditEvent::new(params));
}

/// Decodes the body and runs the engine on a blocking worker.
///
/// When the request timeout elapses first, the still-running worker is
/// handed back in [`ResolveAttempt::pending`].
async fn resolve_body(state: &ServerState, body: Result<Bytes, BytesRejection>) -> ResolveAttempt {
    let rejected = |err: ApiError| ResolveAttempt {
        ip: None,
        result: Err(err),
        pending: None,
    };
    let bytes = match body {
        Ok(bytes) => bytes,
        Err(rejection) => return rejected(ApiError::from_rejection(&rejection)),
    };
    if bytes.len() > state.max_body_bytes {
        return rejected(ApiError::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            "payload_too_large",
            format!("request body exceeds {} bytes", state.max_body_bytes),
        ));
    }
    let Ok(interaction) = serde_json::from_slice::<Interaction>(&bytes) else {
        return rejected(ApiError::new(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "body must be a JSON object with string fields ip, provider, and application",
        ));
    };
    let ip = Some(interaction.ip.clone()).filter(|ip| !ip.is_empty());
    let engine = Arc::clone(&state.engine);
    let mut worker = tokio::task::spawn_blocking(move || engine.resolve(&interaction));
    let (result, pending) = match tokio::time::timeout(state.request_timeout, &mut worker).await {
        Err(_) => {
            let err = ApiError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "request_timeout",
                format!(
                    "request exceeded {} ms; outcome pending",
                    state.request_timeout.as_millis()
                ),
            );
            (Err(err), Some(worker))
        }
        Ok(Err(_)) => {
            let err = ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal",
                "resolution worker failed",
            );
            (Err(err), None)
        }
        Ok(Ok(outcome)) => (outcome.map_err(|err| ApiError::from_resolve(&err)), None),
    };
    ResolveAttempt {
        ip,
        result,
        pending,
    }
}

/// Liveness probe.
async fn handle_health() -> Response {
    (
        StatusCode::OK,
        Json(StatusBody {
            status: "ok",
        }),
    )
        .into_response()
}

/// Readiness probe backed by the store's readiness check.
async fn handle_ready(State(state): State<Arc<ServerState>>) -> Response {
    let engine = Arc::clone(&state.engine);
    let check = tokio::task::spawn_blocking(move || engine.store().readiness());
    let failure = match tokio::time::timeout(state.request_timeout, check).await {
        Ok(Ok(Ok(()))) => {
            return (
                StatusCode::OK,
                Json(StatusBody {
                    status: "ready",
                }),
            )
                .into_response();
        }
        Ok(Ok(Err(err))) => err.to_string(),
        Ok(Err(_)) => "readiness worker failed".to_string(),
        Err(_) => "readiness check timed out".to_string(),
    };
    state.audit.record_server(&ServerAuditEvent::new("store_not_ready", Some(failure.clone())));
    ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "not_ready", failure).into_response()
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Lineage server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Configuration errors.
    #[error("config error: {0}")]
    Config(String),
    /// Initialization errors.
    #[error("init error: {0}")]
    Init(String),
    /// Transport errors.
    #[error("transport error: {0}")]
    Transport(String),
}

// ============================================================================
// SECTION: Tests
// ============================================================================
