// crates/lineage-server/tests/http_roundtrip.rs
// ============================================================================
// Module: HTTP Round-Trip Tests
// Description: End-to-end requests against a served router.
// Purpose: Validate routing, method handling, and body limits over a socket.
// ============================================================================

//! ## Overview
//! Binds an ephemeral listener, serves [`LineageServer`] on it, and speaks
//! plain HTTP/1.1 over a TCP stream.

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
    reason = "Test-only assertions and helpers are permitted."
)]

use std::net::SocketAddr;

use lineage_config::AuditSinkType;
use lineage_config::LineageConfig;
use lineage_server::LineageServer;
use serde_json::Value;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::net::TcpStream;

async fn start(config: LineageConfig) -> SocketAddr {
    let server = LineageServer::from_config(config).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server.serve_listener(listener));
    addr
}

fn quiet_config() -> LineageConfig {
    let mut config = LineageConfig::default();
    config.audit.sink = AuditSinkType::None;
    config
}

async fn send(addr: SocketAddr, method: &str, path: &str, body: &str) -> (u16, String) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "{method} {path} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\n\
         Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.unwrap();
    let text = String::from_utf8(raw).unwrap();
    let status = text.split_whitespace().nth(1).unwrap().parse().unwrap();
    let body = text.split_once("\r\n\r\n").map(|(_, body)| body.to_string()).unwrap_or_default();
    (status, body)
}

#[tokio::test]
async fn resolve_round_trip_over_http() {
    let addr = start(quiet_config()).await;
    let body = r#"{"ip":"203.0.113.9","provider":"p1","application":"a1"}"#;

    let (status, first) = send(addr, "POST", "/identities", body).await;
    assert_eq!(status, 200);
    let (status, second) = send(addr, "POST", "/identities", body).await;
    assert_eq!(status, 200);
    let first: Value = serde_json::from_str(&first).unwrap();
    let second: Value = serde_json::from_str(&second).unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn probes_and_methods() {
    let addr = start(quiet_config()).await;
    assert_eq!(send(addr, "GET", "/healthz", "").await.0, 200);
    assert_eq!(send(addr, "GET", "/readyz", "").await.0, 200);
    assert_eq!(send(addr, "GET", "/identities", "").await.0, 405);
    assert_eq!(send(addr, "PUT", "/identities", "{}").await.0, 405);
}

#[tokio::test]
async fn body_over_limit_is_413() {
    let mut config = quiet_config();
    config.server.max_body_bytes = 64;
    let addr = start(config).await;
    let body = format!(r#"{{"ip":"10.0.0.1","provider":"{}","application":"a"}}"#, "p".repeat(128));
    let (status, response) = send(addr, "POST", "/identities", &body).await;
    assert_eq!(status, 413);
    let response: Value = serde_json::from_str(&response).unwrap();
    assert_eq!(response["error"], "payload_too_large");
}
