//! Token-gate and dead-session behavior of the session API.
//!
//! Peer addresses are injected with `MockConnectInfo`, so both the
//! loopback exemption and the remote bearer checks are exercised without
//! real remote interfaces.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::connect_info::MockConnectInfo;
use axum::http::{Request, StatusCode};
use axum::Router;
use tower::ServiceExt;

use silc_core::config::SessionTuning;
use silc_core::logs::LogStore;
use silc_core::pty::{StubHandle, StubPty};
use silc_core::session::{Session, SessionParams};
use silc_core::shell::{ShellCapability, ShellKind};
use silc_server::SessionContext;

const TOKEN: &str = "sekrit-token-value";

async fn stub_context(
    token: Option<&str>,
) -> (Arc<SessionContext>, StubHandle, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let (stub, handle) = StubPty::new();
    handle.feed(b"$ ").await;

    let params = SessionParams {
        port: 20600,
        name: "api-test-1".to_string(),
        shell: ShellCapability::new(ShellKind::Bash, "/bin/bash"),
        cwd: None,
        api_token: token.map(|t| t.to_string()),
        is_global: false,
        tuning: SessionTuning::default(),
        logs: LogStore::new(dir.path(), 1000),
    };
    let session = Session::with_backend(params, Box::new(stub)).await.unwrap();
    let ctx = SessionContext::new(session, LogStore::new(dir.path(), 1000));
    (ctx, handle, dir)
}

fn app(ctx: Arc<SessionContext>, peer: &str) -> Router {
    silc_server::build_router(ctx).layer(MockConnectInfo(peer.parse::<SocketAddr>().unwrap()))
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn get_with_bearer(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("Authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

fn post(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_remote_peer_without_token_gets_401() {
    let (ctx, _handle, _dir) = stub_context(Some(TOKEN)).await;
    let response = app(ctx.clone(), "10.1.2.3:40000")
        .oneshot(get("/status"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    ctx.session.close().await;
}

#[tokio::test]
async fn test_remote_peer_with_wrong_token_gets_403() {
    let (ctx, _handle, _dir) = stub_context(Some(TOKEN)).await;
    let response = app(ctx.clone(), "10.1.2.3:40000")
        .oneshot(get_with_bearer("/status", "wrong-token"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    ctx.session.close().await;
}

#[tokio::test]
async fn test_remote_peer_with_correct_token_gets_through() {
    let (ctx, _handle, _dir) = stub_context(Some(TOKEN)).await;
    let response = app(ctx.clone(), "10.1.2.3:40000")
        .oneshot(get_with_bearer("/status", TOKEN))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    ctx.session.close().await;
}

#[tokio::test]
async fn test_malformed_authorization_header_gets_401() {
    let (ctx, _handle, _dir) = stub_context(Some(TOKEN)).await;
    let request = Request::builder()
        .uri("/status")
        .header("Authorization", format!("Basic {TOKEN}"))
        .body(Body::empty())
        .unwrap();
    let response = app(ctx.clone(), "10.1.2.3:40000")
        .oneshot(request)
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    ctx.session.close().await;
}

#[tokio::test]
async fn test_loopback_peer_never_needs_the_token() {
    let (ctx, _handle, _dir) = stub_context(Some(TOKEN)).await;
    let response = app(ctx.clone(), "127.0.0.1:50000")
        .oneshot(get("/status"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    ctx.session.close().await;
}

#[tokio::test]
async fn test_sessions_without_tokens_are_open() {
    let (ctx, _handle, _dir) = stub_context(None).await;
    let response = app(ctx.clone(), "10.1.2.3:40000")
        .oneshot(get("/status"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    ctx.session.close().await;
}

#[tokio::test]
async fn test_dead_sessions_answer_410_except_close_and_kill() {
    let (ctx, _handle, _dir) = stub_context(None).await;
    ctx.session.close().await;

    for uri in ["/status", "/out", "/raw", "/logs"] {
        let response = app(ctx.clone(), "127.0.0.1:50000")
            .oneshot(get(uri))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::GONE, "GET {uri}");
    }

    for uri in ["/interrupt", "/clear", "/reset"] {
        let response = app(ctx.clone(), "127.0.0.1:50000")
            .oneshot(post(uri))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::GONE, "POST {uri}");
    }

    // The teardown endpoints still work on a dead session.
    let response = app(ctx.clone(), "127.0.0.1:50000")
        .oneshot(post("/close"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app(ctx.clone(), "127.0.0.1:50000")
        .oneshot(post("/kill"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_token_endpoint_is_local_only() {
    let (ctx, _handle, _dir) = stub_context(Some(TOKEN)).await;

    // Even a correctly authenticated remote caller is refused.
    let response = app(ctx.clone(), "10.1.2.3:40000")
        .oneshot(get_with_bearer("/token", TOKEN))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app(ctx.clone(), "127.0.0.1:50000")
        .oneshot(get("/token"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    ctx.session.close().await;
}

#[tokio::test]
async fn test_input_endpoint_reaches_the_pty() {
    let (ctx, handle, _dir) = stub_context(None).await;

    let request = Request::builder()
        .method("POST")
        .uri("/in")
        .body(Body::from("echo hello\r\n"))
        .unwrap();
    let response = app(ctx.clone(), "127.0.0.1:50000")
        .oneshot(request)
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Trailing CRLF is stripped and exactly one platform newline added.
    let written = handle.written();
    let text = String::from_utf8_lossy(&written);
    assert!(text.ends_with("echo hello\n"));
    ctx.session.close().await;
}

#[tokio::test]
async fn test_run_endpoint_rejects_empty_bodies() {
    let (ctx, _handle, _dir) = stub_context(None).await;
    let response = app(ctx.clone(), "127.0.0.1:50000")
        .oneshot(post("/run"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    ctx.session.close().await;
}
