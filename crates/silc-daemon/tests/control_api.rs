//! Control-plane HTTP surface, driven through the router directly.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use silc_core::config::SilcConfig;
use silc_daemon::{control, Daemon, DaemonOptions};

fn test_daemon(dir: &std::path::Path) -> Arc<Daemon> {
    let mut config = SilcConfig::default();
    config.paths.data_dir = Some(dir.to_path_buf());
    Daemon::new(DaemonOptions {
        config,
        enable_hard_exit: false,
    })
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_health_answers_with_pid() {
    let dir = tempfile::tempdir().unwrap();
    let app = control::router(test_daemon(dir.path()));

    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_invalid_session_names_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let app = control::router(test_daemon(dir.path()));

    let response = app
        .oneshot(post_json("/sessions", r#"{"name": "Not Valid!"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_shells_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let app = control::router(test_daemon(dir.path()));

    let response = app
        .oneshot(post_json(
            "/sessions",
            r#"{"name": "fish-wanted", "shell": "fish"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_names_resolve_to_404() {
    let dir = tempfile::tempdir().unwrap();
    let app = control::router(test_daemon(dir.path()));

    let response = app.oneshot(get("/resolve/no-such-name")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_lifecycle_posts_on_unknown_ports_are_404() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = test_daemon(dir.path());

    for uri in [
        "/sessions/20990/close",
        "/sessions/20990/kill",
        "/sessions/20990/restart",
    ] {
        let app = control::router(Arc::clone(&daemon));
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "POST {uri}");
    }
}

#[tokio::test]
async fn test_listing_an_empty_daemon_returns_an_empty_array() {
    let dir = tempfile::tempdir().unwrap();
    let app = control::router(test_daemon(dir.path()));

    let response = app.oneshot(get("/sessions")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_resurrect_with_no_store_is_an_empty_batch() {
    let dir = tempfile::tempdir().unwrap();
    let app = control::router(test_daemon(dir.path()));

    let request = Request::builder()
        .method("POST")
        .uri("/resurrect")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
