//! Control-plane HTTP API on the daemon port.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use silc_server::ApiError;

use crate::supervisor::{CreateSessionRequest, Daemon};

pub fn router(daemon: Arc<Daemon>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/sessions", post(create_session).get(list_sessions))
        .route("/resolve/:name", get(resolve))
        .route("/sessions/:port/close", post(close_session))
        .route("/sessions/:port/kill", post(kill_session))
        .route("/sessions/:port/restart", post(restart_session))
        .route("/shutdown", post(shutdown))
        .route("/killall", post(killall))
        .route("/restart-server", post(restart_server))
        .route("/resurrect", post(resurrect))
        .layer(TraceLayer::new_for_http())
        .with_state(daemon)
}

async fn health(State(daemon): State<Arc<Daemon>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "pid": std::process::id(),
        "version": env!("CARGO_PKG_VERSION"),
        "data_dir": daemon.data_dir(),
    }))
}

async fn create_session(
    State(daemon): State<Arc<Daemon>>,
    body: Option<Json<CreateSessionRequest>>,
) -> Result<Json<Value>, ApiError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let created = daemon.create_session(request).await?;
    Ok(Json(serde_json::to_value(created).unwrap_or_default()))
}

async fn list_sessions(State(daemon): State<Arc<Daemon>>) -> Json<Value> {
    let sessions = daemon.list_sessions().await;
    Json(serde_json::to_value(sessions).unwrap_or_default())
}

async fn resolve(
    State(daemon): State<Arc<Daemon>>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    match daemon.resolve(&name).await {
        Some(resolved) => Ok(Json(serde_json::to_value(resolved).unwrap_or_default())),
        None => Err(ApiError::NotFound(format!("Session not found: {name}"))),
    }
}

async fn close_session(
    State(daemon): State<Arc<Daemon>>,
    Path(port): Path<u16>,
) -> Result<Json<Value>, ApiError> {
    if daemon.close_session(port).await {
        Ok(Json(json!({ "status": "closed" })))
    } else {
        Err(ApiError::NotFound("Session not found".to_string()))
    }
}

async fn kill_session(
    State(daemon): State<Arc<Daemon>>,
    Path(port): Path<u16>,
) -> Result<Json<Value>, ApiError> {
    if daemon.kill_session(port).await {
        Ok(Json(json!({ "status": "killed" })))
    } else {
        Err(ApiError::NotFound("Session not found".to_string()))
    }
}

async fn restart_session(
    State(daemon): State<Arc<Daemon>>,
    Path(port): Path<u16>,
) -> Result<Json<Value>, ApiError> {
    if !daemon.known_port(port).await {
        return Err(ApiError::NotFound("Session not found".to_string()));
    }
    let created = daemon.restart_session(port).await?;
    Ok(Json(serde_json::to_value(created).unwrap_or_default()))
}

async fn shutdown(State(daemon): State<Arc<Daemon>>) -> Json<Value> {
    daemon.shutdown().await;
    Json(json!({ "status": "shutdown" }))
}

async fn killall(State(daemon): State<Arc<Daemon>>) -> Json<Value> {
    daemon.killall().await;
    Json(json!({ "status": "killed" }))
}

async fn restart_server(State(daemon): State<Arc<Daemon>>) -> Json<Value> {
    daemon.restart_control_plane();
    Json(json!({ "status": "restarting" }))
}

async fn resurrect(State(daemon): State<Arc<Daemon>>) -> Json<Value> {
    let results = daemon.resurrect().await;
    Json(json!({ "results": results }))
}
