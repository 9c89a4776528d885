//! HTTP handlers for the session API.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{ConnectInfo, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::Stream;
use serde::Deserialize;
use serde_json::{json, Value};

use silc_core::cleaner;
use silc_core::session::RunOutcome;
use silc_core::stream::StreamConfig;

use crate::auth;
use crate::error::ApiError;
use crate::SessionContext;

fn ensure_alive(ctx: &SessionContext) -> Result<(), ApiError> {
    if ctx.session.alive() {
        Ok(())
    } else {
        Err(ApiError::Gone)
    }
}

fn platform_newline() -> &'static str {
    if cfg!(windows) {
        "\r\n"
    } else {
        "\n"
    }
}

#[derive(Debug, Deserialize)]
pub struct LinesQuery {
    lines: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct TailQuery {
    tail: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct InQuery {
    #[serde(default)]
    nonewline: bool,
}

#[derive(Debug, Deserialize)]
pub struct RunQuery {
    timeout: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct ResizeQuery {
    rows: u16,
    cols: u16,
}

#[derive(Debug, Deserialize)]
struct RunBody {
    command: String,
    timeout: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct StreamStopBody {
    filename: String,
}

pub async fn status(State(ctx): State<Arc<SessionContext>>) -> Result<Json<Value>, ApiError> {
    ensure_alive(&ctx)?;
    let status = ctx.session.get_status().await;
    Ok(Json(serde_json::to_value(status).unwrap_or_default()))
}

pub async fn out(
    State(ctx): State<Arc<SessionContext>>,
    Query(query): Query<LinesQuery>,
) -> Result<Json<Value>, ApiError> {
    ensure_alive(&ctx)?;
    let output = ctx.session.get_output(query.lines.unwrap_or(100), false).await;
    let lines = output.lines().count();
    Ok(Json(json!({ "output": output, "lines": lines })))
}

pub async fn raw(
    State(ctx): State<Arc<SessionContext>>,
    Query(query): Query<LinesQuery>,
) -> Result<Json<Value>, ApiError> {
    ensure_alive(&ctx)?;
    let output = ctx.session.get_output(query.lines.unwrap_or(100), true).await;
    let lines = output.lines().count();
    Ok(Json(json!({ "output": output, "lines": lines })))
}

pub async fn logs(
    State(ctx): State<Arc<SessionContext>>,
    Query(query): Query<TailQuery>,
) -> Result<Json<Value>, ApiError> {
    ensure_alive(&ctx)?;
    let content = ctx
        .logs
        .read_session_tail(ctx.session.port, query.tail.unwrap_or(100));
    let lines = content.lines().count();
    Ok(Json(json!({ "logs": content, "lines": lines })))
}

/// Server-Sent Events: a cleaned delta every 500 ms, when there is one.
pub async fn sse_stream(
    State(ctx): State<Arc<SessionContext>>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    ensure_alive(&ctx)?;

    let session = Arc::clone(&ctx.session);
    let cursor = session.buffer_cursor().await;

    let stream = futures::stream::unfold(cursor, move |mut cursor| {
        let session = Arc::clone(&session);
        async move {
            loop {
                tokio::time::sleep(Duration::from_millis(500)).await;
                let (bytes, next) = session.buffer_since(cursor).await;
                cursor = next;
                if bytes.is_empty() {
                    continue;
                }
                let text = cleaner::normalize_newlines(&String::from_utf8_lossy(&bytes));
                let cleaned = cleaner::clean_output(text.split('\n'));
                return Some((Ok::<_, Infallible>(Event::default().data(cleaned)), cursor));
            }
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

pub async fn send_input(
    State(ctx): State<Arc<SessionContext>>,
    Query(query): Query<InQuery>,
    body: String,
) -> Result<Json<Value>, ApiError> {
    ensure_alive(&ctx)?;

    // Strip every trailing line ending, then add exactly one platform
    // newline unless the caller asked for none.
    let mut text = body
        .trim_end_matches(|c| c == '\r' || c == '\n')
        .to_string();
    if !query.nonewline {
        text.push_str(platform_newline());
    }

    ctx.session.write_input(&text).await;
    Ok(Json(json!({ "status": "sent" })))
}

/// Body is either JSON `{command, timeout}` or a raw command string.
pub async fn run(
    State(ctx): State<Arc<SessionContext>>,
    Query(query): Query<RunQuery>,
    body: String,
) -> Result<Json<RunOutcome>, ApiError> {
    ensure_alive(&ctx)?;

    if body.is_empty() {
        return Err(ApiError::BadRequest("No command provided".to_string()));
    }

    let (command, body_timeout) = match serde_json::from_str::<RunBody>(&body) {
        Ok(parsed) => (parsed.command, parsed.timeout),
        Err(_) => (body, None),
    };
    let command = command.trim_end_matches(|c| c == '\r' || c == '\n');
    if command.is_empty() {
        return Err(ApiError::BadRequest("No command provided".to_string()));
    }

    let timeout = body_timeout
        .or(query.timeout)
        .unwrap_or_else(|| ctx.session.default_run_timeout());
    let outcome = ctx
        .session
        .run_command(command, Duration::from_secs(timeout))
        .await;
    Ok(Json(outcome))
}

pub async fn interrupt(State(ctx): State<Arc<SessionContext>>) -> Result<Json<Value>, ApiError> {
    ensure_alive(&ctx)?;
    ctx.session.interrupt().await;
    Ok(Json(json!({ "status": "interrupted" })))
}

pub async fn sigterm(State(ctx): State<Arc<SessionContext>>) -> Result<Json<Value>, ApiError> {
    ensure_alive(&ctx)?;
    ctx.session.send_sigterm();
    Ok(Json(json!({ "status": "sigterm_sent" })))
}

pub async fn sigkill(State(ctx): State<Arc<SessionContext>>) -> Result<Json<Value>, ApiError> {
    ensure_alive(&ctx)?;
    ctx.session.send_sigkill();
    Ok(Json(json!({ "status": "sigkill_sent" })))
}

pub async fn clear(State(ctx): State<Arc<SessionContext>>) -> Result<Json<Value>, ApiError> {
    ensure_alive(&ctx)?;
    ctx.session.clear_screen().await;
    Ok(Json(json!({ "status": "cleared" })))
}

pub async fn reset(State(ctx): State<Arc<SessionContext>>) -> Result<Json<Value>, ApiError> {
    ensure_alive(&ctx)?;
    ctx.session.reset_terminal().await;
    Ok(Json(json!({ "status": "reset" })))
}

pub async fn resize(
    State(ctx): State<Arc<SessionContext>>,
    Query(query): Query<ResizeQuery>,
) -> Result<Json<Value>, ApiError> {
    ensure_alive(&ctx)?;
    ctx.session.resize(query.rows, query.cols).await;
    Ok(Json(
        json!({ "status": "resized", "rows": query.rows.max(1), "cols": query.cols.max(1) }),
    ))
}

/// Graceful teardown; allowed on dead sessions.
pub async fn close(State(ctx): State<Arc<SessionContext>>) -> Json<Value> {
    ctx.streams.stop_all().await;
    ctx.session.close().await;
    Json(json!({ "status": "closed" }))
}

/// Forced teardown; allowed on dead sessions.
pub async fn kill(State(ctx): State<Arc<SessionContext>>) -> Json<Value> {
    ctx.streams.stop_all().await;
    ctx.session.force_kill().await;
    Json(json!({ "status": "killed" }))
}

/// Expose the session token to local helpers only.
pub async fn token(
    State(ctx): State<Arc<SessionContext>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Result<Json<Value>, ApiError> {
    ensure_alive(&ctx)?;
    if !auth::client_is_local(&addr) {
        return Err(ApiError::Forbidden(
            "Token is only available to local callers".to_string(),
        ));
    }
    Ok(Json(json!({ "token": ctx.session.api_token })))
}

pub async fn stream_start(
    State(ctx): State<Arc<SessionContext>>,
    Json(config): Json<StreamConfig>,
) -> Result<Json<Value>, ApiError> {
    ensure_alive(&ctx)?;
    let mode = config.mode;
    let filename = ctx.streams.start_stream(config).await?;
    Ok(Json(
        json!({ "status": "started", "filename": filename, "mode": mode }),
    ))
}

pub async fn stream_stop(
    State(ctx): State<Arc<SessionContext>>,
    Json(body): Json<StreamStopBody>,
) -> Result<Json<Value>, ApiError> {
    ensure_alive(&ctx)?;
    ctx.streams.stop_stream(&body.filename).await?;
    Ok(Json(json!({ "status": "stopped", "filename": body.filename })))
}

pub async fn stream_status(
    State(ctx): State<Arc<SessionContext>>,
) -> Result<Json<Value>, ApiError> {
    ensure_alive(&ctx)?;
    let streams = ctx.streams.status().await;
    Ok(Json(json!({ "status": "success", "streams": streams })))
}
