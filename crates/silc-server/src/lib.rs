//! Per-session HTTP/WebSocket server.
//!
//! Exposes one `Session` on one listening socket: output reads (raw,
//! rendered, SSE), input writes, the run-command endpoint, lifecycle
//! controls, stream-to-file management, and the duplex `/ws` bridge.
//! Every route is token-gated with a loopback exemption, and everything
//! except `/close` and `/kill` answers 410 once the session is dead.

pub mod auth;
pub mod error;
mod routes;
mod ws;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use silc_core::logs::LogStore;
use silc_core::session::Session;
use silc_core::stream::StreamEngine;

pub use error::ApiError;

/// State shared by every handler of one session server.
pub struct SessionContext {
    pub session: Arc<Session>,
    pub streams: StreamEngine,
    pub logs: LogStore,
}

impl SessionContext {
    pub fn new(session: Arc<Session>, logs: LogStore) -> Arc<Self> {
        Arc::new(Self {
            streams: StreamEngine::new(Arc::clone(&session)),
            session,
            logs,
        })
    }
}

/// Build the session router. Serve it with
/// `into_make_service_with_connect_info::<SocketAddr>()` so the token gate
/// can see peer addresses.
pub fn build_router(ctx: Arc<SessionContext>) -> Router {
    Router::new()
        .route("/status", get(routes::status))
        .route("/out", get(routes::out))
        .route("/raw", get(routes::raw))
        .route("/logs", get(routes::logs))
        .route("/stream", get(routes::sse_stream))
        .route("/in", post(routes::send_input))
        .route("/run", post(routes::run))
        .route("/interrupt", post(routes::interrupt))
        .route("/sigterm", post(routes::sigterm))
        .route("/sigkill", post(routes::sigkill))
        .route("/clear", post(routes::clear))
        .route("/reset", post(routes::reset))
        .route("/resize", post(routes::resize))
        .route("/close", post(routes::close))
        .route("/kill", post(routes::kill))
        .route("/token", get(routes::token))
        .route("/stream/start", post(routes::stream_start))
        .route("/stream/stop", post(routes::stream_stop))
        .route("/stream/status", get(routes::stream_status))
        .route("/ws", get(ws::ws_handler))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&ctx),
            auth::require_token,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

/// Serve a session router on a pre-bound listener until `shutdown` fires.
pub async fn serve(
    listener: tokio::net::TcpListener,
    ctx: Arc<SessionContext>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let app = build_router(ctx);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
}
