//! WebSocket bridge between clients and the PTY.
//!
//! Server frames: `{event:"update", data}` as output arrives and
//! `{event:"history", data}` on request. Client frames: `{event:"type",
//! text, nonewline}` and `{event:"load_history"}`. A single writer task
//! owns the sink so concurrent senders are serialized, and it drains
//! pending frames before the connection closes. `tui_active` is set for
//! the lifetime of the connection, which shields the session from idle GC.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Query, State};
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::auth;
use crate::SessionContext;

/// Poll interval for pushing buffer deltas to the client.
const UPDATE_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum ServerFrame {
    Update { data: String },
    History { data: String },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum ClientFrame {
    Type {
        text: String,
        #[serde(default)]
        nonewline: bool,
    },
    LoadHistory,
}

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

pub async fn ws_handler(
    State(ctx): State<Arc<SessionContext>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    if !ctx.session.alive() {
        return crate::error::ApiError::Gone.into_response();
    }
    let authorized = match ctx.session.api_token.as_deref() {
        None => true,
        Some(expected) => {
            auth::client_is_local(&addr) || query.token.as_deref() == Some(expected)
        }
    };
    ws.on_upgrade(move |socket| handle_socket(ctx, socket, authorized))
}

async fn handle_socket(ctx: Arc<SessionContext>, socket: WebSocket, authorized: bool) {
    let (mut sink, mut stream) = socket.split();

    if !authorized {
        let _ = sink
            .send(Message::Close(Some(CloseFrame {
                code: close_code::POLICY,
                reason: "Invalid API token".into(),
            })))
            .await;
        return;
    }

    let session = Arc::clone(&ctx.session);
    session.set_tui_active(true);
    debug!(port = session.port, "websocket attached");

    // Single writer task: everything outbound funnels through one channel,
    // serializing concurrent senders.
    let (frame_tx, mut frame_rx) = mpsc::channel::<ServerFrame>(64);
    let writer = tokio::spawn(async move {
        while let Some(frame) = frame_rx.recv().await {
            let Ok(text) = serde_json::to_string(&frame) else {
                continue;
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    // Update pump: push buffer deltas as they arrive.
    let update_tx = frame_tx.clone();
    let update_session = Arc::clone(&session);
    let updates = tokio::spawn(async move {
        let mut cursor = update_session.buffer_cursor().await;
        loop {
            let (bytes, next) = update_session.buffer_since(cursor).await;
            cursor = next;
            if !bytes.is_empty() {
                let data = String::from_utf8_lossy(&bytes).to_string();
                if update_tx.send(ServerFrame::Update { data }).await.is_err() {
                    break;
                }
            }
            tokio::time::sleep(UPDATE_POLL).await;
        }
    });

    while let Some(Ok(message)) = stream.next().await {
        match message {
            Message::Text(text) => {
                let Ok(frame) = serde_json::from_str::<ClientFrame>(&text) else {
                    continue;
                };
                match frame {
                    ClientFrame::Type { text, nonewline } => {
                        if nonewline {
                            session.write_input(&text).await;
                        } else {
                            // Mirror the /in endpoint: strip trailing line
                            // endings, append the platform newline.
                            let stripped =
                                text.trim_end_matches(|c| c == '\r' || c == '\n');
                            let newline = if cfg!(windows) { "\r\n" } else { "\n" };
                            session
                                .write_input(&format!("{stripped}{newline}"))
                                .await;
                        }
                    }
                    ClientFrame::LoadHistory => {
                        let bytes = session.buffer_bytes().await;
                        let data = String::from_utf8_lossy(&bytes).to_string();
                        let _ = frame_tx.send(ServerFrame::History { data }).await;
                    }
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    session.set_tui_active(false);
    updates.abort();
    // Dropping the last sender lets the writer drain what is queued and
    // then close the sink.
    drop(frame_tx);
    let _ = writer.await;
    debug!(port = session.port, "websocket detached");
}
