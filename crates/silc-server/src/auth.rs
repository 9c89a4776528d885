//! Token gate for the session API.
//!
//! Sessions without a token accept everything. Loopback peers (IPv4
//! 127.0.0.0/8, `::1`, and IPv4-mapped loopback) are exempt so the local
//! CLI never needs credentials. Everyone else presents
//! `Authorization: Bearer <token>`: 401 when missing or malformed, 403 on
//! mismatch. WebSocket upgrades authenticate a `token` query parameter in
//! their own handler.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;

use crate::error::ApiError;
use crate::SessionContext;

/// True for loopback peers, including IPv4-mapped IPv6 loopback.
pub fn client_is_local(addr: &SocketAddr) -> bool {
    match addr.ip() {
        IpAddr::V4(v4) => v4.is_loopback(),
        IpAddr::V6(v6) => {
            if v6.is_loopback() {
                return true;
            }
            // ::ffff:127.x.x.x
            let seg = v6.segments();
            seg[..5] == [0, 0, 0, 0, 0] && seg[5] == 0xffff && (seg[6] >> 8) == 0x7f
        }
    }
}

/// Outcome of parsing the Authorization header.
#[derive(Debug, PartialEq, Eq)]
pub enum BearerOutcome<'a> {
    Token(&'a str),
    Missing,
    Malformed,
}

pub fn parse_bearer(value: Option<&str>) -> BearerOutcome<'_> {
    let Some(raw) = value else {
        return BearerOutcome::Missing;
    };
    let mut parts = raw.trim().splitn(2, ' ');
    let scheme = parts.next().unwrap_or_default();
    let token = parts.next();
    if !scheme.eq_ignore_ascii_case("bearer") {
        return BearerOutcome::Malformed;
    }
    match token.map(str::trim) {
        Some(token) if !token.is_empty() => BearerOutcome::Token(token),
        _ => BearerOutcome::Malformed,
    }
}

/// Request guard applied to every session route.
pub async fn require_token(
    State(ctx): State<Arc<SessionContext>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(expected) = ctx.session.api_token.as_deref() else {
        return Ok(next.run(req).await);
    };

    if client_is_local(&addr) {
        return Ok(next.run(req).await);
    }

    // The WebSocket upgrade carries its token as a query parameter and is
    // checked by its own handler (close code 1008 on mismatch).
    if req.uri().path() == "/ws" {
        return Ok(next.run(req).await);
    }

    let header_value = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    match parse_bearer(header_value) {
        BearerOutcome::Token(provided) if provided == expected => Ok(next.run(req).await),
        BearerOutcome::Token(_) => Err(ApiError::Forbidden("Invalid API token".to_string())),
        BearerOutcome::Missing => Err(ApiError::Unauthorized("Missing API token".to_string())),
        BearerOutcome::Malformed => Err(ApiError::Unauthorized(
            "Invalid Authorization header".to_string(),
        )),
    }
}
