//! Thin HTTP clients for the daemon control plane and session servers.
//!
//! All CLI traffic goes over loopback, so the token gate's local exemption
//! applies and no credentials are needed.

use anyhow::{anyhow, Context, Result};
use serde_json::Value;

/// Client for the daemon control plane.
pub struct DaemonClient {
    base: String,
    http: reqwest::Client,
}

impl DaemonClient {
    pub fn new(port: u16) -> Self {
        Self {
            base: format!("http://127.0.0.1:{port}"),
            http: reqwest::Client::new(),
        }
    }

    pub async fn get(&self, path: &str) -> Result<Value> {
        let response = self
            .http
            .get(format!("{}{path}", self.base))
            .send()
            .await
            .context("is the daemon running? start it with `silc daemon start`")?;
        parse_response(response).await
    }

    pub async fn post(&self, path: &str, body: Option<Value>) -> Result<Value> {
        let mut request = self.http.post(format!("{}{path}", self.base));
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request
            .send()
            .await
            .context("is the daemon running? start it with `silc daemon start`")?;
        parse_response(response).await
    }

    /// Resolve a CLI target (port number or session name) to a port.
    pub async fn resolve_target(&self, target: &str) -> Result<u16> {
        if let Ok(port) = target.parse::<u16>() {
            return Ok(port);
        }
        let resolved = self.get(&format!("/resolve/{target}")).await?;
        resolved["port"]
            .as_u64()
            .map(|p| p as u16)
            .ok_or_else(|| anyhow!("could not resolve session name: {target}"))
    }
}

/// Client for one session's API server.
pub struct SessionClient {
    base: String,
    http: reqwest::Client,
}

impl SessionClient {
    pub fn new(port: u16) -> Self {
        Self {
            base: format!("http://127.0.0.1:{port}"),
            http: reqwest::Client::new(),
        }
    }

    pub async fn get(&self, path: &str) -> Result<Value> {
        let response = self
            .http
            .get(format!("{}{path}", self.base))
            .send()
            .await
            .context("session not reachable; is it still alive?")?;
        parse_response(response).await
    }

    pub async fn post(&self, path: &str, body: Option<Value>) -> Result<Value> {
        let mut request = self.http.post(format!("{}{path}", self.base));
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request
            .send()
            .await
            .context("session not reachable; is it still alive?")?;
        parse_response(response).await
    }

    /// POST a raw text body (the `/in` endpoint takes plain text).
    pub async fn post_text(&self, path: &str, body: String) -> Result<Value> {
        let response = self
            .http
            .post(format!("{}{path}", self.base))
            .body(body)
            .send()
            .await
            .context("session not reachable; is it still alive?")?;
        parse_response(response).await
    }
}

async fn parse_response(response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let body: Value = response
        .json()
        .await
        .unwrap_or_else(|_| Value::String(String::new()));

    if status.is_success() {
        return Ok(body);
    }

    let detail = body["detail"]
        .as_str()
        .map(|s| s.to_string())
        .unwrap_or_else(|| body.to_string());
    Err(anyhow!("{status}: {detail}"))
}
