//! End-to-end daemon tests against a real shell.
//!
//! These spawn `/bin/sh` in a PTY, so they are Unix-only. The hard-exit
//! watchdog is disabled throughout.

#![cfg(unix)]

use std::time::Duration;

use silc_core::config::SilcConfig;
use silc_core::session::RunStatus;
use silc_daemon::{CreateSessionRequest, Daemon, DaemonOptions, SessionRecord, Store};

/// Each test gets its own slice of the port space so parallel tests never
/// collide on session ports.
fn test_daemon(dir: &std::path::Path, port_start: u16, port_end: u16) -> std::sync::Arc<Daemon> {
    let mut config = SilcConfig::default();
    config.paths.data_dir = Some(dir.to_path_buf());
    config.ports.session_start = port_start;
    config.ports.session_end = port_end;
    // Sessions in this suite have no token so plain HTTP clients work.
    config.tokens.require_token = false;
    Daemon::new(DaemonOptions {
        config,
        enable_hard_exit: false,
    })
}

fn sh_request(name: &str) -> CreateSessionRequest {
    CreateSessionRequest {
        name: Some(name.to_string()),
        port: None,
        shell: Some("sh".to_string()),
        cwd: None,
        global: false,
    }
}

#[tokio::test]
async fn test_create_run_and_close_a_real_session() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = test_daemon(dir.path(), 20300, 20320);

    let created = daemon
        .create_session(sh_request("lifecycle-sh-1"))
        .await
        .expect("session should start");
    assert_eq!(created.shell, "sh");
    assert_eq!(created.session_id.len(), 8);

    let session = daemon.get_session(created.port).await.unwrap();
    assert!(session.alive());

    let outcome = session
        .run_command("echo lifecycle_marker", Duration::from_secs(15))
        .await;
    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.exit_code, Some(0));
    assert!(outcome.output.unwrap_or_default().contains("lifecycle_marker"));

    // A failing command reports its exit code through the END marker.
    let failed = session.run_command("false", Duration::from_secs(15)).await;
    assert_eq!(failed.status, RunStatus::Completed);
    assert_eq!(failed.exit_code, Some(1));

    // Persistence has the entry until close removes it.
    let store = Store::new(dir.path());
    assert!(store.load().iter().any(|r| r.name == "lifecycle-sh-1"));

    assert!(daemon.close_session(created.port).await);
    assert!(daemon.get_session(created.port).await.is_none());
    assert!(store.load().is_empty());
}

#[tokio::test]
async fn test_session_http_surface_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = test_daemon(dir.path(), 20330, 20350);

    let created = daemon
        .create_session(sh_request("lifecycle-http-1"))
        .await
        .expect("session should start");
    let base = format!("http://127.0.0.1:{}", created.port);
    let http = reqwest::Client::new();

    // Give the server task a moment to start accepting.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let status: serde_json::Value = http
        .get(format!("{base}/status"))
        .send()
        .await
        .expect("session server should answer")
        .json()
        .await
        .unwrap();
    assert_eq!(status["alive"], true);
    assert_eq!(status["port"], created.port);

    let run: serde_json::Value = http
        .post(format!("{base}/run"))
        .body(r#"{"command": "echo http_marker", "timeout": 15}"#)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(run["status"], "completed");
    assert_eq!(run["exit_code"], 0);
    assert!(run["output"].as_str().unwrap_or("").contains("http_marker"));

    // Closing through the daemon releases the port.
    assert!(daemon.close_session(created.port).await);
    tokio::time::sleep(Duration::from_millis(200)).await;
    let gone = http
        .get(format!("{base}/status"))
        .timeout(Duration::from_secs(2))
        .send()
        .await;
    assert!(gone.is_err(), "session port should be released after close");
}

#[tokio::test]
async fn test_list_sessions_is_port_sorted_and_shrinks_on_close() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = test_daemon(dir.path(), 20360, 20380);

    let one = daemon.create_session(sh_request("listing-one")).await.unwrap();
    let two = daemon.create_session(sh_request("listing-two")).await.unwrap();

    let listed = daemon.list_sessions().await;
    assert_eq!(listed.len(), 2);
    let ports: Vec<u16> = listed.iter().map(|s| s.port).collect();
    let mut sorted = ports.clone();
    sorted.sort_unstable();
    assert_eq!(ports, sorted);

    assert!(daemon.close_session(one.port).await);
    let listed = daemon.list_sessions().await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name, "listing-two");

    assert!(daemon.close_session(two.port).await);
}

#[tokio::test]
async fn test_resolve_maps_names_to_ports() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = test_daemon(dir.path(), 20390, 20410);

    let created = daemon
        .create_session(sh_request("resolve-target"))
        .await
        .unwrap();

    let resolved = daemon.resolve("resolve-target").await.unwrap();
    assert_eq!(resolved.port, created.port);
    assert!(resolved.alive);

    assert!(daemon.close_session(created.port).await);
    assert!(daemon.resolve("resolve-target").await.is_none());
}

#[tokio::test]
async fn test_duplicate_names_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = test_daemon(dir.path(), 20420, 20440);

    let first = daemon.create_session(sh_request("dup-name")).await.unwrap();
    let second = daemon.create_session(sh_request("dup-name")).await;
    assert!(second.is_err());

    assert!(daemon.close_session(first.port).await);
}

#[tokio::test]
async fn test_resurrect_restores_sessions_from_the_store() {
    let dir = tempfile::tempdir().unwrap();

    // A record left behind by a previous daemon run.
    let store = Store::new(dir.path());
    store.upsert(SessionRecord {
        port: 20750,
        name: "resurrect-me".to_string(),
        session_id: "deadbeef".to_string(),
        shell: "sh".to_string(),
        is_global: false,
        cwd: None,
        created_at: chrono::Utc::now(),
    });

    let daemon = test_daemon(dir.path(), 20740, 20760);
    let results = daemon.resurrect().await;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, "restored");
    assert_eq!(results[0].port, Some(20750));

    let session = daemon.get_session(20750).await.unwrap();
    assert!(session.alive());

    // A second resurrect skips the live name.
    let results = daemon.resurrect().await;
    assert_eq!(results[0].status, "skipped");

    assert!(daemon.close_session(20750).await);
}

#[tokio::test]
async fn test_restart_preserves_identity() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = test_daemon(dir.path(), 20450, 20470);

    let created = daemon
        .create_session(sh_request("restart-me"))
        .await
        .unwrap();
    let old_id = created.session_id.clone();

    let restarted = daemon.restart_session(created.port).await.unwrap();
    assert_eq!(restarted.port, created.port);
    assert_eq!(restarted.name, "restart-me");
    assert_ne!(restarted.session_id, old_id);

    let session = daemon.get_session(restarted.port).await.unwrap();
    assert!(session.alive());
    assert!(daemon.close_session(restarted.port).await);
}
