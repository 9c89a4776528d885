//! The daemon supervisor.
//!
//! Owns every session for its whole lifecycle: socket reservation before a
//! session exists, per-session HTTP servers, bounded and deduplicated
//! cleanup, persistence, resurrection, idle garbage collection, and the
//! hard-exit watchdog behind `/shutdown` and `/killall`.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, warn};

use silc_core::config::SilcConfig;
use silc_core::logs::LogStore;
use silc_core::names;
use silc_core::paths;
use silc_core::session::{Session, SessionParams};
use silc_core::shell::ShellCapability;
use silc_core::{Result, SilcError};
use silc_server::SessionContext;

use crate::pidfile::PidFile;
use crate::procs;
use crate::registry::{Registry, SessionEntry};
use crate::store::{SessionRecord, Store};

/// Total budget for graceful shutdown.
const SHUTDOWN_BUDGET: Duration = Duration::from_secs(30);

/// Per-session bounds inside killall.
const KILLALL_FORCE_KILL: Duration = Duration::from_secs(1);
const KILLALL_CLEANUP: Duration = Duration::from_secs(2);

/// Bound on stopping one session server during cleanup.
const SERVER_STOP_BOUND: Duration = Duration::from_secs(2);

/// Watchdog delays before the process hard-exits.
const SHUTDOWN_WATCHDOG: Duration = Duration::from_secs(30);
const KILLALL_WATCHDOG: Duration = Duration::from_millis(250);

pub type CleanupFut = Shared<BoxFuture<'static, ()>>;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateSessionRequest {
    pub name: Option<String>,
    pub port: Option<u16>,
    pub shell: Option<String>,
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub global: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedSession {
    pub port: u16,
    pub name: String,
    pub session_id: String,
    pub shell: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub port: u16,
    pub name: String,
    pub session_id: String,
    pub shell: String,
    pub idle_seconds: i64,
    pub alive: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolveResponse {
    pub port: u16,
    pub name: String,
    pub session_id: String,
    pub shell: String,
    pub alive: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResurrectResult {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Daemon construction options.
pub struct DaemonOptions {
    pub config: SilcConfig,
    /// The watchdog calls `std::process::exit`; tests must disable it.
    pub enable_hard_exit: bool,
}

struct ServerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

pub struct Daemon {
    config: SilcConfig,
    data_dir: PathBuf,
    logs: LogStore,
    store: Store,
    pidfile: PidFile,
    registry: RwLock<Registry>,
    sessions: RwLock<HashMap<u16, Arc<Session>>>,
    contexts: RwLock<HashMap<u16, Arc<SessionContext>>>,
    servers: Mutex<HashMap<u16, ServerHandle>>,
    /// One in-flight cleanup per port; late callers share the same future.
    cleanups: Mutex<HashMap<u16, CleanupFut>>,
    shutdown_tx: watch::Sender<bool>,
    restart_tx: watch::Sender<u64>,
    enable_hard_exit: bool,
}

impl Daemon {
    pub fn new(options: DaemonOptions) -> Arc<Self> {
        let data_dir = paths::resolve_data_dir(&options.config);
        let logs_dir = paths::resolve_logs_dir(&options.config, &data_dir);
        let logs = LogStore::new(logs_dir, options.config.logging.max_log_lines);
        let store = Store::new(&data_dir);
        let pidfile = PidFile::new(&data_dir);

        let (shutdown_tx, _) = watch::channel(false);
        let (restart_tx, _) = watch::channel(0u64);

        Arc::new(Self {
            config: options.config,
            data_dir,
            logs,
            store,
            pidfile,
            registry: RwLock::new(Registry::new()),
            sessions: RwLock::new(HashMap::new()),
            contexts: RwLock::new(HashMap::new()),
            servers: Mutex::new(HashMap::new()),
            cleanups: Mutex::new(HashMap::new()),
            shutdown_tx,
            restart_tx,
            enable_hard_exit: options.enable_hard_exit,
        })
    }

    pub fn data_dir(&self) -> &PathBuf {
        &self.data_dir
    }

    pub fn logs(&self) -> &LogStore {
        &self.logs
    }

    pub fn daemon_port(&self) -> u16 {
        self.config.ports.daemon_port
    }

    /// Run the daemon until shutdown. Enforces the PID-file singleton and
    /// keeps the control plane up across `/restart-server` bounces.
    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        if let Some(pid) = self.pidfile.live_pid() {
            anyhow::bail!(
                "SILC daemon already running (pid {pid}); use `silc daemon shutdown` or `silc daemon killall`"
            );
        }
        self.pidfile.remove();
        self.pidfile.write(std::process::id());
        self.logs.write_daemon("Starting SILC daemon...");

        let signal_task = self.spawn_signal_watcher();
        let gc_task = tokio::spawn(Arc::clone(&self).gc_loop());

        let result = self.serve_control_plane().await;

        gc_task.abort();
        signal_task.abort();
        self.pidfile.remove();
        self.logs.write_daemon("SILC daemon stopped");
        result
    }

    async fn serve_control_plane(self: &Arc<Self>) -> anyhow::Result<()> {
        loop {
            let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, self.daemon_port()));
            let listener = TcpListener::bind(addr).await.with_context(|| {
                format!("failed to bind daemon port {addr}; is another daemon running?")
            })?;
            info!("daemon control plane listening on {addr}");

            let app = crate::control::router(Arc::clone(self));
            let mut shutdown_rx = self.shutdown_tx.subscribe();
            let mut restart_rx = self.restart_tx.subscribe();

            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                tokio::select! {
                    _ = shutdown_rx.changed() => {}
                    _ = restart_rx.changed() => {}
                }
            })
            .await
            .context("control-plane server failed")?;

            if *self.shutdown_tx.borrow() {
                return Ok(());
            }
            self.logs.write_daemon("Control-plane server restarting");
        }
    }

    fn spawn_signal_watcher(self: &Arc<Self>) -> JoinHandle<()> {
        let daemon = Arc::clone(self);
        tokio::spawn(async move {
            let ctrl_c = async {
                let _ = tokio::signal::ctrl_c().await;
            };

            #[cfg(unix)]
            let terminate = async {
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(mut signal) => {
                        signal.recv().await;
                    }
                    Err(_) => futures::future::pending().await,
                }
            };
            #[cfg(not(unix))]
            let terminate = futures::future::pending::<()>();

            tokio::select! {
                _ = ctrl_c => {}
                _ = terminate => {}
            }
            daemon.logs.write_daemon("Received shutdown signal");
            daemon.shutdown_tx.send_replace(true);
        })
    }

    /// Create a session: validate or generate the name, reserve the socket,
    /// spawn the shell, start its server, persist.
    pub async fn create_session(
        self: &Arc<Self>,
        request: CreateSessionRequest,
    ) -> Result<CreatedSession> {
        let name = self.resolve_name(request.name).await?;

        let shell = match &request.shell {
            Some(kind) => ShellCapability::for_kind(kind.parse()?),
            None => ShellCapability::detect(),
        };

        // Reserve the listening socket before the session exists; a failed
        // bind means the session is never started.
        let (port, listener) = self.reserve_port(request.port, request.global).await?;

        if request.global {
            warn!(port, "session bound on all interfaces; tokens travel over plaintext HTTP");
            self.logs.write_daemon(&format!(
                "WARNING: session on port {port} is reachable from the network"
            ));
        }

        let token = if self.config.tokens.require_token {
            Some(names::random_hex(self.config.tokens.length))
        } else {
            None
        };

        let params = SessionParams {
            port,
            name: name.clone(),
            shell: shell.clone(),
            cwd: request.cwd.clone(),
            api_token: token.clone(),
            is_global: request.global,
            tuning: self.config.sessions.clone(),
            logs: self.logs.clone(),
        };

        let session = match Session::spawn(params).await {
            Ok(session) => session,
            Err(e) => {
                // Releases the reserved socket.
                drop(listener);
                return Err(e);
            }
        };

        let added = self.registry.write().await.add(SessionEntry {
            port,
            name: name.clone(),
            session_id: session.session_id.clone(),
            shell_type: shell.kind.to_string(),
            is_global: request.global,
            cwd: request.cwd.clone(),
            created_at: session.created_at,
            last_access: session.created_at,
        });
        if let Err(e) = added {
            // Lost a race on the name or port; unwind the spawn.
            session.force_kill().await;
            drop(listener);
            return Err(e);
        }
        self.sessions.write().await.insert(port, Arc::clone(&session));

        self.store.upsert(SessionRecord {
            port,
            name: name.clone(),
            session_id: session.session_id.clone(),
            shell: shell.kind.to_string(),
            is_global: request.global,
            cwd: request.cwd,
            created_at: session.created_at,
        });

        self.start_session_server(port, Arc::clone(&session), listener)
            .await;

        self.logs.write_daemon(&format!(
            "Session created: port={port}, name={name}, id={}",
            session.session_id
        ));

        Ok(CreatedSession {
            port,
            name,
            session_id: session.session_id.clone(),
            shell: shell.kind.to_string(),
            token,
        })
    }

    async fn resolve_name(&self, requested: Option<String>) -> Result<String> {
        match requested {
            Some(name) => {
                if !names::is_valid_name(&name) {
                    return Err(SilcError::InvalidName(name));
                }
                if self.registry.read().await.name_exists(&name) {
                    return Err(SilcError::NameExists(name));
                }
                Ok(name)
            }
            None => {
                let registry = self.registry.read().await;
                loop {
                    let candidate = names::generate_name();
                    if !registry.name_exists(&candidate) {
                        return Ok(candidate);
                    }
                }
            }
        }
    }

    /// Bind the session's listener up front. Explicit ports fail fast;
    /// otherwise scan the configured range.
    async fn reserve_port(
        &self,
        requested: Option<u16>,
        global: bool,
    ) -> Result<(u16, TcpListener)> {
        let host = if global {
            Ipv4Addr::UNSPECIFIED
        } else {
            Ipv4Addr::LOCALHOST
        };

        if let Some(port) = requested {
            if self.sessions.read().await.contains_key(&port) {
                return Err(SilcError::PortInUse(port));
            }
            return TcpListener::bind((host, port))
                .await
                .map(|listener| (port, listener))
                .map_err(|_| SilcError::PortInUse(port));
        }

        let start = self.config.ports.session_start;
        let end = self.config.ports.session_end;
        let mut attempts = 0;
        for port in start..end {
            if attempts >= self.config.ports.max_attempts {
                break;
            }
            if self.sessions.read().await.contains_key(&port) {
                continue;
            }
            attempts += 1;
            if let Ok(listener) = TcpListener::bind((host, port)).await {
                return Ok((port, listener));
            }
        }
        Err(SilcError::NoAvailablePort { start, end })
    }

    async fn start_session_server(
        &self,
        port: u16,
        session: Arc<Session>,
        listener: TcpListener,
    ) {
        let ctx = SessionContext::new(session, self.logs.clone());
        self.contexts.write().await.insert(port, Arc::clone(&ctx));

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            let graceful = async move {
                let _ = shutdown_rx.changed().await;
            };
            if let Err(e) = silc_server::serve(listener, ctx, graceful).await {
                error!(port, "session server error: {e}");
            }
        });

        self.servers
            .lock()
            .await
            .insert(port, ServerHandle { shutdown, task });
    }

    /// One cleanup per port at a time: late callers share the in-flight
    /// future instead of racing a second teardown.
    pub async fn ensure_cleanup(self: &Arc<Self>, port: u16) -> CleanupFut {
        let mut cleanups = self.cleanups.lock().await;
        if let Some(existing) = cleanups.get(&port) {
            return existing.clone();
        }

        let daemon = Arc::clone(self);
        let fut: CleanupFut = async move {
            daemon.cleanup_session(port).await;
            daemon.cleanups.lock().await.remove(&port);
        }
        .boxed()
        .shared();

        // The cleanup runs even if no caller awaits the shared handle.
        tokio::spawn(fut.clone());
        cleanups.insert(port, fut.clone());
        fut
    }

    /// Bounded teardown. Every step has its own timeout; overruns are
    /// logged and skipped so later steps still run.
    async fn cleanup_session(&self, port: u16) {
        // 1-3: signal the server, then cancel it; aborting drops the
        // listening socket so the port is released even if axum is wedged.
        if let Some(handle) = self.servers.lock().await.remove(&port) {
            let _ = handle.shutdown.send(true);
            let mut task = handle.task;
            if tokio::time::timeout(SERVER_STOP_BOUND, &mut task).await.is_err() {
                self.logs
                    .write_daemon(&format!("Timeout stopping session server: port={port}"));
                task.abort();
                let _ = task.await;
            }
        }

        // 4: stop stream writers, close the session.
        if let Some(ctx) = self.contexts.write().await.remove(&port) {
            ctx.streams.stop_all().await;
        }

        let mut shell_pid = None;
        let mut shell_hint = String::new();
        if let Some(session) = self.sessions.write().await.remove(&port) {
            shell_pid = session.shell_pid();
            shell_hint = session.shell.kind.to_string();
            if tokio::time::timeout(Duration::from_secs(2), session.close())
                .await
                .is_err()
            {
                self.logs
                    .write_daemon(&format!("Timeout closing session PTY: port={port}"));
            }
        }

        // 5: sweep orphan shell processes that escaped the group kill.
        if let Some(pid) = shell_pid {
            let _ = tokio::task::spawn_blocking(move || {
                procs::kill_shell_tree(pid, &shell_hint)
            })
            .await;
        }

        // 6: registry, persistence, log file.
        self.registry.write().await.remove(port);
        self.store.remove(port);
        self.logs.remove_session_log(port);
        self.logs.write_daemon(&format!("Session closed: port={port}"));
    }

    pub async fn get_session(&self, port: u16) -> Option<Arc<Session>> {
        self.sessions.read().await.get(&port).cloned()
    }

    pub async fn known_port(&self, port: u16) -> bool {
        self.sessions.read().await.contains_key(&port)
            || self.registry.read().await.contains(port)
    }

    /// Active sessions, port-sorted. Dead registry entries get a cleanup
    /// scheduled instead of a row.
    pub async fn list_sessions(self: &Arc<Self>) -> Vec<SessionSummary> {
        let entries = self.registry.read().await.list_all();
        let sessions = self.sessions.read().await.clone();

        let mut summaries = Vec::new();
        for entry in entries {
            match sessions.get(&entry.port) {
                Some(session) if session.alive() => {
                    let status = session.get_status().await;
                    summaries.push(SessionSummary {
                        port: entry.port,
                        name: entry.name,
                        session_id: entry.session_id,
                        shell: entry.shell_type,
                        idle_seconds: status.idle_seconds,
                        alive: true,
                    });
                }
                _ => {
                    let _ = self.ensure_cleanup(entry.port).await;
                }
            }
        }
        summaries
    }

    pub async fn resolve(&self, name: &str) -> Option<ResolveResponse> {
        let entry = self.registry.write().await.get_by_name(name)?;
        let alive = self
            .sessions
            .read()
            .await
            .get(&entry.port)
            .map(|s| s.alive())
            .unwrap_or(false);
        Some(ResolveResponse {
            port: entry.port,
            name: entry.name,
            session_id: entry.session_id,
            shell: entry.shell_type,
            alive,
        })
    }

    pub async fn close_session(self: &Arc<Self>, port: u16) -> bool {
        if !self.known_port(port).await {
            return false;
        }
        self.ensure_cleanup(port).await.await;
        true
    }

    pub async fn kill_session(self: &Arc<Self>, port: u16) -> bool {
        if !self.known_port(port).await {
            return false;
        }
        if let Some(session) = self.sessions.read().await.get(&port).cloned() {
            if tokio::time::timeout(KILLALL_FORCE_KILL, session.force_kill())
                .await
                .is_err()
            {
                self.logs
                    .write_daemon(&format!("Timeout force-killing session PTY: port={port}"));
            }
        }
        self.ensure_cleanup(port).await.await;
        true
    }

    /// Restart preserves port, name, shell, and cwd.
    pub async fn restart_session(self: &Arc<Self>, port: u16) -> Result<CreatedSession> {
        let entry = self
            .registry
            .read()
            .await
            .get(port)
            .cloned()
            .ok_or_else(|| SilcError::Other(format!("Session not found: {port}")))?;

        self.ensure_cleanup(port).await.await;

        self.create_session(CreateSessionRequest {
            name: Some(entry.name),
            port: Some(entry.port),
            shell: Some(entry.shell_type),
            cwd: entry.cwd,
            global: entry.is_global,
        })
        .await
    }

    /// Graceful shutdown: close every session inside one 30 s budget, then
    /// stop the control plane. The watchdog guarantees the process dies.
    pub async fn shutdown(self: &Arc<Self>) {
        self.logs.write_daemon("Shutdown requested");

        let deadline = Instant::now() + SHUTDOWN_BUDGET;
        let ports: Vec<u16> = self.sessions.read().await.keys().copied().collect();
        for port in ports {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                self.logs.write_daemon(
                    "Shutdown exceeded 30s budget; leaving remaining sessions for killall",
                );
                break;
            }
            let cleanup = self.ensure_cleanup(port).await;
            if tokio::time::timeout(remaining, cleanup).await.is_err() {
                self.logs
                    .write_daemon(&format!("Shutdown timeout closing session: port={port}"));
            }
        }

        self.shutdown_tx.send_replace(true);
        if self.enable_hard_exit {
            tokio::spawn(hard_exit_after(SHUTDOWN_WATCHDOG, 0, self.pidfile.clone()));
        }
    }

    /// The absolute nuke: force-kill everything with tight bounds.
    pub async fn killall(self: &Arc<Self>) {
        self.logs.write_daemon("Killall requested");

        let ports: Vec<u16> = self.sessions.read().await.keys().copied().collect();
        for port in ports {
            if let Some(session) = self.sessions.read().await.get(&port).cloned() {
                if tokio::time::timeout(KILLALL_FORCE_KILL, session.force_kill())
                    .await
                    .is_err()
                {
                    self.logs
                        .write_daemon(&format!("Timeout force-killing session PTY: port={port}"));
                }
            }
            let cleanup = self.ensure_cleanup(port).await;
            if tokio::time::timeout(KILLALL_CLEANUP, cleanup).await.is_err() {
                self.logs
                    .write_daemon(&format!("Timeout cleaning session: port={port}"));
            }
        }

        self.shutdown_tx.send_replace(true);
        if self.enable_hard_exit {
            tokio::spawn(hard_exit_after(KILLALL_WATCHDOG, 1, self.pidfile.clone()));
        }
    }

    /// Bounce only the control-plane HTTP server; sessions keep running.
    pub fn restart_control_plane(&self) {
        self.restart_tx.send_modify(|count| *count += 1);
    }

    /// Recreate sessions from `sessions.json`. Failures are reported per
    /// session and never abort the batch.
    pub async fn resurrect(self: &Arc<Self>) -> Vec<ResurrectResult> {
        let mut results = Vec::new();

        for record in self.store.load() {
            if self.registry.read().await.name_exists(&record.name) {
                results.push(ResurrectResult {
                    name: record.name,
                    port: None,
                    status: "skipped".to_string(),
                    error: Some("name already exists".to_string()),
                });
                continue;
            }

            let base = CreateSessionRequest {
                name: Some(record.name.clone()),
                port: Some(record.port),
                shell: Some(record.shell.clone()),
                cwd: record.cwd.clone(),
                global: record.is_global,
            };

            match self.create_session(base).await {
                Ok(created) => results.push(ResurrectResult {
                    name: created.name,
                    port: Some(created.port),
                    status: "restored".to_string(),
                    error: None,
                }),
                Err(SilcError::PortInUse(_)) => {
                    // Original port is taken; relocate to any free one.
                    let relocated = self
                        .create_session(CreateSessionRequest {
                            name: Some(record.name.clone()),
                            port: None,
                            shell: Some(record.shell.clone()),
                            cwd: record.cwd.clone(),
                            global: record.is_global,
                        })
                        .await;
                    match relocated {
                        Ok(created) => results.push(ResurrectResult {
                            name: created.name,
                            port: Some(created.port),
                            status: "relocated".to_string(),
                            error: None,
                        }),
                        Err(e) => results.push(ResurrectResult {
                            name: record.name,
                            port: None,
                            status: "error".to_string(),
                            error: Some(e.to_string()),
                        }),
                    }
                }
                Err(e) => results.push(ResurrectResult {
                    name: record.name,
                    port: None,
                    status: "error".to_string(),
                    error: Some(e.to_string()),
                }),
            }
        }

        results
    }

    /// Daemon-level GC: sweep idle registry entries and rotate the log.
    async fn gc_loop(self: Arc<Self>) {
        let period = Duration::from_secs(self.config.sessions.gc_interval.max(1));
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        loop {
            ticker.tick().await;

            let expired = self
                .registry
                .write()
                .await
                .cleanup_timeout(self.config.sessions.idle_timeout);
            for port in expired {
                info!(port, "registry entry idle past timeout, scheduling cleanup");
                let _ = self.ensure_cleanup(port).await;
            }

            self.logs.rotate_daemon();
        }
    }
}

/// Watchdog: after `delay`, exit the process no matter what the runtime is
/// doing. Best-effort PID-file removal first so the next start recovers.
async fn hard_exit_after(delay: Duration, code: i32, pidfile: PidFile) {
    tokio::time::sleep(delay).await;
    pidfile.remove();
    std::process::exit(code);
}
