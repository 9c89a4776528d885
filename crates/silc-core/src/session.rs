//! Session orchestration that ties the PTY, buffer, and shell helper together.
//!
//! A session owns one shell behind a PTY, the raw byte buffer fed by the
//! background read loop, and the marker-delimited `run_command` state
//! machine. The daemon owns sessions for their whole lifecycle; the HTTP
//! layer only borrows them.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::buffer::RawBuffer;
use crate::cleaner;
use crate::config::SessionTuning;
use crate::logs::LogStore;
use crate::names;
use crate::pty::{NativePty, PtyBackend, PtySpawnConfig};
use crate::render;
use crate::shell::ShellCapability;
use crate::Result;

/// Poll interval inside `run_command` and the prompt wait.
const RUN_POLL: Duration = Duration::from_millis(50);

/// How long to wait for the shell prompt after helper injection.
const HELPER_PROMPT_WAIT: Duration = Duration::from_secs(2);

/// Parameters for creating a session.
#[derive(Debug, Clone)]
pub struct SessionParams {
    pub port: u16,
    pub name: String,
    pub shell: ShellCapability,
    pub cwd: Option<PathBuf>,
    pub api_token: Option<String>,
    pub is_global: bool,
    pub tuning: SessionTuning,
    pub logs: LogStore,
}

/// Status payload returned by `/status`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub session_id: String,
    pub port: u16,
    pub alive: bool,
    pub idle_seconds: i64,
    pub waiting_for_input: bool,
    pub last_line: String,
    pub run_locked: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    Timeout,
    Busy,
    Error,
}

/// Result of a `run_command` call.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub running_cmd: Option<String>,
}

impl RunOutcome {
    fn error(message: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Error,
            output: None,
            exit_code: None,
            error: Some(message.into()),
            running_cmd: None,
        }
    }
}

struct MutableState {
    last_access: DateTime<Utc>,
    last_output: DateTime<Utc>,
    rows: u16,
    cols: u16,
    current_run_cmd: Option<String>,
    helper_injected: bool,
}

pub struct Session {
    pub port: u16,
    pub name: String,
    pub session_id: String,
    pub shell: ShellCapability,
    pub cwd: Option<PathBuf>,
    pub api_token: Option<String>,
    pub is_global: bool,
    pub created_at: DateTime<Utc>,
    tuning: SessionTuning,
    logs: LogStore,
    buffer: RwLock<RawBuffer>,
    state: RwLock<MutableState>,
    /// Exclusive command execution.
    run_lock: Mutex<()>,
    /// Serializes raw input writes (not `run_command`'s own PTY writes,
    /// which are already covered by the run lock).
    input_lock: Mutex<()>,
    pty: Box<dyn PtyBackend>,
    closed: AtomicBool,
    tui_active: AtomicBool,
    read_task: StdMutex<Option<JoinHandle<()>>>,
    gc_task: StdMutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Spawn a native PTY shell and start the session loops.
    pub async fn spawn(params: SessionParams) -> Result<Arc<Self>> {
        let pty = NativePty::spawn(&PtySpawnConfig {
            shell_path: params.shell.path.clone(),
            cwd: params.cwd.clone(),
            rows: params.tuning.rows,
            cols: params.tuning.cols,
        })?;
        Self::with_backend(params, Box::new(pty)).await
    }

    /// Start a session over an explicit PTY backend (tests use the stub).
    pub async fn with_backend(params: SessionParams, pty: Box<dyn PtyBackend>) -> Result<Arc<Self>> {
        let now = Utc::now();
        let session = Arc::new(Self {
            port: params.port,
            name: params.name,
            session_id: names::random_hex(8),
            shell: params.shell,
            cwd: params.cwd,
            api_token: params.api_token,
            is_global: params.is_global,
            created_at: now,
            buffer: RwLock::new(RawBuffer::new(params.tuning.buffer_capacity)),
            state: RwLock::new(MutableState {
                last_access: now,
                last_output: now,
                rows: params.tuning.rows,
                cols: params.tuning.cols,
                current_run_cmd: None,
                helper_injected: false,
            }),
            tuning: params.tuning,
            logs: params.logs,
            run_lock: Mutex::new(()),
            input_lock: Mutex::new(()),
            pty,
            closed: AtomicBool::new(false),
            tui_active: AtomicBool::new(false),
            read_task: StdMutex::new(None),
            gc_task: StdMutex::new(None),
        });

        session.spawn_read_loop();
        session.inject_helper().await;
        session.spawn_gc_loop();

        info!(
            port = session.port,
            session_id = %session.session_id,
            shell = %session.shell.kind,
            "session started"
        );

        Ok(session)
    }

    fn spawn_read_loop(self: &Arc<Self>) {
        let session = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                if session.closed.load(Ordering::SeqCst) {
                    break;
                }
                let chunk = session.pty.read().await;
                if chunk.is_empty() {
                    break;
                }
                session.buffer.write().await.append(&chunk);
                session.state.write().await.last_output = Utc::now();
                session.logs.append_session_output(session.port, &chunk);
            }
            debug!(port = session.port, "read loop exited");
        });
        if let Ok(mut slot) = self.read_task.lock() {
            *slot = Some(handle);
        }
    }

    fn spawn_gc_loop(self: &Arc<Self>) {
        let session = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let period = Duration::from_secs(session.tuning.gc_interval.max(1));
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if session.closed.load(Ordering::SeqCst) {
                    break;
                }

                let (idle, run_locked) = {
                    let state = session.state.read().await;
                    (
                        (Utc::now() - state.last_access).num_seconds(),
                        state.current_run_cmd.is_some(),
                    )
                };

                if idle > session.tuning.idle_timeout as i64
                    && !session.tui_active.load(Ordering::SeqCst)
                    && !run_locked
                {
                    info!(port = session.port, idle, "closing idle session");
                    // close() awaits this task's handle, so it runs from a
                    // sibling task while this loop exits.
                    let closer = Arc::clone(&session);
                    tokio::spawn(async move { closer.close().await });
                    break;
                }

                session.logs.rotate_session(session.port);
            }
        });
        if let Ok(mut slot) = self.gc_task.lock() {
            *slot = Some(handle);
        }
    }

    /// PID of the underlying shell, when the backend captured one.
    pub fn shell_pid(&self) -> Option<u32> {
        self.pty.pid()
    }

    /// Configured `/run` timeout in seconds, used when a caller supplies
    /// none.
    pub fn default_run_timeout(&self) -> u64 {
        self.tuning.default_run_timeout
    }

    /// A session is alive while its read loop is running.
    pub fn alive(&self) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        self.read_task
            .lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(|h| !h.is_finished()))
            .unwrap_or(false)
    }

    pub fn is_tui_active(&self) -> bool {
        self.tui_active.load(Ordering::SeqCst)
    }

    pub fn set_tui_active(&self, active: bool) {
        self.tui_active.store(active, Ordering::SeqCst);
    }

    async fn touch_access(&self) {
        self.state.write().await.last_access = Utc::now();
    }

    /// Write raw input under the input lock.
    pub async fn write_input(&self, text: &str) {
        {
            let _guard = self.input_lock.lock().await;
            self.pty.write(text.as_bytes()).await;
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        self.touch_access().await;
    }

    /// Send Ctrl-C to the shell.
    pub async fn interrupt(&self) {
        self.pty.write(&[0x03]).await;
    }

    pub fn send_sigterm(&self) {
        self.pty.send_sigterm();
    }

    pub fn send_sigkill(&self) {
        self.pty.send_sigkill();
    }

    /// Clear the visible screen and drop buffered history.
    pub async fn clear_screen(&self) {
        self.pty.write(b"\x1b[2J\x1b[H").await;
        self.buffer.write().await.clear();
    }

    /// Full terminal reset (RIS) plus buffer clear.
    pub async fn reset_terminal(&self) {
        self.pty.write(b"\x1bc").await;
        self.buffer.write().await.clear();
    }

    pub async fn resize(&self, rows: u16, cols: u16) {
        let rows = rows.max(1);
        let cols = cols.max(1);
        {
            let mut state = self.state.write().await;
            state.rows = rows;
            state.cols = cols;
        }
        self.pty.resize(rows, cols);
        self.touch_access().await;
    }

    /// Last `lines` of output: raw buffer lines, or the rendered screen.
    pub async fn get_output(&self, lines: usize, raw: bool) -> String {
        self.touch_access().await;
        if raw {
            return self.buffer.read().await.get_last(lines).join("\n");
        }

        let (bytes, rows, cols) = {
            let buffer = self.buffer.read().await;
            let state = self.state.read().await;
            (buffer.get_bytes(), state.rows, state.cols)
        };
        render::render_tail(&bytes, rows, cols, lines)
    }

    pub async fn buffer_cursor(&self) -> u64 {
        self.buffer.read().await.cursor()
    }

    pub async fn buffer_since(&self, cursor: u64) -> (Bytes, u64) {
        self.buffer.read().await.get_since(cursor)
    }

    pub async fn buffer_bytes(&self) -> Bytes {
        self.buffer.read().await.get_bytes()
    }

    pub async fn buffer_last(&self, lines: usize) -> Vec<String> {
        self.buffer.read().await.get_last(lines)
    }

    pub async fn screen_size(&self) -> (u16, u16) {
        let state = self.state.read().await;
        (state.rows, state.cols)
    }

    pub async fn get_status(&self) -> SessionStatus {
        self.touch_access().await;

        let last_line = self
            .buffer
            .read()
            .await
            .get_last(1)
            .pop()
            .unwrap_or_default();
        let trimmed_tail = cleaner::clean_output([last_line.as_str()]);
        let trimmed = trimmed_tail.trim();
        // Heuristic: shells pausing for input tend to end on ":?" or "]".
        let waiting = trimmed.ends_with(":?") || trimmed.ends_with(']');

        let state = self.state.read().await;
        SessionStatus {
            session_id: self.session_id.clone(),
            port: self.port,
            alive: self.alive(),
            idle_seconds: (Utc::now() - state.last_output).num_seconds().max(0),
            waiting_for_input: waiting,
            last_line,
            run_locked: state.current_run_cmd.is_some(),
        }
    }

    /// Execute one command through the injected helper and capture its
    /// output and exit code. At most one run per session at a time.
    pub async fn run_command(&self, cmd: &str, timeout: Duration) -> RunOutcome {
        let guard = match self.run_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                let running = self.state.read().await.current_run_cmd.clone();
                return RunOutcome {
                    status: RunStatus::Busy,
                    output: None,
                    exit_code: None,
                    error: Some("Another run command is already executing".to_string()),
                    running_cmd: running,
                };
            }
        };

        self.state.write().await.current_run_cmd = Some(cmd.to_string());
        self.touch_access().await;

        let outcome = self.run_locked(cmd, timeout).await;

        self.state.write().await.current_run_cmd = None;
        drop(guard);
        outcome
    }

    async fn run_locked(&self, cmd: &str, timeout: Duration) -> RunOutcome {
        self.ensure_helper_injected().await;

        let token = names::random_hex(8);
        let begin_marker = format!("__SILC_BEGIN_{token}__");
        let end_prefix = format!("__SILC_END_{token}__:");

        let mut cursor = self.buffer.read().await.cursor();

        // Direct PTY write; the run lock already makes this exclusive.
        let invocation = self.shell.invocation(cmd, &token);
        self.pty
            .write(format!("{}{}", invocation, self.shell.newline()).as_bytes())
            .await;

        let deadline = Instant::now() + timeout;
        let mut acc: Vec<u8> = Vec::new();
        let mut collected: usize = 0;

        // Wait for the BEGIN marker, discarding the echo ahead of it.
        loop {
            let (chunk, next) = self.buffer_since(cursor).await;
            cursor = next;
            collected += chunk.len();
            acc.extend_from_slice(&chunk);

            if collected > self.tuning.max_run_bytes {
                return self.overflow_outcome().await;
            }

            if let Some(pos) = find_subsequence(&acc, begin_marker.as_bytes()) {
                let mut start = pos + begin_marker.len();
                while start < acc.len() && (acc[start] == b'\r' || acc[start] == b'\n') {
                    start += 1;
                }
                acc.drain(..start);
                break;
            }

            // Only the tail can still hold a split marker; drop the rest.
            if acc.len() > begin_marker.len() {
                let cut = acc.len() - begin_marker.len();
                acc.drain(..cut);
            }

            if Instant::now() >= deadline {
                return self.timeout_outcome(&acc, timeout);
            }
            tokio::time::sleep(RUN_POLL).await;
        }

        // Wait for the END marker and its exit code.
        loop {
            if let Some(pos) = find_subsequence(&acc, end_prefix.as_bytes()) {
                let tail = &acc[pos + end_prefix.len()..];
                if let Some(eol) = tail.iter().position(|b| *b == b'\r' || *b == b'\n') {
                    let exit_code = parse_exit_code(&tail[..eol]);
                    let output = finalize_output(&acc[..pos]);
                    return RunOutcome {
                        status: RunStatus::Completed,
                        output: Some(output),
                        exit_code: Some(exit_code),
                        error: None,
                        running_cmd: None,
                    };
                }
                // Exit code still streaming in; poll for the rest.
            }

            if Instant::now() >= deadline {
                return self.timeout_outcome(&acc, timeout);
            }
            tokio::time::sleep(RUN_POLL).await;

            let (chunk, next) = self.buffer_since(cursor).await;
            cursor = next;
            collected += chunk.len();
            acc.extend_from_slice(&chunk);

            if collected > self.tuning.max_run_bytes {
                return self.overflow_outcome().await;
            }
        }
    }

    async fn overflow_outcome(&self) -> RunOutcome {
        warn!(port = self.port, "run output exceeded cap, interrupting");
        self.interrupt().await;
        RunOutcome::error(format!(
            "output exceeded {}MB",
            self.tuning.max_run_bytes / (1024 * 1024)
        ))
    }

    fn timeout_outcome(&self, acc: &[u8], timeout: Duration) -> RunOutcome {
        RunOutcome {
            status: RunStatus::Timeout,
            output: Some(finalize_output(acc)),
            exit_code: None,
            error: Some(format!(
                "Command did not complete in {}s",
                timeout.as_secs()
            )),
            running_cmd: None,
        }
    }

    async fn ensure_helper_injected(&self) {
        if self.state.read().await.helper_injected {
            return;
        }
        self.inject_helper().await;
    }

    /// Define the shell helper, wait for the prompt to return, then clear
    /// the buffer so the injection is invisible to clients.
    async fn inject_helper(&self) {
        let script = self.shell.helper_script();
        if !script.is_empty() {
            self.pty
                .write(format!("{}{}", script, self.shell.newline()).as_bytes())
                .await;
        }
        self.wait_for_prompt(HELPER_PROMPT_WAIT).await;
        self.buffer.write().await.clear();
        self.state.write().await.helper_injected = true;
    }

    async fn wait_for_prompt(&self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            let last = self
                .buffer
                .read()
                .await
                .get_last(1)
                .pop()
                .unwrap_or_default();
            let stripped = cleaner::strip_ansi(&last);
            if self.shell.prompt_pattern().is_match(&stripped) {
                return;
            }
            tokio::time::sleep(RUN_POLL).await;
        }
        debug!(port = self.port, "prompt did not reappear after injection");
    }

    /// Graceful teardown: cancel tasks with a 1 s bound and kill the PTY.
    pub async fn close(&self) {
        self.close_with_bound(Duration::from_secs(1)).await;
    }

    /// Forced teardown with a 0.5 s bound per task.
    pub async fn force_kill(&self) {
        self.close_with_bound(Duration::from_millis(500)).await;
    }

    async fn close_with_bound(&self, bound: Duration) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.set_tui_active(false);

        let read = self.read_task.lock().ok().and_then(|mut g| g.take());
        let gc = self.gc_task.lock().ok().and_then(|mut g| g.take());
        for handle in [read, gc].into_iter().flatten() {
            handle.abort();
            if tokio::time::timeout(bound, handle).await.is_err() {
                warn!(port = self.port, "session task ignored cancellation");
            }
        }

        self.pty.kill().await;
        info!(port = self.port, session_id = %self.session_id, "session closed");
    }
}

/// First occurrence of `needle` in `haystack`.
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Decimal exit code off the END marker; anything unparsable reads as 0.
fn parse_exit_code(bytes: &[u8]) -> i32 {
    let text = String::from_utf8_lossy(bytes);
    let trimmed = text.trim();
    let digits: String = trimmed
        .chars()
        .enumerate()
        .take_while(|(i, c)| c.is_ascii_digit() || (*i == 0 && *c == '-'))
        .map(|(_, c)| c)
        .collect();
    digits.parse().unwrap_or(0)
}

/// Scrub raw command output for the API response.
fn finalize_output(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let text = cleaner::strip_osc(&text);
    let text = cleaner::normalize_newlines(&text);
    // Defense in depth: any surviving marker-bearing line is dropped.
    let lines: Vec<&str> = text
        .split('\n')
        .filter(|line| !render::is_marker_line(line))
        .collect();
    let cleaned = cleaner::clean_output(lines);
    cleaned.trim_end_matches('\n').trim_end().to_string()
}
