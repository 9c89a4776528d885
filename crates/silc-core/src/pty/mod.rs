//! PTY backends.
//!
//! The session talks to its shell through the `PtyBackend` trait. The
//! native implementation wraps a real pseudo-terminal; the stub stands in
//! on platforms where a PTY cannot be opened and in tests.

use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;

mod native;
mod stub;

pub use native::NativePty;
pub use stub::{StubHandle, StubPty};

/// Parameters for spawning a shell in a fresh PTY.
#[derive(Debug, Clone)]
pub struct PtySpawnConfig {
    pub shell_path: String,
    pub cwd: Option<PathBuf>,
    pub rows: u16,
    pub cols: u16,
}

/// Asynchronous interface to a pseudo-terminal.
///
/// Reads and writes never block the scheduler: the native backend runs its
/// blocking I/O on dedicated threads and bridges through channels.
#[async_trait]
pub trait PtyBackend: Send + Sync {
    /// Await the next chunk of shell output. Returns an empty chunk on
    /// EOF or error; callers treat that as end-of-session.
    async fn read(&self) -> Bytes;

    /// Best-effort write to the shell's stdin. Errors after the child has
    /// exited are swallowed.
    async fn write(&self, data: &[u8]);

    /// Push a terminal size update to the PTY.
    fn resize(&self, rows: u16, cols: u16);

    /// Terminate the shell and every descendant: graceful signal, a short
    /// grace period, then a hard kill. Idempotent.
    async fn kill(&self);

    /// PID of the shell process, if it was captured at spawn.
    fn pid(&self) -> Option<u32>;

    /// Deliver SIGTERM to the shell's process group.
    fn send_sigterm(&self);

    /// Deliver SIGKILL to the shell's process group.
    fn send_sigkill(&self);
}
