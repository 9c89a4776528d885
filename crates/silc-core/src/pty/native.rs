//! Native PTY backend over `portable-pty`.
//!
//! Blocking reads and writes run on dedicated OS threads; the async side
//! sees two channels. The reader channel closing is the EOF signal.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use portable_pty::{native_pty_system, CommandBuilder, MasterPty, PtySize};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use super::{PtyBackend, PtySpawnConfig};
use crate::error::{Result, SilcError};

const READ_CHUNK: usize = 4096;

pub struct NativePty {
    master: StdMutex<Option<Box<dyn MasterPty + Send>>>,
    child: StdMutex<Option<Box<dyn portable_pty::Child + Send + Sync>>>,
    writer_tx: mpsc::Sender<Vec<u8>>,
    reader_rx: Mutex<mpsc::Receiver<Bytes>>,
    pid: Option<u32>,
    killed: AtomicBool,
}

impl NativePty {
    /// Open a PTY and spawn the shell inside it, in its own process group.
    pub fn spawn(config: &PtySpawnConfig) -> Result<Self> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: config.rows.max(1),
                cols: config.cols.max(1),
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SilcError::Pty(format!("openpty failed: {e}")))?;

        let mut cmd = CommandBuilder::new(&config.shell_path);
        cmd.env("TERM", "xterm-256color");
        if let Some(cwd) = &config.cwd {
            cmd.cwd(cwd);
        } else if let Some(home) = dirs::home_dir() {
            cmd.cwd(home);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| SilcError::Spawn(format!("{}: {e}", config.shell_path)))?;
        let pid = child.process_id();

        // The child keeps its own slave handle; ours would suppress EOF on
        // the master when the shell exits.
        drop(pair.slave);

        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| SilcError::Pty(format!("clone_reader failed: {e}")))?;
        let mut writer = pair
            .master
            .take_writer()
            .map_err(|e| SilcError::Pty(format!("take_writer failed: {e}")))?;

        let (reader_tx, reader_rx) = mpsc::channel::<Bytes>(256);
        std::thread::spawn(move || {
            let mut buf = [0u8; READ_CHUNK];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if reader_tx.blocking_send(Bytes::copy_from_slice(&buf[..n])).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!("PTY read ended: {e}");
                        break;
                    }
                }
            }
        });

        let (writer_tx, mut writer_rx) = mpsc::channel::<Vec<u8>>(256);
        std::thread::spawn(move || {
            while let Some(data) = writer_rx.blocking_recv() {
                if writer.write_all(&data).is_err() || writer.flush().is_err() {
                    break;
                }
            }
        });

        debug!(pid = ?pid, shell = %config.shell_path, "PTY spawned");

        Ok(Self {
            master: StdMutex::new(Some(pair.master)),
            child: StdMutex::new(Some(child)),
            writer_tx,
            reader_rx: Mutex::new(reader_rx),
            pid,
            killed: AtomicBool::new(false),
        })
    }

    #[cfg(unix)]
    fn signal_group(&self, signal: i32) {
        if let Some(pid) = self.pid {
            // The shell was spawned in its own session, so pid == pgid.
            unsafe {
                libc::killpg(pid as i32, signal);
            }
        }
    }

    #[cfg(not(unix))]
    fn kill_child_handle(&self) {
        if let Ok(mut guard) = self.child.lock() {
            if let Some(child) = guard.as_mut() {
                let _ = child.kill();
            }
        }
    }
}

#[async_trait]
impl PtyBackend for NativePty {
    async fn read(&self) -> Bytes {
        let mut rx = self.reader_rx.lock().await;
        rx.recv().await.unwrap_or_else(Bytes::new)
    }

    async fn write(&self, data: &[u8]) {
        if self.killed.load(Ordering::SeqCst) {
            return;
        }
        let _ = self.writer_tx.send(data.to_vec()).await;
    }

    fn resize(&self, rows: u16, cols: u16) {
        if let Ok(guard) = self.master.lock() {
            if let Some(master) = guard.as_ref() {
                if let Err(e) = master.resize(PtySize {
                    rows: rows.max(1),
                    cols: cols.max(1),
                    pixel_width: 0,
                    pixel_height: 0,
                }) {
                    warn!("PTY resize failed: {e}");
                }
            }
        }
    }

    async fn kill(&self) {
        if self.killed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.send_sigterm();
        tokio::time::sleep(Duration::from_millis(500)).await;
        self.send_sigkill();

        // Reap the child off the async threads, then drop the master so
        // the kernel releases the PTY pair.
        let child = self.child.lock().ok().and_then(|mut guard| guard.take());
        if let Some(mut child) = child {
            let _ = tokio::task::spawn_blocking(move || {
                let _ = child.kill();
                let _ = child.wait();
            })
            .await;
        }

        if let Ok(mut guard) = self.master.lock() {
            guard.take();
        }
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn send_sigterm(&self) {
        #[cfg(unix)]
        self.signal_group(libc::SIGTERM);
        // No process-group signals on Windows; ConPTY teardown happens in
        // kill() through the child handle instead.
        #[cfg(not(unix))]
        self.kill_child_handle();
    }

    fn send_sigkill(&self) {
        #[cfg(unix)]
        self.signal_group(libc::SIGKILL);
        #[cfg(not(unix))]
        self.kill_child_handle();
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_spawn_echo_and_read_back() {
        let pty = NativePty::spawn(&PtySpawnConfig {
            shell_path: "/bin/sh".to_string(),
            cwd: None,
            rows: 24,
            cols: 80,
        })
        .expect("should open a PTY and spawn /bin/sh");

        assert!(pty.pid().is_some());
        pty.write(b"echo pty_smoke_check\n").await;

        let mut collected = Vec::new();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while tokio::time::Instant::now() < deadline {
            let chunk = tokio::time::timeout(Duration::from_secs(1), pty.read())
                .await
                .unwrap_or_default();
            collected.extend_from_slice(&chunk);
            if String::from_utf8_lossy(&collected).contains("pty_smoke_check") {
                break;
            }
        }

        assert!(
            String::from_utf8_lossy(&collected).contains("pty_smoke_check"),
            "shell output never arrived"
        );

        pty.kill().await;
    }

    #[tokio::test]
    async fn test_read_returns_empty_after_shell_exit() {
        let pty = NativePty::spawn(&PtySpawnConfig {
            shell_path: "/bin/sh".to_string(),
            cwd: None,
            rows: 24,
            cols: 80,
        })
        .expect("should open a PTY and spawn /bin/sh");

        pty.write(b"exit\n").await;

        // Drain until EOF; the channel closing yields an empty chunk.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let chunk = tokio::time::timeout(Duration::from_secs(1), pty.read())
                .await
                .unwrap_or_default();
            if chunk.is_empty() {
                break;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "shell never reached EOF"
            );
        }

        pty.kill().await;
    }
}
