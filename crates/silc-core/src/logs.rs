//! Plain-text log files under the data directory.
//!
//! `daemon.log` and `session_<port>.log` are part of SILC's external
//! interface: one line per event prefixed `[YYYY-MM-DD HH:MM:SS] `, rotated
//! to the last 1000 lines. Session logs additionally receive the raw output
//! flushed from the session read loop. Every operation here is best-effort;
//! an unwritable disk must never take a session down.

use std::io::Write;
use std::path::{Path, PathBuf};

/// Handle to the log directory, cheap to clone into background tasks.
#[derive(Debug, Clone)]
pub struct LogStore {
    logs_dir: PathBuf,
    max_lines: usize,
}

impl LogStore {
    pub fn new(logs_dir: impl Into<PathBuf>, max_lines: usize) -> Self {
        Self {
            logs_dir: logs_dir.into(),
            max_lines,
        }
    }

    pub fn daemon_log_path(&self) -> PathBuf {
        self.logs_dir.join("daemon.log")
    }

    pub fn session_log_path(&self, port: u16) -> PathBuf {
        self.logs_dir.join(format!("session_{port}.log"))
    }

    /// Append a timestamped event line to the daemon log.
    pub fn write_daemon(&self, message: &str) {
        append_line(&self.daemon_log_path(), message);
    }

    /// Append a timestamped event line to a session log.
    pub fn write_session(&self, port: u16, message: &str) {
        append_line(&self.session_log_path(port), message);
    }

    /// Append raw session output, flushed from the read loop.
    pub fn append_session_output(&self, port: u16, chunk: &[u8]) {
        let path = self.session_log_path(port);
        let text = String::from_utf8_lossy(chunk);
        let _ = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .and_then(|mut f| f.write_all(text.as_bytes()));
    }

    pub fn rotate_daemon(&self) {
        rotate(&self.daemon_log_path(), self.max_lines);
    }

    pub fn rotate_session(&self, port: u16) {
        rotate(&self.session_log_path(port), self.max_lines);
    }

    /// Last `tail` lines of a session log, empty string when absent.
    pub fn read_session_tail(&self, port: u16, tail: usize) -> String {
        let path = self.session_log_path(port);
        let Ok(content) = std::fs::read_to_string(&path) else {
            return String::new();
        };
        let lines: Vec<&str> = content.lines().collect();
        let skip = lines.len().saturating_sub(tail);
        lines[skip..].join("\n")
    }

    /// Delete a session log on session removal.
    pub fn remove_session_log(&self, port: u16) {
        let _ = std::fs::remove_file(self.session_log_path(port));
    }
}

fn append_line(path: &Path, message: &str) {
    let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let _ = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .and_then(|mut f| writeln!(f, "[{timestamp}] {message}"));
}

/// Truncate a log file to its last `max_lines` lines.
fn rotate(path: &Path, max_lines: usize) {
    let Ok(content) = std::fs::read_to_string(path) else {
        return;
    };
    let lines: Vec<&str> = content.lines().collect();
    if lines.len() <= max_lines {
        return;
    }
    let tail = lines[lines.len() - max_lines..].join("\n") + "\n";
    let _ = std::fs::write(path, tail);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, LogStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = LogStore::new(dir.path(), 5);
        (dir, store)
    }

    #[test]
    fn test_daemon_lines_are_timestamped() {
        let (_dir, store) = store();
        store.write_daemon("daemon started");

        let content = std::fs::read_to_string(store.daemon_log_path()).unwrap();
        assert!(content.starts_with('['));
        assert!(content.trim_end().ends_with("daemon started"));
    }

    #[test]
    fn test_rotation_keeps_last_lines() {
        let (_dir, store) = store();
        for i in 0..10 {
            store.write_daemon(&format!("event {i}"));
        }
        store.rotate_daemon();

        let content = std::fs::read_to_string(store.daemon_log_path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 5);
        assert!(lines[0].ends_with("event 5"));
        assert!(lines[4].ends_with("event 9"));
    }

    #[test]
    fn test_session_output_appends_raw_bytes() {
        let (_dir, store) = store();
        store.append_session_output(20000, b"hello\n");
        store.append_session_output(20000, b"world\n");

        assert_eq!(store.read_session_tail(20000, 10), "hello\nworld");
        assert_eq!(store.read_session_tail(20000, 1), "world");
    }

    #[test]
    fn test_missing_session_log_reads_empty() {
        let (_dir, store) = store();
        assert_eq!(store.read_session_tail(20001, 10), "");
    }

    #[test]
    fn test_remove_session_log_deletes_file() {
        let (_dir, store) = store();
        store.append_session_output(20000, b"x");
        assert!(store.session_log_path(20000).exists());
        store.remove_session_log(20000);
        assert!(!store.session_log_path(20000).exists());
    }
}
