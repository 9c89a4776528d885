//! Daemon PID file: singleton enforcement and stale-file recovery.

use std::path::{Path, PathBuf};

/// Handle to `<data>/daemon.pid`. All writes are best-effort.
#[derive(Debug, Clone)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join("daemon.pid"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, pid: u32) {
        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let _ = std::fs::write(&self.path, pid.to_string());
    }

    pub fn read(&self) -> Option<u32> {
        let raw = std::fs::read_to_string(&self.path).ok()?;
        raw.trim().parse().ok()
    }

    pub fn remove(&self) {
        let _ = std::fs::remove_file(&self.path);
    }

    /// The recorded PID, but only if that process is actually running.
    /// A stale file (dead PID) reads as `None`.
    pub fn live_pid(&self) -> Option<u32> {
        let pid = self.read()?;
        if process_alive(pid) {
            Some(pid)
        } else {
            None
        }
    }
}

/// Check whether a process exists without signalling it.
pub fn process_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        unsafe { libc::kill(pid as i32, 0) == 0 }
    }
    #[cfg(not(unix))]
    {
        use sysinfo::{Pid, System};
        let system = System::new_all();
        system.process(Pid::from_u32(pid)).is_some()
    }
}
