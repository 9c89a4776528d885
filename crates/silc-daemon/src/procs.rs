//! Orphan shell sweep.
//!
//! After a session is torn down its shell tree should be gone; this is the
//! backstop for processes that escaped the process-group kill. The root is
//! only touched when its name still looks like a shell, so a recycled PID
//! never takes an innocent process down.

use sysinfo::{Pid, System};
use tracing::{debug, info};

const SHELL_NAMES: &[&str] = &[
    "bash", "zsh", "sh", "dash", "fish", "cmd", "cmd.exe", "pwsh", "pwsh.exe", "powershell",
];

/// True when a process name plausibly belongs to a shell we spawned.
pub fn looks_like_shell(name: &str, hint: &str) -> bool {
    let lowered = name.to_ascii_lowercase();
    lowered.contains(&hint.to_ascii_lowercase())
        || SHELL_NAMES.iter().any(|shell| lowered == *shell)
}

/// Kill the process tree rooted at `root_pid` if the root still looks like
/// the shell we spawned. Children first, then the root.
pub fn kill_shell_tree(root_pid: u32, shell_hint: &str) {
    let system = System::new_all();
    let root = Pid::from_u32(root_pid);

    let Some(process) = system.process(root) else {
        return;
    };
    if !looks_like_shell(process.name(), shell_hint) {
        debug!(
            pid = root_pid,
            name = process.name(),
            "skipping orphan sweep, PID no longer looks like a shell"
        );
        return;
    }

    let descendants = collect_descendants(&system, root);
    for pid in descendants.iter().rev() {
        if let Some(child) = system.process(*pid) {
            child.kill();
        }
    }
    process.kill();
    info!(
        pid = root_pid,
        descendants = descendants.len(),
        "killed orphan shell tree"
    );
}

/// Breadth-first walk of the process table by parent links.
fn collect_descendants(system: &System, root: Pid) -> Vec<Pid> {
    let mut out = Vec::new();
    let mut frontier = vec![root];

    while let Some(current) = frontier.pop() {
        for (pid, process) in system.processes() {
            if process.parent() == Some(current) {
                out.push(*pid);
                frontier.push(*pid);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_name_heuristic() {
        assert!(looks_like_shell("bash", "bash"));
        assert!(looks_like_shell("zsh", "zsh"));
        assert!(looks_like_shell("pwsh.exe", "pwsh"));
        // Exact well-known shell names pass regardless of the hint.
        assert!(looks_like_shell("sh", "bash"));
        assert!(!looks_like_shell("postgres", "bash"));
        assert!(!looks_like_shell("sshd", "bash"));
    }

    #[test]
    fn test_sweeping_a_dead_pid_is_a_noop() {
        // PIDs near u32::MAX are not valid on any mainstream OS.
        kill_shell_tree(u32::MAX - 1, "bash");
    }
}
