//! Data-directory discovery.
//!
//! Candidates are tried in order: `$SILC_DATA_DIR`, the platform default
//! (`~/.silc` or `%APPDATA%/silc`), then a tmpdir fallback. Each candidate
//! must survive a write probe before it is accepted.

use std::path::{Path, PathBuf};

use crate::config::SilcConfig;

const WRITE_PROBE: &str = ".silc_write_test";

/// The platform-default data directory, without any writability check.
pub fn platform_data_dir() -> PathBuf {
    if cfg!(windows) {
        let base = std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir);
        base.join("silc")
    } else {
        dirs::home_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(".silc")
    }
}

/// Resolve the data directory for this process.
pub fn resolve_data_dir(config: &SilcConfig) -> PathBuf {
    if let Some(configured) = &config.paths.data_dir {
        if is_writable_dir(configured) {
            return configured.clone();
        }
        tracing::warn!(
            "Configured data dir {} is not writable, falling back",
            configured.display()
        );
    }

    let default = platform_data_dir();
    if is_writable_dir(&default) {
        return default;
    }

    let fallback = std::env::temp_dir().join("silc");
    // Returned even if the probe fails; later writes stay best-effort.
    let _ = is_writable_dir(&fallback);
    fallback
}

/// Resolve the logs directory: `<data>/logs`, falling back to the data dir.
pub fn resolve_logs_dir(config: &SilcConfig, data_dir: &Path) -> PathBuf {
    if let Some(configured) = &config.paths.log_dir {
        if is_writable_dir(configured) {
            return configured.clone();
        }
    }

    let logs = data_dir.join("logs");
    if is_writable_dir(&logs) {
        logs
    } else {
        data_dir.to_path_buf()
    }
}

/// Create the directory if needed and probe it with a throwaway write.
pub fn is_writable_dir(path: &Path) -> bool {
    if std::fs::create_dir_all(path).is_err() {
        return false;
    }

    let probe = path.join(WRITE_PROBE);
    match std::fs::write(&probe, b"") {
        Ok(()) => {
            let _ = std::fs::remove_file(&probe);
            true
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writable_probe_accepts_tempdir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(is_writable_dir(dir.path()));
        // The probe file is removed afterwards.
        assert!(!dir.path().join(WRITE_PROBE).exists());
    }

    #[test]
    fn test_writable_probe_creates_missing_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        assert!(is_writable_dir(&nested));
        assert!(nested.is_dir());
    }

    #[test]
    fn test_configured_data_dir_wins_when_writable() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = SilcConfig::default();
        config.paths.data_dir = Some(dir.path().to_path_buf());

        assert_eq!(resolve_data_dir(&config), dir.path());
    }

    #[test]
    fn test_logs_dir_nests_under_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = SilcConfig::default();
        let logs = resolve_logs_dir(&config, dir.path());
        assert_eq!(logs, dir.path().join("logs"));
    }
}
