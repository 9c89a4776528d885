//! Layered configuration for SILC.
//!
//! Values come from three layers, lowest priority first: built-in defaults,
//! a `silc.toml` file in the data directory, and `SILC_*` environment
//! variables.

use std::path::PathBuf;

use serde::Deserialize;

use crate::paths;

/// Main configuration container.
#[derive(Debug, Clone, Default)]
pub struct SilcConfig {
    pub ports: PortConfig,
    pub paths: PathConfig,
    pub tokens: TokenConfig,
    pub sessions: SessionTuning,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone)]
pub struct PortConfig {
    /// Fixed control-plane port.
    pub daemon_port: u16,
    /// Session ports are picked from `[session_start, session_end)`.
    pub session_start: u16,
    pub session_end: u16,
    pub max_attempts: usize,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            daemon_port: 19999,
            session_start: 20000,
            session_end: 21000,
            max_attempts: 50,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathConfig {
    pub data_dir: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct TokenConfig {
    pub length: usize,
    pub require_token: bool,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            length: 32,
            require_token: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionTuning {
    /// Default `/run` timeout in seconds when the caller does not supply one.
    pub default_run_timeout: u64,
    /// Cap on bytes collected by a single `run` call.
    pub max_run_bytes: usize,
    /// Idle seconds before a session is garbage collected.
    pub idle_timeout: u64,
    /// Seconds between garbage-collection sweeps.
    pub gc_interval: u64,
    /// Raw byte buffer capacity.
    pub buffer_capacity: usize,
    /// Initial terminal dimensions.
    pub rows: u16,
    pub cols: u16,
}

impl Default for SessionTuning {
    fn default() -> Self {
        Self {
            default_run_timeout: 60,
            max_run_bytes: 5 * 1024 * 1024,
            idle_timeout: 1800,
            gc_interval: 60,
            buffer_capacity: crate::buffer::DEFAULT_CAPACITY,
            rows: 30,
            cols: 120,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub max_log_lines: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            max_log_lines: 1000,
        }
    }
}

/// `silc.toml` shape; every field optional so partial files work.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    ports: Option<FilePorts>,
    paths: Option<FilePaths>,
    tokens: Option<FileTokens>,
    sessions: Option<FileSessions>,
    logging: Option<FileLogging>,
}

#[derive(Debug, Default, Deserialize)]
struct FilePorts {
    daemon_port: Option<u16>,
    session_start: Option<u16>,
    session_end: Option<u16>,
    max_attempts: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct FilePaths {
    data_dir: Option<PathBuf>,
    log_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct FileTokens {
    length: Option<usize>,
    require_token: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct FileSessions {
    default_run_timeout: Option<u64>,
    max_run_bytes: Option<usize>,
    idle_timeout: Option<u64>,
    gc_interval: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct FileLogging {
    max_log_lines: Option<usize>,
}

impl SilcConfig {
    /// Load configuration from defaults, file, and environment.
    pub fn load() -> Self {
        let mut config = SilcConfig::default();
        config.apply_file(load_config_file());
        config.apply_env();
        config
    }

    fn apply_file(&mut self, file: FileConfig) {
        if let Some(ports) = file.ports {
            merge(&mut self.ports.daemon_port, ports.daemon_port);
            merge(&mut self.ports.session_start, ports.session_start);
            merge(&mut self.ports.session_end, ports.session_end);
            merge(&mut self.ports.max_attempts, ports.max_attempts);
        }
        if let Some(p) = file.paths {
            if p.data_dir.is_some() {
                self.paths.data_dir = p.data_dir;
            }
            if p.log_dir.is_some() {
                self.paths.log_dir = p.log_dir;
            }
        }
        if let Some(tokens) = file.tokens {
            merge(&mut self.tokens.length, tokens.length);
            merge(&mut self.tokens.require_token, tokens.require_token);
        }
        if let Some(sessions) = file.sessions {
            merge(
                &mut self.sessions.default_run_timeout,
                sessions.default_run_timeout,
            );
            merge(&mut self.sessions.max_run_bytes, sessions.max_run_bytes);
            merge(&mut self.sessions.idle_timeout, sessions.idle_timeout);
            merge(&mut self.sessions.gc_interval, sessions.gc_interval);
        }
        if let Some(logging) = file.logging {
            merge(&mut self.logging.max_log_lines, logging.max_log_lines);
        }
    }

    fn apply_env(&mut self) {
        merge(&mut self.ports.daemon_port, env_parse("SILC_DAEMON_PORT"));
        merge(
            &mut self.ports.session_start,
            env_parse("SILC_SESSION_PORT_START"),
        );
        merge(
            &mut self.ports.session_end,
            env_parse("SILC_SESSION_PORT_END"),
        );
        merge(
            &mut self.ports.max_attempts,
            env_parse("SILC_PORT_MAX_ATTEMPTS"),
        );

        if let Some(dir) = std::env::var_os("SILC_DATA_DIR") {
            self.paths.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(dir) = std::env::var_os("SILC_LOG_DIR") {
            self.paths.log_dir = Some(PathBuf::from(dir));
        }

        merge(&mut self.tokens.length, env_parse("SILC_TOKEN_LENGTH"));
        merge(&mut self.tokens.require_token, env_bool("SILC_REQUIRE_TOKEN"));

        merge(
            &mut self.sessions.default_run_timeout,
            env_parse("SILC_COMMAND_TIMEOUT"),
        );
        merge(
            &mut self.sessions.max_run_bytes,
            env_parse("SILC_MAX_RUN_BYTES"),
        );
        merge(&mut self.sessions.idle_timeout, env_parse("SILC_IDLE_TIMEOUT"));
        merge(&mut self.sessions.gc_interval, env_parse("SILC_GC_INTERVAL"));

        merge(
            &mut self.logging.max_log_lines,
            env_parse("SILC_MAX_LOG_LINES"),
        );
    }
}

fn merge<T>(slot: &mut T, value: Option<T>) {
    if let Some(v) = value {
        *slot = v;
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

fn load_config_file() -> FileConfig {
    let candidate = std::env::var_os("SILC_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(paths::platform_data_dir);
    let path = candidate.join("silc.toml");

    let Ok(raw) = std::fs::read_to_string(&path) else {
        return FileConfig::default();
    };

    match toml::from_str(&raw) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::warn!("Ignoring malformed {}: {}", path.display(), e);
            FileConfig::default()
        }
    }
}
