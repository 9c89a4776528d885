//! Error types for SILC

use thiserror::Error;

/// Main error type shared across the SILC crates
#[derive(Error, Debug)]
pub enum SilcError {
    #[error("PTY error: {0}")]
    Pty(String),

    #[error("Failed to spawn shell: {0}")]
    Spawn(String),

    #[error("Session is closed")]
    SessionClosed,

    #[error("Invalid session name: {0}")]
    InvalidName(String),

    #[error("Session name already exists: {0}")]
    NameExists(String),

    #[error("Port {0} already in use")]
    PortInUse(u16),

    #[error("No available port in range {start}-{end}")]
    NoAvailablePort { start: u16, end: u16 },

    #[error("Stream already active for file: {0}")]
    StreamExists(String),

    #[error("No active stream found for: {0}")]
    StreamNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, SilcError>;
