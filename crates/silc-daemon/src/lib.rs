//! SILC daemon library
//!
//! The singleton supervisor that owns every session: in-memory registry,
//! `sessions.json` persistence, PID-file singleton enforcement, socket
//! reservation, bounded cleanup, resurrection, and the control-plane HTTP
//! API on the daemon port.

pub mod control;
pub mod pidfile;
pub mod procs;
pub mod registry;
pub mod store;
pub mod supervisor;

pub use pidfile::PidFile;
pub use registry::{Registry, SessionEntry};
pub use store::{SessionRecord, Store};
pub use supervisor::{CreateSessionRequest, Daemon, DaemonOptions};
