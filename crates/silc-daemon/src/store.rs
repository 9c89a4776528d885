//! `sessions.json` persistence for daemon restarts.
//!
//! An ordered JSON array of session records. Writes are append-or-replace
//! on a port-or-name match; deletions are by port. Reads tolerate a
//! missing or mangled file, and every write is best-effort: resurrection
//! handles whatever state the file is actually in.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// One persisted session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub port: u16,
    pub name: String,
    pub session_id: String,
    pub shell: String,
    #[serde(default)]
    pub is_global: bool,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Store {
    path: PathBuf,
}

impl Store {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join("sessions.json"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read all records; missing or unparsable files read as empty.
    pub fn load(&self) -> Vec<SessionRecord> {
        let Ok(raw) = std::fs::read_to_string(&self.path) else {
            return Vec::new();
        };
        match serde_json::from_str(&raw) {
            Ok(records) => records,
            Err(e) => {
                warn!("Ignoring unparsable {}: {e}", self.path.display());
                Vec::new()
            }
        }
    }

    /// Insert or replace the record matching on port *or* name.
    pub fn upsert(&self, record: SessionRecord) {
        let mut records = self.load();
        if let Some(existing) = records
            .iter_mut()
            .find(|r| r.port == record.port || r.name == record.name)
        {
            *existing = record;
        } else {
            records.push(record);
        }
        self.write(&records);
    }

    /// Remove the record for a port, if present.
    pub fn remove(&self, port: u16) {
        let mut records = self.load();
        let before = records.len();
        records.retain(|r| r.port != port);
        if records.len() != before {
            self.write(&records);
        }
    }

    fn write(&self, records: &[SessionRecord]) {
        let Ok(serialized) = serde_json::to_string_pretty(records) else {
            return;
        };
        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        // Atomic replace so a crash mid-write never corrupts the file.
        let tmp = self.path.with_extension("json.tmp");
        if std::fs::write(&tmp, serialized).is_ok() {
            let _ = std::fs::rename(&tmp, &self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(port: u16, name: &str) -> SessionRecord {
        SessionRecord {
            port,
            name: name.to_string(),
            session_id: format!("id-{port}"),
            shell: "bash".to_string(),
            is_global: false,
            cwd: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_upsert_appends_new_records_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());

        store.upsert(record(20000, "one"));
        store.upsert(record(20001, "two"));

        let names: Vec<String> = store.load().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["one", "two"]);
    }

    #[test]
    fn test_upsert_replaces_on_port_match() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());

        store.upsert(record(20000, "one"));
        store.upsert(record(20000, "renamed"));

        let records = store.load();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "renamed");
    }

    #[test]
    fn test_upsert_replaces_on_name_match() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());

        store.upsert(record(20000, "one"));
        // Same name resurrected on a different port.
        store.upsert(record(20005, "one"));

        let records = store.load();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].port, 20005);
    }

    #[test]
    fn test_remove_deletes_by_port() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());

        store.upsert(record(20000, "one"));
        store.upsert(record(20001, "two"));
        store.remove(20000);

        let records = store.load();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "two");
    }

    #[test]
    fn test_mangled_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());
        std::fs::write(store.path(), "not json at all").unwrap();

        assert!(store.load().is_empty());
    }

    #[test]
    fn test_records_round_trip_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());
        let mut original = record(20000, "alpha-wolf-7");
        original.cwd = Some(PathBuf::from("/tmp"));
        original.is_global = true;

        store.upsert(original.clone());
        assert_eq!(store.load(), vec![original]);
    }
}
