//! In-memory session registry.
//!
//! Dual index: port to entry, name to port. The daemon control plane is
//! the single writer; readers go through the supervisor's lock.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use silc_core::{Result, SilcError};

/// Registry entry for one session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionEntry {
    pub port: u16,
    pub name: String,
    pub session_id: String,
    pub shell_type: String,
    pub is_global: bool,
    pub cwd: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct Registry {
    by_port: BTreeMap<u16, SessionEntry>,
    by_name: HashMap<String, u16>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry; fails if the name or port is already taken.
    pub fn add(&mut self, entry: SessionEntry) -> Result<()> {
        if self.by_name.contains_key(&entry.name) {
            return Err(SilcError::NameExists(entry.name));
        }
        if self.by_port.contains_key(&entry.port) {
            return Err(SilcError::PortInUse(entry.port));
        }
        self.by_name.insert(entry.name.clone(), entry.port);
        self.by_port.insert(entry.port, entry);
        Ok(())
    }

    pub fn remove(&mut self, port: u16) -> Option<SessionEntry> {
        let entry = self.by_port.remove(&port)?;
        self.by_name.remove(&entry.name);
        Some(entry)
    }

    pub fn get(&self, port: u16) -> Option<&SessionEntry> {
        self.by_port.get(&port)
    }

    pub fn contains(&self, port: u16) -> bool {
        self.by_port.contains_key(&port)
    }

    /// Name lookup; touches `last_access` like every read-path API call.
    pub fn get_by_name(&mut self, name: &str) -> Option<SessionEntry> {
        let port = *self.by_name.get(name)?;
        let entry = self.by_port.get_mut(&port)?;
        entry.last_access = Utc::now();
        Some(entry.clone())
    }

    pub fn name_exists(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn touch(&mut self, port: u16) {
        if let Some(entry) = self.by_port.get_mut(&port) {
            entry.last_access = Utc::now();
        }
    }

    /// All entries sorted by port.
    pub fn list_all(&self) -> Vec<SessionEntry> {
        self.by_port.values().cloned().collect()
    }

    /// Drop entries idle past the timeout; returns the evicted ports.
    pub fn cleanup_timeout(&mut self, timeout_seconds: u64) -> Vec<u16> {
        let now = Utc::now();
        let expired: Vec<u16> = self
            .by_port
            .values()
            .filter(|entry| {
                (now - entry.last_access).num_seconds() > timeout_seconds as i64
            })
            .map(|entry| entry.port)
            .collect();

        for port in &expired {
            self.remove(*port);
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.by_port.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_port.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry(port: u16, name: &str) -> SessionEntry {
        SessionEntry {
            port,
            name: name.to_string(),
            session_id: format!("id-{port}"),
            shell_type: "bash".to_string(),
            is_global: false,
            cwd: None,
            created_at: Utc::now(),
            last_access: Utc::now(),
        }
    }

    #[test]
    fn test_add_and_lookup_by_both_indexes() {
        let mut registry = Registry::new();
        registry.add(entry(20000, "one")).unwrap();

        assert!(registry.contains(20000));
        assert!(registry.name_exists("one"));
        assert_eq!(registry.get(20000).unwrap().name, "one");
        assert_eq!(registry.get_by_name("one").unwrap().port, 20000);
    }

    #[test]
    fn test_duplicate_name_is_rejected() {
        let mut registry = Registry::new();
        registry.add(entry(20000, "one")).unwrap();

        let dup = registry.add(entry(20001, "one"));
        assert!(matches!(dup, Err(SilcError::NameExists(_))));
    }

    #[test]
    fn test_duplicate_port_is_rejected() {
        let mut registry = Registry::new();
        registry.add(entry(20000, "one")).unwrap();

        let dup = registry.add(entry(20000, "two"));
        assert!(matches!(dup, Err(SilcError::PortInUse(_))));
    }

    #[test]
    fn test_remove_clears_both_indexes() {
        let mut registry = Registry::new();
        registry.add(entry(20000, "one")).unwrap();
        registry.remove(20000);

        assert!(!registry.contains(20000));
        assert!(!registry.name_exists("one"));
        assert!(registry.get_by_name("one").is_none());
    }

    #[test]
    fn test_list_all_is_sorted_by_port() {
        let mut registry = Registry::new();
        registry.add(entry(20005, "five")).unwrap();
        registry.add(entry(20001, "one")).unwrap();
        registry.add(entry(20003, "three")).unwrap();

        let ports: Vec<u16> = registry.list_all().iter().map(|e| e.port).collect();
        assert_eq!(ports, vec![20001, 20003, 20005]);
    }

    #[test]
    fn test_get_by_name_touches_last_access() {
        let mut registry = Registry::new();
        let mut stale = entry(20000, "one");
        stale.last_access = Utc::now() - Duration::seconds(3600);
        registry.add(stale).unwrap();

        let touched = registry.get_by_name("one").unwrap();
        assert!((Utc::now() - touched.last_access).num_seconds() < 5);
    }

    #[test]
    fn test_cleanup_timeout_evicts_only_idle_entries() {
        let mut registry = Registry::new();
        let mut idle = entry(20000, "idle");
        idle.last_access = Utc::now() - Duration::seconds(4000);
        registry.add(idle).unwrap();
        registry.add(entry(20001, "fresh")).unwrap();

        let evicted = registry.cleanup_timeout(1800);
        assert_eq!(evicted, vec![20000]);
        assert!(!registry.contains(20000));
        assert!(registry.contains(20001));
    }
}
