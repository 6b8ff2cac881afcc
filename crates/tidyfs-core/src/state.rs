//! Persisted per-rule execution statistics
//!
//! A small JSON file keyed by rule name, rewritten after every rule
//! execution. Loading is tolerant: a missing or unparseable file yields an
//! empty store with a warning, never a startup failure.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Stats for the most recent execution of one rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuleStats {
    /// Wall-clock start of the last run (RFC3339).
    pub last_run_at: DateTime<Utc>,
    /// Duration of the last run in nanoseconds.
    pub last_duration: u64,
    pub files_processed: u64,
    pub error_count: u64,
}

/// Store of per-rule stats backed by a JSON file.
///
/// Writes are serialized through an RwLock so that a future reader (the
/// `status` IPC handler snapshots the map) cannot observe a torn update.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, RuleStats>>,
}

impl StateStore {
    /// Platform default: `<config dir>/tidyfs/state.json`.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("tidyfs")
            .join("state.json")
    }

    /// Loads the store from `path`. Missing or corrupt files produce an
    /// empty store; corruption is logged as a warning.
    pub fn load(path: PathBuf) -> Self {
        let entries = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(map) => map,
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "State file is unparseable, starting with empty state"
                    );
                    BTreeMap::new()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "Cannot read state file, starting with empty state"
                );
                BTreeMap::new()
            }
        };

        Self { path, entries: RwLock::new(entries) }
    }

    /// Records the outcome of one rule execution and persists the file.
    pub fn update_rule_stats(
        &self,
        name: &str,
        run_at: DateTime<Utc>,
        duration: Duration,
        files_processed: u64,
        error_count: u64,
    ) -> anyhow::Result<()> {
        let stats = RuleStats {
            last_run_at: run_at,
            last_duration: duration.as_nanos() as u64,
            files_processed,
            error_count,
        };

        let snapshot = {
            let mut entries = self.entries.write().expect("state lock poisoned");
            entries.insert(name.to_string(), stats);
            entries.clone()
        };

        self.persist(&snapshot)
    }

    /// Returns the stats for one rule, if it has run before.
    pub fn get(&self, name: &str) -> Option<RuleStats> {
        self.entries.read().expect("state lock poisoned").get(name).cloned()
    }

    /// Snapshot of all entries, for status reporting.
    pub fn snapshot(&self) -> BTreeMap<String, RuleStats> {
        self.entries.read().expect("state lock poisoned").clone()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &BTreeMap<String, RuleStats>) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating state directory {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(entries).context("serializing state")?;
        std::fs::write(&self.path, json)
            .with_context(|| format!("writing state file {}", self.path.display()))?;
        debug!(path = %self.path.display(), rules = entries.len(), "State persisted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn state_path(dir: &TempDir) -> PathBuf {
        dir.path().join("state.json")
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::load(state_path(&dir));
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn test_load_garbage_is_empty() {
        let dir = TempDir::new().unwrap();
        let path = state_path(&dir);
        std::fs::write(&path, "{ not json").unwrap();

        let store = StateStore::load(path);
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn test_update_and_reload_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = state_path(&dir);
        let run_at = Utc::now();

        let store = StateStore::load(path.clone());
        store
            .update_rule_stats("downloads", run_at, Duration::from_millis(125), 7, 1)
            .unwrap();

        let reloaded = StateStore::load(path);
        let stats = reloaded.get("downloads").unwrap();
        assert_eq!(stats.files_processed, 7);
        assert_eq!(stats.error_count, 1);
        assert_eq!(stats.last_duration, 125_000_000);
        assert_eq!(stats.last_run_at.timestamp(), run_at.timestamp());
    }

    #[test]
    fn test_update_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/dir/state.json");

        let store = StateStore::load(path.clone());
        store.update_rule_stats("r", Utc::now(), Duration::ZERO, 0, 0).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_update_overwrites_existing_rule() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::load(state_path(&dir));

        store.update_rule_stats("r", Utc::now(), Duration::from_secs(1), 1, 0).unwrap();
        store.update_rule_stats("r", Utc::now(), Duration::from_secs(2), 5, 2).unwrap();

        let stats = store.get("r").unwrap();
        assert_eq!(stats.files_processed, 5);
        assert_eq!(stats.error_count, 2);
        assert_eq!(store.snapshot().len(), 1);
    }
}
