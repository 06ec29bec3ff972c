//! Persistent execution state (§3.3), `<log-dir>/execution_state.sh`.
//!
//! Adapted from the teacher's `orchestrator::state::StateManager`
//! (`src/orchestrator/state.rs`): same "small flat file the caller can grep"
//! philosophy, but the storage format moves from an append-only
//! `phase|iter|status|ts` log to a `KEY="VALUE"` shell-sourceable file
//! with atomic per-key replace-in-place writes, since §3.3 requires reads to
//! default missing keys to empty and writes to replace rather than append.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const STEPS: [&str; 6] = ["PREVIEW", "VALIDATE", "CROSSCHECK", "CATALOG", "RESTORE", "RECOVER"];

pub struct StateManager {
    path: PathBuf,
}

impl StateManager {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>> {
        let mut map = BTreeMap::new();
        if !self.path.exists() {
            return Ok(map);
        }
        let content = fs::read_to_string(&self.path).context("failed to read execution state")?;
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((k, v)) = line.split_once('=') {
                let v = v.trim_matches('"');
                map.insert(k.to_string(), v.to_string());
            }
        }
        Ok(map)
    }

    /// Read a single key, defaulting to empty string if absent (§3.3).
    pub fn get(&self, key: &str) -> String {
        self.read_all()
            .ok()
            .and_then(|m| m.get(key).cloned())
            .unwrap_or_default()
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key) == "1"
    }

    /// Atomic per-key write: read, filter out the old line for `key`,
    /// append the new line, rename into place (§3.3).
    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut map = self.read_all()?;
        map.insert(key.to_string(), value.to_string());
        self.write_all(&map)
    }

    pub fn set_many(&self, pairs: &[(&str, String)]) -> Result<()> {
        let mut map = self.read_all()?;
        for (k, v) in pairs {
            map.insert(k.to_string(), v.clone());
        }
        self.write_all(&map)
    }

    fn write_all(&self, map: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).ok();
        }
        let tmp_path = self.path.with_extension("sh.tmp");
        let mut f = fs::File::create(&tmp_path).context("failed to create state temp file")?;
        for (k, v) in map {
            writeln!(f, "{k}=\"{v}\"").context("failed to write state entry")?;
        }
        f.flush().ok();
        fs::rename(&tmp_path, &self.path).context("failed to atomically replace state file")?;
        Ok(())
    }

    pub fn reset(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path).context("failed to remove execution state")?;
        }
        Ok(())
    }

    /// Record a completed step's bookkeeping in one atomic write.
    pub fn record_step(
        &self,
        step: &str,
        exit_code: i32,
        log_path: &Path,
        duration_secs: u64,
        timestamp_epoch: i64,
    ) -> Result<()> {
        self.set_many(&[
            (&format!("{step}_COMPLETED"), if exit_code == 0 { "1" } else { "0" }.to_string()),
            (&format!("{step}_EXIT_CODE"), exit_code.to_string()),
            (&format!("{step}_LOG"), log_path.display().to_string()),
            (&format!("{step}_DURATION"), duration_secs.to_string()),
            (&format!("{step}_TIMESTAMP"), timestamp_epoch.to_string()),
        ])
    }

    pub fn is_completed(&self, step: &str) -> bool {
        self.get_bool(&format!("{step}_COMPLETED"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn p6_set_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let sm = StateManager::new(dir.path().join("execution_state.sh"));
        sm.set("DBID", "1234567890").unwrap();
        assert_eq!(sm.get("DBID"), "1234567890");
    }

    #[test]
    fn p6_second_set_replaces_single_line() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("execution_state.sh");
        let sm = StateManager::new(path.clone());
        sm.set("DBID", "1").unwrap();
        sm.set("DBID", "2").unwrap();
        assert_eq!(sm.get("DBID"), "2");
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().filter(|l| l.starts_with("DBID=")).count(), 1);
    }

    #[test]
    fn missing_key_defaults_to_empty() {
        let dir = tempdir().unwrap();
        let sm = StateManager::new(dir.path().join("execution_state.sh"));
        assert_eq!(sm.get("NOT_SET"), "");
    }

    #[test]
    fn record_step_writes_five_keys() {
        let dir = tempdir().unwrap();
        let sm = StateManager::new(dir.path().join("execution_state.sh"));
        sm.record_step("RESTORE", 0, Path::new("/tmp/05_restore.log"), 120, 1700000000)
            .unwrap();
        assert!(sm.is_completed("RESTORE"));
        assert_eq!(sm.get("RESTORE_EXIT_CODE"), "0");
        assert_eq!(sm.get("RESTORE_DURATION"), "120");
    }

    #[test]
    fn record_step_failure_marks_not_completed() {
        let dir = tempdir().unwrap();
        let sm = StateManager::new(dir.path().join("execution_state.sh"));
        sm.record_step("CATALOG", 1, Path::new("/tmp/x.log"), 5, 1700000000)
            .unwrap();
        assert!(!sm.is_completed("CATALOG"));
    }

    #[test]
    fn reset_removes_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("execution_state.sh");
        let sm = StateManager::new(path.clone());
        sm.set("X", "1").unwrap();
        assert!(path.exists());
        sm.reset().unwrap();
        assert!(!path.exists());
    }
}
