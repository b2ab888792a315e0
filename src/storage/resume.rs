//! Resume ledger keyed by the SHA-256 of the config file bytes.
//!
//! The ledger records, per triple, whether correctness passed and, per
//! (triple, repeat), the raw result file of a successful benchmark repeat.
//! Every mutation is followed by a whole-document atomic rewrite.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use super::write_json_atomic;
use crate::core::Triple;
use crate::{BenchError, BenchResult};

pub const RESUME_STATE_VERSION: u32 = 1;

/// `<repeat_root_dir>/_state/<config_stem>.json`
pub fn resume_state_path(repeat_root_dir: &Path, config_stem: &str) -> PathBuf {
    repeat_root_dir.join("_state").join(format!("{config_stem}.json"))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeState {
    pub version: u32,
    pub config_sha256: String,
    pub config_path: String,
    /// triple key -> repeat index -> raw result file
    pub benchmarks: BTreeMap<String, BTreeMap<u32, PathBuf>>,
    /// triple key -> correctness passed
    pub correctness: BTreeMap<String, bool>,
}

impl ResumeState {
    pub fn fresh(config_sha256: &str, config_path: &Path) -> Self {
        ResumeState {
            version: RESUME_STATE_VERSION,
            config_sha256: config_sha256.to_string(),
            config_path: config_path.display().to_string(),
            benchmarks: BTreeMap::new(),
            correctness: BTreeMap::new(),
        }
    }

    pub fn correctness_passed(&self, triple: &Triple) -> bool {
        self.correctness.get(&triple.key()).copied().unwrap_or(false)
    }

    pub fn repeat_file(&self, triple: &Triple, repeat: u32) -> Option<&Path> {
        self.benchmarks
            .get(&triple.key())
            .and_then(|m| m.get(&repeat))
            .map(PathBuf::as_path)
    }
}

/// File-backed owner of a [`ResumeState`].
#[derive(Debug)]
pub struct ResumeStateStore {
    path: PathBuf,
    state: ResumeState,
}

impl ResumeStateStore {
    /// Load the ledger at `path`.
    ///
    /// A missing file or a file stamped with a different config hash yields a
    /// fresh ledger. Malformed JSON, an unknown version or a malformed body
    /// under a matching hash are errors.
    pub fn load(path: &Path, expected_hash: &str, config_path: &Path) -> BenchResult<Self> {
        let fresh = || ResumeStateStore {
            path: path.to_path_buf(),
            state: ResumeState::fresh(expected_hash, config_path),
        };

        if !path.is_file() {
            return Ok(fresh());
        }

        let bytes = std::fs::read(path).map_err(|e| {
            BenchError::Runner(format!("failed to read resume state {}: {e}", path.display()))
        })?;
        let raw: Value = serde_json::from_slice(&bytes).map_err(|e| {
            BenchError::Runner(format!("malformed resume state JSON {}: {e}", path.display()))
        })?;
        let obj = raw.as_object().ok_or_else(|| {
            BenchError::Runner(format!(
                "malformed resume state (expected object): {}",
                path.display()
            ))
        })?;

        let version = obj.get("version").and_then(Value::as_u64);
        if version != Some(u64::from(RESUME_STATE_VERSION)) {
            return Err(BenchError::Runner(format!(
                "unsupported resume state version in {}: {}",
                path.display(),
                obj.get("version").cloned().unwrap_or(Value::Null)
            )));
        }

        if obj.get("config_sha256").and_then(Value::as_str) != Some(expected_hash) {
            warn!(
                "resume state {} belongs to different config content; starting fresh",
                path.display()
            );
            return Ok(fresh());
        }

        let state: ResumeState = serde_json::from_value(raw).map_err(|e| {
            BenchError::Runner(format!("malformed resume state content in {}: {e}", path.display()))
        })?;
        Ok(ResumeStateStore {
            path: path.to_path_buf(),
            state,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> &ResumeState {
        &self.state
    }

    /// Full-document overwrite of the ledger file.
    pub fn save(&self) -> BenchResult<()> {
        write_json_atomic(&self.path, &self.state)
    }

    pub fn mark_correctness_passed(&mut self, triple: &Triple) -> BenchResult<()> {
        self.state.correctness.insert(triple.key(), true);
        self.save()
    }

    pub fn record_repeat(&mut self, triple: &Triple, repeat: u32, file: &Path) -> BenchResult<()> {
        let file = std::fs::canonicalize(file).unwrap_or_else(|_| file.to_path_buf());
        self.state
            .benchmarks
            .entry(triple.key())
            .or_default()
            .insert(repeat, file);
        self.save()
    }

    /// Drop a repeat entry whose file vanished.
    pub fn forget_repeat(&mut self, triple: &Triple, repeat: u32) -> BenchResult<()> {
        let removed = self
            .state
            .benchmarks
            .get_mut(&triple.key())
            .and_then(|m| m.remove(&repeat))
            .is_some();
        if removed {
            self.save()?;
        }
        Ok(())
    }

    /// A previously recorded raw file for this exact repeat that still exists.
    pub fn reusable_repeat(&self, triple: &Triple, repeat: u32) -> Option<PathBuf> {
        self.state
            .repeat_file(triple, repeat)
            .filter(|p| p.is_file())
            .map(Path::to_path_buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Lang, Mechanism};

    fn triple() -> Triple {
        Triple::new(Lang::Go, Lang::Python3, Mechanism::Metaffi)
    }

    #[test]
    fn test_missing_file_gives_fresh_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = resume_state_path(dir.path(), "nightly");
        let store = ResumeStateStore::load(&path, "abc", Path::new("cfg.yaml")).unwrap();
        assert_eq!(store.state().config_sha256, "abc");
        assert!(store.state().benchmarks.is_empty());
        assert!(!path.exists());
    }

    #[test]
    fn test_roundtrip_and_hash_invalidation() {
        let dir = tempfile::tempdir().unwrap();
        let path = resume_state_path(dir.path(), "nightly");
        let raw = dir.path().join("run_01.json");
        std::fs::write(&raw, "{}").unwrap();

        let mut store = ResumeStateStore::load(&path, "abc", Path::new("cfg.yaml")).unwrap();
        store.mark_correctness_passed(&triple()).unwrap();
        store.record_repeat(&triple(), 1, &raw).unwrap();

        let same = ResumeStateStore::load(&path, "abc", Path::new("cfg.yaml")).unwrap();
        assert!(same.state().correctness_passed(&triple()));
        assert!(same.reusable_repeat(&triple(), 1).is_some());
        assert!(same.reusable_repeat(&triple(), 2).is_none());

        let changed = ResumeStateStore::load(&path, "def", Path::new("cfg.yaml")).unwrap();
        assert!(!changed.state().correctness_passed(&triple()));
        assert_eq!(changed.state().config_sha256, "def");
    }

    #[test]
    fn test_vanished_file_is_not_reusable() {
        let dir = tempfile::tempdir().unwrap();
        let path = resume_state_path(dir.path(), "s");
        let raw = dir.path().join("gone.json");
        std::fs::write(&raw, "{}").unwrap();

        let mut store = ResumeStateStore::load(&path, "h", Path::new("c")).unwrap();
        store.record_repeat(&triple(), 3, &raw).unwrap();
        std::fs::remove_file(&raw).unwrap();

        assert!(store.reusable_repeat(&triple(), 3).is_none());
        store.forget_repeat(&triple(), 3).unwrap();
        assert!(store.state().repeat_file(&triple(), 3).is_none());
    }

    #[test]
    fn test_malformed_states_are_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        std::fs::write(&path, "{not json").unwrap();
        let err = ResumeStateStore::load(&path, "h", Path::new("c")).unwrap_err();
        assert!(err.to_string().contains("malformed resume state JSON"));

        std::fs::write(&path, r#"{"version": 7, "config_sha256": "h"}"#).unwrap();
        let err = ResumeStateStore::load(&path, "h", Path::new("c")).unwrap_err();
        assert!(err.to_string().contains("unsupported resume state version"));

        std::fs::write(
            &path,
            r#"{"version": 1, "config_sha256": "h", "config_path": "c",
                "benchmarks": [], "correctness": {}}"#,
        )
        .unwrap();
        let err = ResumeStateStore::load(&path, "h", Path::new("c")).unwrap_err();
        assert!(err.to_string().contains("malformed resume state content"));

        // same malformed body under a different hash is simply discarded
        let store = ResumeStateStore::load(&path, "other", Path::new("c")).unwrap();
        assert!(store.state().benchmarks.is_empty());
    }
}
