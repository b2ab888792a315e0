//! Persistence: the resume ledger, outcome CSV export and whole-document
//! atomic JSON writes.

pub mod csv;
pub mod resume;

use std::io::Write;
use std::path::Path;

use serde::Serialize;

use crate::{BenchError, BenchResult};

// Re-export key types
pub use csv::{OUTCOME_CSV_HEADERS, OutcomeCsvExporter};
pub use resume::{RESUME_STATE_VERSION, ResumeState, ResumeStateStore, resume_state_path};

/// Serialize `value` as pretty JSON and replace `path` with it.
///
/// The document is written to a temporary file in the target directory and
/// renamed over the destination, so readers never observe a partial file.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> BenchResult<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(|e| {
        BenchError::Runner(format!("failed to create directory {}: {e}", dir.display()))
    })?;

    let json = serde_json::to_vec_pretty(value)
        .map_err(|e| BenchError::Runner(format!("failed to serialize {}: {e}", path.display())))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| {
        BenchError::Runner(format!("failed to create temp file in {}: {e}", dir.display()))
    })?;
    tmp.write_all(&json)
        .and_then(|_| tmp.write_all(b"\n"))
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| BenchError::Runner(format!("failed to write {}: {e}", path.display())))?;
    tmp.persist(path).map_err(|e| {
        BenchError::Runner(format!("failed to replace {}: {}", path.display(), e.error))
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atomic_write_creates_parents_and_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/doc.json");

        write_json_atomic(&path, &serde_json::json!({"v": 1})).unwrap();
        write_json_atomic(&path, &serde_json::json!({"v": 2})).unwrap();

        let v: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(v["v"], 2);

        // only the target remains; no temp files left behind
        let entries: Vec<_> = std::fs::read_dir(path.parent().unwrap()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }
}
