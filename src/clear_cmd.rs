//! `xlang-bench --clear-config <path>`: remove every artifact a config produced.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::core::{config_stem, load_config};
use crate::run_cmd::resolve_roots;
use crate::storage::resume_state_path;
use crate::{BenchError, BenchResult};

/// What a clear removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClearReport {
    pub config_path: PathBuf,
    pub state_files: usize,
    pub session_dirs: usize,
    pub canonical_files: usize,
}

impl ClearReport {
    pub fn render(&self) -> String {
        let mut out = String::from("Cleared config artifacts:\n");
        out.push_str(&format!("  Config: {}\n", self.config_path.display()));
        out.push_str(&format!("  State files removed: {}\n", self.state_files));
        out.push_str(&format!(
            "  Repeat session directories removed: {}\n",
            self.session_dirs
        ));
        out.push_str(&format!(
            "  Canonical result files removed: {}\n",
            self.canonical_files
        ));
        out
    }
}

/// Remove the resume ledger, the session directories and the canonical
/// result files belonging to the config at `config_path`.
pub fn clear(config_path: &Path, tests_root: &Path, repo_root: Option<&Path>) -> BenchResult<ClearReport> {
    let (_, repo_root) = resolve_roots(tests_root, repo_root)?;
    let config = load_config(config_path, &repo_root)?;
    let stem = config_stem(config_path)?;

    let mut report = ClearReport {
        config_path: config_path.to_path_buf(),
        ..ClearReport::default()
    };

    let state = resume_state_path(&config.repeat_root_dir, &stem);
    if state.is_file() {
        remove_file(&state)?;
        report.state_files += 1;
    }

    if config.repeat_root_dir.is_dir() {
        let suffix = format!("__{stem}");
        let entries = std::fs::read_dir(&config.repeat_root_dir).map_err(|e| {
            BenchError::Runner(format!(
                "failed to list {}: {e}",
                config.repeat_root_dir.display()
            ))
        })?;
        for entry in entries {
            let entry = entry.map_err(|e| BenchError::Runner(format!("failed to read dir entry: {e}")))?;
            let path = entry.path();
            let matches = entry.file_name().to_string_lossy().ends_with(&suffix);
            if matches && path.is_dir() {
                debug!("removing session {}", path.display());
                std::fs::remove_dir_all(&path).map_err(|e| {
                    BenchError::Runner(format!("failed to remove {}: {e}", path.display()))
                })?;
                report.session_dirs += 1;
            }
        }
    }

    for triple in config.selected_triples()? {
        let canonical = config.canonical_results_dir.join(triple.result_filename());
        if canonical.is_file() {
            remove_file(&canonical)?;
            report.canonical_files += 1;
        }
    }

    Ok(report)
}

fn remove_file(path: &Path) -> BenchResult<()> {
    std::fs::remove_file(path)
        .map_err(|e| BenchError::Runner(format!("failed to remove {}: {e}", path.display())))
}

pub fn run(config_path: &Path, tests_root: &Path, repo_root: Option<&Path>) -> BenchResult<()> {
    let report = clear(config_path, tests_root, repo_root)?;
    print!("{}", report.render());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render() {
        let r = ClearReport {
            config_path: PathBuf::from("cfg/quick.yaml"),
            state_files: 1,
            session_dirs: 2,
            canonical_files: 0,
        };
        let text = r.render();
        assert!(text.starts_with("Cleared config artifacts:\n"));
        assert!(text.contains("  Repeat session directories removed: 2\n"));
        assert!(text.contains("  Canonical result files removed: 0\n"));
    }
}
