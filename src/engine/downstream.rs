//! External post-processing tools invoked after all stages.

use std::path::Path;
use std::process::Command;

use tracing::info;

use crate::core::Config;
use crate::{BenchError, BenchResult};

pub const COMPLEXITY_SCRIPT: &str = "analyze_complexity.py";
pub const CONSOLIDATION_SCRIPT: &str = "consolidate_results.py";
pub const TABLES_SCRIPT: &str = "generate_tables.py";
pub const REPORT_SCRIPT: &str = "generate_report.py";

/// Scripts enabled by `config`, in execution order.
///
/// Consolidation supersedes the separate table and report generators.
pub fn enabled_scripts(config: &Config) -> Vec<&'static str> {
    let mut scripts = Vec::new();
    if config.run_complexity {
        scripts.push(COMPLEXITY_SCRIPT);
    }
    if config.run_consolidation {
        scripts.push(CONSOLIDATION_SCRIPT);
    } else {
        if config.run_tables {
            scripts.push(TABLES_SCRIPT);
        }
        if config.run_report {
            scripts.push(REPORT_SCRIPT);
        }
    }
    scripts
}

/// Run `<python> <tests_root>/<script>` with `tests_root` as working directory.
pub fn run_script(python: &Path, tests_root: &Path, script: &str) -> BenchResult<()> {
    let path = tests_root.join(script);
    if !path.is_file() {
        return Err(BenchError::Runner(format!(
            "Required script not found: {}",
            path.display()
        )));
    }

    info!("RUN   {script}");
    let status = Command::new(python)
        .arg(&path)
        .current_dir(tests_root)
        .status()
        .map_err(|e| BenchError::Runner(format!("failed to spawn {}: {e}", python.display())))?;

    if !status.success() {
        let rc = status
            .code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        return Err(BenchError::Runner(format!("Script failed ({rc}): {script}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::parse_config;

    fn outputs(complexity: bool, consolidation: bool, tables: bool, report: bool) -> Config {
        let text = format!(
            r#"
run: {{include_benchmarks: true, include_correctness: false, repeats: 1, warmup_iterations: 0,
      measured_iterations: 1, batch_min_elapsed_ns: 1, batch_max_calls: 1, heartbeat_seconds: 1}}
selection: {{hosts: [go], pairs: [], mechanisms: [metaffi]}}
execution: {{rerun_existing: true, fail_fast: true, default_timeout_seconds: 1,
            java_metaffi_timeout_seconds: 1}}
outputs: {{canonical_results_dir: out, repeat_root_dir: out/repeats, write_repeat_files: true,
          run_complexity: {complexity}, run_consolidation: {consolidation}, run_tables: {tables},
          run_report: {report}}}
"#
        );
        let doc: serde_yaml::Value = serde_yaml::from_str(&text).unwrap();
        parse_config(&doc, Path::new("/repo")).unwrap()
    }

    #[test]
    fn test_consolidation_supersedes_tables_and_report() {
        assert_eq!(
            enabled_scripts(&outputs(true, true, true, true)),
            vec![COMPLEXITY_SCRIPT, CONSOLIDATION_SCRIPT]
        );
        assert_eq!(
            enabled_scripts(&outputs(false, false, true, true)),
            vec![TABLES_SCRIPT, REPORT_SCRIPT]
        );
        assert!(enabled_scripts(&outputs(false, false, false, false)).is_empty());
    }

    #[test]
    fn test_missing_script_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = run_script(Path::new("python3"), dir.path(), TABLES_SCRIPT).unwrap_err();
        assert!(err.to_string().starts_with("Required script not found"));
    }

    #[cfg(unix)]
    #[test]
    fn test_script_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ok.py"), "").unwrap();
        std::fs::write(dir.path().join("bad.py"), "exit 3\n").unwrap();
        // sh stands in for the interpreter
        run_script(Path::new("sh"), dir.path(), "ok.py").unwrap();
        let err = run_script(Path::new("sh"), dir.path(), "bad.py").unwrap_err();
        assert_eq!(err.to_string(), "Script failed (3): bad.py");
    }
}
