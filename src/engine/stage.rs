//! One stage invocation: command resolution, supervision and the result-file check.

use std::path::Path;

use crate::{BenchError, BenchResult};
use crate::core::{ScenarioKey, Stage, StageOutcome, Triple};

use super::command::StageCommandBuilder;
use super::supervisor::ProcessSupervisor;

/// Reason recorded for stages without any command.
pub const NOOP_REASON: &str = "(no-op)";

/// Runs single stages of single triples.
pub struct StageRunner<'a> {
    builder: StageCommandBuilder<'a>,
    supervisor: &'a ProcessSupervisor,
}

impl<'a> StageRunner<'a> {
    pub fn new(builder: StageCommandBuilder<'a>, supervisor: &'a ProcessSupervisor) -> Self {
        StageRunner {
            builder,
            supervisor,
        }
    }

    /// Run `stage` of `triple`.
    ///
    /// Returns `Err` only when the stage cannot be set up (missing test
    /// directory, missing companion tool). Child failures are `FAIL` outcomes;
    /// a benchmark that exits cleanly without writing `result_path` fails too.
    pub fn run(
        &self,
        triple: &Triple,
        stage: Stage,
        repeat_index: Option<u32>,
        result_path: Option<&Path>,
        scenarios: &[ScenarioKey],
    ) -> BenchResult<StageOutcome> {
        let spec = self.builder.build(triple, stage, result_path, scenarios)?;
        if spec.is_noop() {
            return Ok(StageOutcome::skip(*triple, stage, repeat_index, NOOP_REASON));
        }

        if let Some(path) = result_path {
            // a leftover from an earlier attempt must not pass for fresh output
            if path.is_file() {
                std::fs::remove_file(path).map_err(|e| {
                    BenchError::Runner(format!(
                        "failed to remove stale result file {}: {e}",
                        path.display()
                    ))
                })?;
            }
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    BenchError::Runner(format!(
                        "failed to create directory {}: {e}",
                        parent.display()
                    ))
                })?;
            }
        }

        let mut outcome = self.supervisor.run(triple, stage, repeat_index, &spec);

        if stage == Stage::Benchmark && !outcome.is_fail() {
            if let Some(path) = result_path.filter(|p| !p.is_file()) {
                let elapsed = std::time::Duration::from_secs_f64(outcome.elapsed_seconds);
                let peak = outcome.peak_rss_bytes;
                outcome = StageOutcome::fail(
                    *triple,
                    stage,
                    repeat_index,
                    elapsed,
                    outcome.command_display,
                    format!("No result file produced: {}", path.display()),
                );
                outcome.peak_rss_bytes = peak;
            }
        }
        Ok(outcome)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::core::config::parse_config;
    use crate::core::{Lang, Mechanism, OutcomeStatus};
    use crate::engine::command::Workspace;
    use crate::engine::toolchain::ToolPaths;
    use std::os::unix::fs::PermissionsExt;
    use std::time::Duration;

    fn config(root: &Path) -> crate::core::Config {
        let text = r#"
run: {include_benchmarks: true, include_correctness: true, repeats: 1, warmup_iterations: 0,
      measured_iterations: 3, batch_min_elapsed_ns: 1, batch_max_calls: 1, heartbeat_seconds: 30}
selection: {hosts: [go], pairs: [], mechanisms: [metaffi, cpython]}
execution: {rerun_existing: true, fail_fast: true, default_timeout_seconds: 10,
            java_metaffi_timeout_seconds: 10}
outputs: {canonical_results_dir: out, repeat_root_dir: out/repeats, write_repeat_files: true,
          run_complexity: false, run_consolidation: false, run_tables: false, run_report: false}
"#;
        let doc: serde_yaml::Value = serde_yaml::from_str(text).unwrap();
        parse_config(&doc, root).unwrap()
    }

    fn fake_go(dir: &Path, body: &str) -> std::path::PathBuf {
        let path = dir.join("fake-go");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn test_stage_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let ws = Workspace::new(dir.path(), dir.path());
        let managed = Triple::new(Lang::Go, Lang::Python3, Mechanism::Metaffi);
        let native = Triple::new(Lang::Go, Lang::Python3, Mechanism::Cpython);
        std::fs::create_dir_all(ws.test_directory(&managed)).unwrap();
        std::fs::create_dir_all(ws.test_directory(&native)).unwrap();
        let supervisor = ProcessSupervisor::new().with_poll_interval(Duration::from_millis(10));
        let out = dir.path().join("raw/r.json");

        // correctness of a native binding has nothing to run
        let tools = ToolPaths::new().with_go(fake_go(dir.path(), "exit 0"));
        let runner = StageRunner::new(StageCommandBuilder::new(&cfg, &ws, &tools), &supervisor);
        let o = runner.run(&native, Stage::Correctness, None, None, &[]).unwrap();
        assert_eq!(o.status, OutcomeStatus::Skip);
        assert_eq!(o.command_display, NOOP_REASON);

        // clean exit without a result file
        let o = runner.run(&managed, Stage::Benchmark, Some(1), Some(&out), &[]).unwrap();
        assert_eq!(o.status, OutcomeStatus::Fail);
        assert!(o.error.unwrap().starts_with("No result file produced"));

        // result file written through the environment overlay
        let tools = ToolPaths::new().with_go(fake_go(
            dir.path(),
            "echo '{\"benchmarks\": []}' > \"$METAFFI_TEST_RESULTS_FILE\"",
        ));
        let runner = StageRunner::new(StageCommandBuilder::new(&cfg, &ws, &tools), &supervisor);
        let o = runner.run(&managed, Stage::Benchmark, Some(1), Some(&out), &[]).unwrap();
        assert_eq!(o.status, OutcomeStatus::Pass);
        assert!(out.is_file());
    }
}
