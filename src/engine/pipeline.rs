//! The end-to-end run: correctness, repeated benchmarks, aggregation and
//! downstream tools.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use crate::aggregate::{
    AggregationContext, RepeatInput, load_canonical, merge_into_canonical, write_canonical,
};
use crate::core::{
    Config, EnvironmentInfo, OutcomeStatus, ScenarioKey, Stage, StageOutcome, Triple, config_stem,
};
use crate::report::{RunSummary, log_outcome};
use crate::storage::{OutcomeCsvExporter, ResumeStateStore, resume_state_path, write_json_atomic};
use crate::{BenchError, BenchResult, sha256_hex, utc_timestamp};

use super::command::{StageCommandBuilder, Workspace};
use super::downstream::{enabled_scripts, run_script};
use super::repeat::{RESUME_REASON, RepeatRunner};
use super::stage::StageRunner;
use super::supervisor::ProcessSupervisor;
use super::toolchain::ToolPaths;

/// Reason recorded for benchmark targets that already have canonical results.
pub const EXISTING_REASON: &str = "(existing canonical result)";

pub const SESSION_FILE: &str = "session.json";
pub const OUTCOMES_CSV: &str = "outcomes.csv";

/// `<YYYYMMDD_HHMMSS>__<config_stem>` in local time.
pub fn new_run_id(config_stem: &str) -> String {
    let now = time::OffsetDateTime::now_local().unwrap_or_else(|_| time::OffsetDateTime::now_utc());
    format!(
        "{:04}{:02}{:02}_{:02}{:02}{:02}__{config_stem}",
        now.year(),
        u8::from(now.month()),
        now.day(),
        now.hour(),
        now.minute(),
        now.second()
    )
}

#[derive(Debug, Serialize)]
struct SessionRecord<'a> {
    run_id: &'a str,
    config_path: String,
    config_sha256: &'a str,
    started_at: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    scenarios: Vec<String>,
    environment: EnvironmentInfo,
}

/// Result of a completed run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub outcomes: Vec<StageOutcome>,
    pub elapsed: Duration,
    /// Session directory holding the repeat files, when they were persisted.
    pub session_dir: Option<PathBuf>,
    pub canonical_dir: PathBuf,
}

impl RunReport {
    pub fn summary(&self) -> RunSummary<'_> {
        RunSummary {
            outcomes: &self.outcomes,
            elapsed: self.elapsed,
            repeat_dir: self.session_dir.clone(),
            canonical_dir: self.canonical_dir.clone(),
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.summary().exit_code()
    }
}

/// Drives one configured run from start to finish.
pub struct PipelineDriver<'a> {
    config: &'a Config,
    config_path: PathBuf,
    config_sha256: String,
    config_stem: String,
    workspace: &'a Workspace,
    tools: &'a ToolPaths,
    supervisor: ProcessSupervisor,
    scenarios: Vec<ScenarioKey>,
}

impl<'a> PipelineDriver<'a> {
    /// `config_path` is hashed for the resume ledger and names the session.
    pub fn new(
        config: &'a Config,
        config_path: &Path,
        workspace: &'a Workspace,
        tools: &'a ToolPaths,
    ) -> BenchResult<Self> {
        let bytes = std::fs::read(config_path).map_err(|e| {
            BenchError::Config(format!("failed to read {}: {e}", config_path.display()))
        })?;
        Ok(PipelineDriver {
            config,
            config_path: std::fs::canonicalize(config_path)
                .unwrap_or_else(|_| config_path.to_path_buf()),
            config_sha256: sha256_hex(&bytes),
            config_stem: config_stem(config_path)?,
            workspace,
            tools,
            supervisor: ProcessSupervisor::new(),
            scenarios: Vec::new(),
        })
    }

    pub fn with_supervisor(mut self, supervisor: ProcessSupervisor) -> Self {
        self.supervisor = supervisor;
        self
    }

    /// Enable scenario-merge mode for the given selectors.
    pub fn with_scenarios(mut self, scenarios: Vec<ScenarioKey>) -> Self {
        self.scenarios = scenarios;
        self
    }

    fn scenario_mode(&self) -> bool {
        !self.scenarios.is_empty()
    }

    fn canonical_file(&self, triple: &Triple) -> PathBuf {
        self.config
            .canonical_results_dir
            .join(triple.result_filename())
    }

    /// Execute the run.
    ///
    /// `Err` means a fatal condition; outcomes gathered up to that point are
    /// still exported to the session's `outcomes.csv`.
    pub fn run(&self) -> BenchResult<RunReport> {
        let started = Instant::now();
        let run_id = new_run_id(&self.config_stem);
        let mut outcomes = Vec::new();
        let mut session_dir = None;

        let result = self.execute(&run_id, &mut outcomes, &mut session_dir);

        if let Some(dir) = &session_dir {
            let exported = OutcomeCsvExporter::new().export(&outcomes, &dir.join(OUTCOMES_CSV));
            match (&result, exported) {
                (Ok(()), Err(e)) => return Err(e),
                (Err(_), Err(e)) => warn!("could not export outcomes: {e}"),
                _ => {}
            }
        }
        result?;

        Ok(RunReport {
            run_id,
            outcomes,
            elapsed: started.elapsed(),
            session_dir,
            canonical_dir: self.config.canonical_results_dir.clone(),
        })
    }

    fn execute(
        &self,
        run_id: &str,
        outcomes: &mut Vec<StageOutcome>,
        session_dir: &mut Option<PathBuf>,
    ) -> BenchResult<()> {
        let cfg = self.config;
        let selected = cfg.selected_triples()?;

        info!("Config: {}", self.config_path.display());
        info!("Run id: {run_id}");
        info!(
            "Triples: {} | correctness={} benchmarks={} repeats={}",
            selected.len(),
            cfg.include_correctness,
            cfg.include_benchmarks,
            cfg.repeats
        );
        if self.scenario_mode() {
            let selectors: Vec<String> = self.scenarios.iter().map(ScenarioKey::selector).collect();
            info!("Scenario rerun: {}", selectors.join(", "));
        }

        let targets = if cfg.include_benchmarks {
            self.benchmark_targets(&selected, outcomes)?
        } else {
            Vec::new()
        };

        let mut store = ResumeStateStore::load(
            &resume_state_path(&cfg.repeat_root_dir, &self.config_stem),
            &self.config_sha256,
            &self.config_path,
        )?;

        let stages = StageRunner::new(
            StageCommandBuilder::new(cfg, self.workspace, self.tools),
            &self.supervisor,
        );

        if cfg.include_correctness {
            self.run_correctness(&stages, &selected, &mut store, outcomes)?;
        }

        if !targets.is_empty() {
            self.run_benchmarks(&stages, &targets, &mut store, run_id, outcomes, session_dir)?;
        }

        for script in enabled_scripts(cfg) {
            run_script(self.tools.python(), self.workspace.tests_root(), script)?;
        }
        Ok(())
    }

    /// Triples whose benchmarks run in this session.
    ///
    /// Outside scenario mode and with `rerun_existing=false`, a triple with a
    /// canonical result is skipped. In scenario mode every target must
    /// already have a readable canonical file.
    fn benchmark_targets(
        &self,
        selected: &[Triple],
        outcomes: &mut Vec<StageOutcome>,
    ) -> BenchResult<Vec<Triple>> {
        let mut targets = Vec::with_capacity(selected.len());
        for triple in selected {
            let canonical = self.canonical_file(triple);
            if self.scenario_mode() {
                load_canonical(&canonical)?;
            } else if !self.config.rerun_existing && canonical.is_file() {
                let out = StageOutcome::skip(*triple, Stage::Benchmark, None, EXISTING_REASON);
                log_outcome(&out);
                outcomes.push(out);
                continue;
            }
            targets.push(*triple);
        }
        Ok(targets)
    }

    fn run_correctness(
        &self,
        stages: &StageRunner<'_>,
        selected: &[Triple],
        store: &mut ResumeStateStore,
        outcomes: &mut Vec<StageOutcome>,
    ) -> BenchResult<()> {
        let total = selected.len();
        for (i, triple) in selected.iter().enumerate() {
            if store.state().correctness_passed(triple) {
                let out = StageOutcome::skip(*triple, Stage::Correctness, None, RESUME_REASON);
                log_outcome(&out);
                outcomes.push(out);
                continue;
            }

            info!("RUN   [{}/{total}] {triple} stage=correctness", i + 1);
            let out = stages.run(triple, Stage::Correctness, None, None, &[])?;
            log_outcome(&out);
            let failed = out.is_fail();
            let passed = out.status == OutcomeStatus::Pass;
            outcomes.push(out);

            if passed {
                store.mark_correctness_passed(triple)?;
            } else if failed && self.config.fail_fast {
                return Err(BenchError::Runner(format!(
                    "Fail-fast: correctness stage failed for {triple}"
                )));
            }
        }
        Ok(())
    }

    fn run_benchmarks(
        &self,
        stages: &StageRunner<'_>,
        targets: &[Triple],
        store: &mut ResumeStateStore,
        run_id: &str,
        outcomes: &mut Vec<StageOutcome>,
        session_dir: &mut Option<PathBuf>,
    ) -> BenchResult<()> {
        let cfg = self.config;

        let resume_benchmarks = cfg.write_repeat_files && !self.scenario_mode();
        if !resume_benchmarks {
            let reason = if self.scenario_mode() {
                "scenario rerun requires fresh execution"
            } else {
                "write_repeat_files=false"
            };
            info!("NOTE: benchmark resume disabled ({reason})");
        }

        // raw files live either in the persisted session or in a scratch dir
        let mut scratch = None;
        let raw_root = if cfg.write_repeat_files {
            let dir = cfg.repeat_root_dir.join(run_id);
            self.write_session_record(&dir, run_id)?;
            *session_dir = Some(dir.clone());
            dir
        } else {
            let tmp = tempfile::Builder::new()
                .prefix("xlang-bench-")
                .tempdir()
                .map_err(|e| BenchError::Runner(format!("failed to create temp dir: {e}")))?;
            let path = tmp.path().to_path_buf();
            scratch = Some(tmp);
            path
        };

        let repeats = RepeatRunner::new(stages, &raw_root, cfg.repeats)
            .with_fail_fast(cfg.fail_fast)
            .with_scenarios(&self.scenarios);
        let resume = if resume_benchmarks { Some(store) } else { None };
        let inputs = repeats.run(targets, resume, outcomes)?;

        self.aggregate(targets, &inputs, run_id, outcomes)?;
        drop(scratch);
        Ok(())
    }

    fn aggregate(
        &self,
        targets: &[Triple],
        inputs: &BTreeMap<Triple, Vec<RepeatInput>>,
        run_id: &str,
        outcomes: &mut Vec<StageOutcome>,
    ) -> BenchResult<()> {
        let cfg = self.config;
        let ctx = AggregationContext {
            config: cfg,
            run_id,
            config_stem: &self.config_stem,
        };

        for triple in targets {
            let available = inputs.get(triple).map(Vec::as_slice).unwrap_or_default();
            if available.is_empty() {
                self.aggregation_failure(triple, format!("No repeat files for {triple}"), outcomes)?;
                continue;
            }
            if available.len() < cfg.repeats as usize {
                warn!(
                    "WARN  {triple}: {}/{} repeats (using available data)",
                    available.len(),
                    cfg.repeats
                );
            }

            let canonical = self.canonical_file(triple);
            if self.scenario_mode() {
                merge_into_canonical(triple, available, &canonical, &self.scenarios, &ctx)?;
                info!("MERGE {triple} -> {}", canonical.display());
                continue;
            }
            match write_canonical(triple, available, &canonical, &ctx) {
                Ok(()) => info!("AGGR  {triple} -> {}", canonical.display()),
                Err(e) => self.aggregation_failure(triple, e.to_string(), outcomes)?,
            }
        }
        Ok(())
    }

    /// Fatal under fail-fast, otherwise a benchmark `FAIL` outcome.
    fn aggregation_failure(
        &self,
        triple: &Triple,
        message: String,
        outcomes: &mut Vec<StageOutcome>,
    ) -> BenchResult<()> {
        if self.config.fail_fast {
            return Err(BenchError::Runner(message));
        }
        let out = StageOutcome::fail(
            *triple,
            Stage::Benchmark,
            None,
            Duration::ZERO,
            "(aggregation)".to_string(),
            message,
        );
        log_outcome(&out);
        outcomes.push(out);
        Ok(())
    }

    fn write_session_record(&self, dir: &Path, run_id: &str) -> BenchResult<()> {
        let record = SessionRecord {
            run_id,
            config_path: self.config_path.display().to_string(),
            config_sha256: &self.config_sha256,
            started_at: utc_timestamp(),
            scenarios: self.scenarios.iter().map(ScenarioKey::selector).collect(),
            environment: EnvironmentInfo::detect(self.tools.go(), self.tools.python()),
        };
        write_json_atomic(&dir.join(SESSION_FILE), &record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_id_shape() {
        let id = new_run_id("quick");
        let (stamp, stem) = id.split_once("__").unwrap();
        assert_eq!(stem, "quick");
        assert_eq!(stamp.len(), 15);
        assert_eq!(&stamp[8..9], "_");
        assert!(stamp.chars().filter(|c| *c != '_').all(|c| c.is_ascii_digit()));
    }
}
