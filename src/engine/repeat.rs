//! Repeated benchmark execution.
//!
//! For every repeat index, every target triple runs once and writes one raw
//! result file under `run_<NN>/`. Each repeat that yields usable data becomes
//! a [`RepeatInput`] for aggregation.
//!
//! Salvage contract: benchmark programs persist their result document after
//! each completed scenario. A repeat whose process failed but left a
//! non-empty result file is therefore kept as aggregation input, and the
//! aggregator decides per scenario what is usable. The file must parse and
//! carry a `benchmarks` array; a process killed mid-write leaves truncated
//! JSON, and such a repeat is dropped with a warning so the remaining
//! repeats still aggregate. Neither outcome triggers fail-fast.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{info, warn};

use crate::aggregate::RepeatInput;
use crate::core::{OutcomeStatus, ScenarioKey, Stage, StageOutcome, Triple};
use crate::report::log_outcome;
use crate::storage::ResumeStateStore;
use crate::{BenchError, BenchResult};

use super::stage::StageRunner;

/// Reason recorded when a previous run already produced the data.
pub const RESUME_REASON: &str = "(resume: already passed for this config)";

/// `<raw_root>/run_<NN>`
pub fn repeat_dir(raw_root: &Path, repeat: u32) -> PathBuf {
    raw_root.join(format!("run_{repeat:02}"))
}

/// Drives `repeats` rounds of the benchmark stage over a target list.
pub struct RepeatRunner<'a> {
    stages: &'a StageRunner<'a>,
    raw_root: PathBuf,
    repeats: u32,
    fail_fast: bool,
    scenarios: &'a [ScenarioKey],
}

impl<'a> RepeatRunner<'a> {
    pub fn new(stages: &'a StageRunner<'a>, raw_root: impl Into<PathBuf>, repeats: u32) -> Self {
        RepeatRunner {
            stages,
            raw_root: raw_root.into(),
            repeats,
            fail_fast: true,
            scenarios: &[],
        }
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Restrict every run to these scenario selectors.
    pub fn with_scenarios(mut self, scenarios: &'a [ScenarioKey]) -> Self {
        self.scenarios = scenarios;
        self
    }

    /// Run all repeats of all `targets`.
    ///
    /// With `resume`, a repeat whose recorded raw file still exists is skipped
    /// and successful repeats are recorded. Outcomes are appended to
    /// `outcomes` as they happen, so they survive a fail-fast abort.
    pub fn run(
        &self,
        targets: &[Triple],
        mut resume: Option<&mut ResumeStateStore>,
        outcomes: &mut Vec<StageOutcome>,
    ) -> BenchResult<BTreeMap<Triple, Vec<RepeatInput>>> {
        let mut inputs: BTreeMap<Triple, Vec<RepeatInput>> =
            targets.iter().map(|t| (*t, Vec::new())).collect();
        let total = targets.len() as u64 * u64::from(self.repeats);
        let mut counter = 0u64;

        for rep in 1..=self.repeats {
            info!("Repeat {rep}/{}", self.repeats);
            let run_dir = repeat_dir(&self.raw_root, rep);

            for triple in targets {
                counter += 1;
                let collected = inputs.entry(*triple).or_default();

                if let Some(store) = resume.as_deref_mut() {
                    if let Some(previous) = store.reusable_repeat(triple, rep) {
                        let out = StageOutcome::skip(*triple, Stage::Benchmark, Some(rep), RESUME_REASON);
                        log_outcome(&out);
                        outcomes.push(out);
                        collected.push(RepeatInput::new(rep, previous));
                        continue;
                    }
                    if store.state().repeat_file(triple, rep).is_some() {
                        warn!("{triple} repeat={rep}: recorded raw file vanished, running again");
                        store.forget_repeat(triple, rep)?;
                    }
                }

                info!("RUN   [{counter}/{total}] {triple} stage=benchmark repeat={rep}");
                let raw_file = run_dir.join(triple.result_filename());
                let out = self.stages.run(
                    triple,
                    Stage::Benchmark,
                    Some(rep),
                    Some(&raw_file),
                    self.scenarios,
                )?;
                log_outcome(&out);
                let status = out.status;
                outcomes.push(out);

                match status {
                    OutcomeStatus::Pass => {
                        collected.push(RepeatInput::new(rep, &raw_file));
                        if let Some(store) = resume.as_deref_mut() {
                            store.record_repeat(triple, rep, &raw_file)?;
                        }
                    }
                    _ if has_output(&raw_file) => match check_partial(&raw_file) {
                        Ok(()) => {
                            warn!(
                                "{triple} repeat={rep}: partial results salvaged from {}",
                                raw_file.display()
                            );
                            collected.push(RepeatInput::new(rep, &raw_file));
                        }
                        Err(reason) => warn!(
                            "{triple} repeat={rep}: discarding unusable partial results in {}: {reason}",
                            raw_file.display()
                        ),
                    },
                    OutcomeStatus::Fail if self.fail_fast => {
                        return Err(BenchError::Runner(format!(
                            "Fail-fast: benchmark stage failed for {triple} repeat={rep}"
                        )));
                    }
                    _ => {}
                }
            }
        }

        Ok(inputs)
    }
}

fn has_output(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

/// A salvaged file must be a complete document with a `benchmarks` array.
fn check_partial(path: &Path) -> Result<(), String> {
    let bytes = std::fs::read(path).map_err(|e| e.to_string())?;
    let doc: Value = serde_json::from_slice(&bytes).map_err(|e| e.to_string())?;
    match doc.get("benchmarks") {
        Some(Value::Array(_)) => Ok(()),
        _ => Err("no 'benchmarks' array".to_string()),
    }
}
