//! Pooled aggregation of raw per-repeat result files into one canonical document.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde_json::{Map, Value};
use tracing::warn;

use crate::core::schema::{AGGREGATION_METHOD, RepeatAnalysis, SCENARIO_FAIL, SCENARIO_PASS};
use crate::core::{Config, ScenarioKey, ScenarioRecord, Triple};
use crate::{BenchError, BenchResult, utc_timestamp};

use super::stats::{SummaryStats, mean, remove_outliers_iqr};

/// One raw result file and the repeat that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepeatInput {
    pub index: u32,
    pub path: PathBuf,
}

impl RepeatInput {
    pub fn new(index: u32, path: impl Into<PathBuf>) -> Self {
        RepeatInput {
            index,
            path: path.into(),
        }
    }

    fn label(&self) -> String {
        format!("run_{}", self.index)
    }
}

/// Run-level facts stamped into every canonical document.
#[derive(Debug, Clone)]
pub struct AggregationContext<'a> {
    pub config: &'a Config,
    pub run_id: &'a str,
    pub config_stem: &'a str,
}

struct LoadedRepeat<'a> {
    input: &'a RepeatInput,
    doc: Value,
    by_key: BTreeMap<ScenarioKey, ScenarioRecord>,
}

fn load_repeat<'a>(triple: &Triple, input: &'a RepeatInput) -> BenchResult<LoadedRepeat<'a>> {
    let path = &input.path;
    let bytes = std::fs::read(path).map_err(|e| {
        BenchError::Runner(format!(
            "Missing repeat file for {triple}: {}: {e}",
            path.display()
        ))
    })?;
    let doc: Value = serde_json::from_slice(&bytes).map_err(|e| {
        BenchError::Runner(format!("Malformed JSON in repeat file {}: {e}", path.display()))
    })?;

    let benches = doc
        .get("benchmarks")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            BenchError::Runner(format!(
                "Repeat file missing benchmarks array: {}",
                path.display()
            ))
        })?;

    let mut by_key = BTreeMap::new();
    for raw in benches {
        let record: ScenarioRecord = serde_json::from_value(raw.clone()).map_err(|e| {
            BenchError::Runner(format!(
                "Malformed benchmark entry in {}: {e}",
                path.display()
            ))
        })?;
        let key = record.key();
        if by_key.insert(key.clone(), record).is_some() {
            return Err(BenchError::Runner(format!(
                "Duplicate scenario in {} for {triple}: {key}",
                input.label()
            )));
        }
    }

    Ok(LoadedRepeat { input, doc, by_key })
}

/// Fold the given repeat files of `triple` into a canonical document.
///
/// A scenario passes if at least one repeat reports it as `PASS`; repeats
/// where it is missing or failing only add warnings. With no passing repeat
/// the scenario is recorded as `FAIL` naming the status of every repeat.
pub fn build_aggregated(
    triple: &Triple,
    inputs: &[RepeatInput],
    ctx: &AggregationContext<'_>,
) -> BenchResult<Value> {
    if inputs.is_empty() {
        return Err(BenchError::Runner(format!("No repeat files found for {triple}")));
    }

    let loaded = inputs
        .iter()
        .map(|input| load_repeat(triple, input))
        .collect::<BenchResult<Vec<_>>>()?;

    let keys_all: BTreeSet<&ScenarioKey> = loaded.iter().flat_map(|r| r.by_key.keys()).collect();
    let partial = keys_all
        .iter()
        .filter(|k| loaded.iter().any(|r| !r.by_key.contains_key(**k)))
        .count();
    if partial > 0 {
        warn!(
            "{triple}: scenario set differs across repeats; {} complete, {partial} missing in some runs",
            keys_all.len() - partial
        );
    }

    let mut records = Vec::with_capacity(keys_all.len());
    for key in keys_all {
        records.push(fold_scenario(triple, key, &loaded)?);
    }

    let mut doc = loaded[0].doc.clone();
    let root = doc.as_object_mut().ok_or_else(|| {
        BenchError::Runner(format!(
            "Repeat file is not a JSON object: {}",
            inputs[0].path.display()
        ))
    })?;
    let benchmarks = serde_json::to_value(&records).map_err(|e| {
        BenchError::Runner(format!("failed to serialize aggregated scenarios for {triple}: {e}"))
    })?;
    root.insert("benchmarks".to_string(), benchmarks);

    let cfg = ctx.config;
    let metadata = object_entry(root, "metadata")?;
    metadata.insert("timestamp".to_string(), Value::from(utc_timestamp()));
    let run_config = object_entry(metadata, "config")?;
    run_config.insert("warmup_iterations".into(), Value::from(cfg.warmup_iterations));
    run_config.insert("measured_iterations".into(), Value::from(cfg.measured_iterations));
    run_config.insert("repeat_count".into(), Value::from(inputs.len()));
    run_config.insert("batch_min_elapsed_ns".into(), Value::from(cfg.batch_min_elapsed_ns));
    run_config.insert("batch_max_calls".into(), Value::from(cfg.batch_max_calls));
    run_config.insert("aggregation_method".into(), Value::from(AGGREGATION_METHOD));
    run_config.insert("run_id".into(), Value::from(ctx.run_id));
    run_config.insert("run_config_name".into(), Value::from(ctx.config_stem));

    Ok(doc)
}

/// `map[key]` as an object, replacing any non-object value.
pub(crate) fn object_entry<'m>(
    map: &'m mut Map<String, Value>,
    key: &str,
) -> BenchResult<&'m mut Map<String, Value>> {
    let slot = map
        .entry(key.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !slot.is_object() {
        *slot = Value::Object(Map::new());
    }
    slot.as_object_mut()
        .ok_or_else(|| BenchError::Runner(format!("'{key}' is not a JSON object")))
}

fn fold_scenario(
    triple: &Triple,
    key: &ScenarioKey,
    loaded: &[LoadedRepeat<'_>],
) -> BenchResult<ScenarioRecord> {
    let mut repeat_means = Vec::new();
    let mut pooled: Vec<f64> = Vec::new();
    let mut contributing = Vec::new();
    let mut missing = Vec::new();
    let mut statuses = Vec::new();

    for repeat in loaded {
        let label = repeat.input.label();
        let Some(record) = repeat.by_key.get(key) else {
            missing.push(repeat.input.index);
            statuses.push(format!("{label}: missing"));
            continue;
        };
        if !record.is_pass() {
            statuses.push(format!("{label}: status={}", record.status));
            continue;
        }

        let raw = record.raw_iterations_ns.as_ref().ok_or_else(|| {
            BenchError::Runner(format!(
                "raw_iterations_ns must be a list in {triple} scenario {key} {label}"
            ))
        })?;
        let repeat_mean = record.reported_mean_ns().or_else(|| mean(raw)).ok_or_else(|| {
            BenchError::Runner(format!(
                "Missing phases.total.mean_ns and no samples in {triple} scenario {key} {label}"
            ))
        })?;
        repeat_means.push(repeat_mean);
        pooled.extend_from_slice(raw);
        contributing.push(repeat.input.index);
    }

    let repeat_count = loaded.len();
    if contributing.is_empty() {
        return Ok(ScenarioRecord {
            scenario: key.scenario.clone(),
            data_size: key.data_size,
            status: SCENARIO_FAIL.to_string(),
            error: Some(format!("no passing repeat ({})", statuses.join("; "))),
            warnings: Vec::new(),
            raw_iterations_ns: Some(Vec::new()),
            phases: Map::new(),
            repeat_analysis: Some(RepeatAnalysis {
                repeat_count,
                repeat_means_ns: Vec::new(),
                global_mean_ns: None,
                pooled_sample_count: 0,
                contributing_repeats: Vec::new(),
                aggregation_method: AGGREGATION_METHOD.to_string(),
            }),
            extra: Map::new(),
        });
    }

    let mut warnings = Vec::new();
    if !missing.is_empty() {
        warnings.push(format!("missing in run(s) {missing:?}"));
    }
    let failed: Vec<&String> = statuses.iter().filter(|s| !s.ends_with(": missing")).collect();
    if !failed.is_empty() {
        let joined: Vec<&str> = failed.iter().map(|s| s.as_str()).collect();
        warnings.push(format!("excluded failed repeat(s): {}", joined.join("; ")));
    }
    if !warnings.is_empty() {
        warn!(
            "{triple} scenario {key}: aggregated from {}/{repeat_count} repeats ({})",
            contributing.len(),
            warnings.join("; ")
        );
    }

    let cleaned = remove_outliers_iqr(&pooled);
    let pooled_sample_count = pooled.len();
    let stats = SummaryStats::compute(&cleaned);
    let mut phases = Map::new();
    phases.insert(
        "total".to_string(),
        serde_json::to_value(stats).map_err(|e| {
            BenchError::Runner(format!("failed to serialize statistics for {key}: {e}"))
        })?,
    );

    Ok(ScenarioRecord {
        scenario: key.scenario.clone(),
        data_size: key.data_size,
        status: SCENARIO_PASS.to_string(),
        error: None,
        warnings,
        raw_iterations_ns: Some(pooled),
        phases,
        repeat_analysis: Some(RepeatAnalysis {
            repeat_count,
            repeat_means_ns: repeat_means,
            global_mean_ns: Some(stats.mean_ns),
            pooled_sample_count,
            contributing_repeats: contributing,
            aggregation_method: AGGREGATION_METHOD.to_string(),
        }),
        extra: Map::new(),
    })
}
