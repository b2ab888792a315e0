//! Result document schema shared by raw per-repeat files and canonical files.
//!
//! Child test programs write one raw document per (triple, repeat); the
//! aggregator folds them into a canonical document with the same top-level
//! shape. Fields this crate does not interpret are carried through verbatim.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{BenchError, BenchResult};

/// Status string child programs use for a successful scenario.
pub const SCENARIO_PASS: &str = "PASS";
pub const SCENARIO_FAIL: &str = "FAIL";

/// Statistics are always computed over the union of raw samples.
pub const AGGREGATION_METHOD: &str = "pooled_iterations";

/// Unit of benchmark granularity inside one result document.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ScenarioKey {
    pub scenario: String,
    pub data_size: Option<u64>,
}

impl ScenarioKey {
    pub fn new(scenario: impl Into<String>, data_size: Option<u64>) -> Self {
        ScenarioKey {
            scenario: scenario.into(),
            data_size,
        }
    }

    /// Parse `void_call` or a size-suffixed `array_sum_10000`.
    pub fn parse_selector(selector: &str) -> BenchResult<Self> {
        let sel = selector.trim();
        if sel.is_empty() {
            return Err(BenchError::Config(
                "empty scenario selector is not allowed".into(),
            ));
        }
        if let Some((name, size)) = sel.rsplit_once('_') {
            if !name.is_empty() && !size.is_empty() && size.bytes().all(|b| b.is_ascii_digit()) {
                let data_size = size.parse::<u64>().map_err(|_| {
                    BenchError::Config(format!("invalid scenario selector '{selector}'"))
                })?;
                return Ok(ScenarioKey::new(name, Some(data_size)));
            }
        }
        Ok(ScenarioKey::new(sel, None))
    }

    /// Inverse of [`ScenarioKey::parse_selector`].
    pub fn selector(&self) -> String {
        match self.data_size {
            Some(size) => format!("{}_{}", self.scenario, size),
            None => self.scenario.clone(),
        }
    }
}

impl fmt::Display for ScenarioKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.selector())
    }
}

/// Expand repeatable / comma-separated `--scenario` values, dropping duplicates.
///
/// Every comma-separated part must name a scenario; `""`, `","` and
/// `"a,,b"` are rejected rather than silently shrinking the selection.
pub fn parse_scenario_selectors(raw: &[String]) -> BenchResult<Vec<ScenarioKey>> {
    let mut parsed: Vec<ScenarioKey> = Vec::new();
    for entry in raw {
        for part in entry.split(',').map(str::trim) {
            if part.is_empty() {
                return Err(BenchError::Config(format!(
                    "empty scenario selector in --scenario '{entry}'"
                )));
            }
            let key = ScenarioKey::parse_selector(part)?;
            if !parsed.contains(&key) {
                parsed.push(key);
            }
        }
    }
    Ok(parsed)
}

/// Cross-repeat bookkeeping attached to every canonical scenario record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepeatAnalysis {
    pub repeat_count: usize,
    pub repeat_means_ns: Vec<f64>,
    pub global_mean_ns: Option<f64>,
    #[serde(default)]
    pub pooled_sample_count: usize,
    #[serde(default)]
    pub contributing_repeats: Vec<u32>,
    pub aggregation_method: String,
}

/// One scenario inside a result document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioRecord {
    pub scenario: String,
    #[serde(default)]
    pub data_size: Option<u64>,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// Per-call latency samples in nanoseconds.
    #[serde(default)]
    pub raw_iterations_ns: Option<Vec<f64>>,
    #[serde(default)]
    pub phases: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_analysis: Option<RepeatAnalysis>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ScenarioRecord {
    pub fn key(&self) -> ScenarioKey {
        ScenarioKey::new(self.scenario.clone(), self.data_size)
    }

    pub fn is_pass(&self) -> bool {
        self.status == SCENARIO_PASS
    }

    /// `phases.total.mean_ns` as reported by the child program.
    pub fn reported_mean_ns(&self) -> Option<f64> {
        self.phases
            .get("total")
            .and_then(|t| t.get("mean_ns"))
            .and_then(Value::as_f64)
    }
}
