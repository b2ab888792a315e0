//! Scenario-merge mode: splice freshly aggregated scenario records into an
//! existing canonical document.
//!
//! The canonical document is handled as an order-preserving JSON tree, so
//! records that are not touched serialize exactly as before.

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::Value;

use crate::core::ScenarioKey;
use crate::{BenchError, BenchResult, utc_timestamp};

use super::fold::object_entry;

/// Key of a scenario record held as a JSON value.
pub fn record_key(record: &Value) -> BenchResult<ScenarioKey> {
    let scenario = record
        .get("scenario")
        .and_then(Value::as_str)
        .ok_or_else(|| BenchError::Runner(format!("Malformed benchmark scenario entry: {record}")))?;
    let data_size = match record.get("data_size") {
        None | Some(Value::Null) => None,
        Some(v) => Some(v.as_u64().ok_or_else(|| {
            BenchError::Runner(format!("Invalid data_size in benchmark '{scenario}': {v}"))
        })?),
    };
    Ok(ScenarioKey::new(scenario, data_size))
}

fn benchmarks_by_key<'v>(
    benches: &'v [Value],
    what: &str,
) -> BenchResult<BTreeMap<ScenarioKey, &'v Value>> {
    let mut map = BTreeMap::new();
    for b in benches {
        let key = record_key(b)?;
        if map.insert(key.clone(), b).is_some() {
            return Err(BenchError::Runner(format!("Duplicate scenario {key} in {what}")));
        }
    }
    Ok(map)
}

/// Merge the `selected` scenarios of `rerun` into `current`.
///
/// Every selected scenario must be present in the rerun output. Records of
/// scenarios that were not selected are kept as they are; selected records
/// new to `current` are appended in key order.
pub fn merge_selected(
    current: &mut Value,
    rerun: &Value,
    selected: &[ScenarioKey],
    run_id: &str,
) -> BenchResult<()> {
    let cur_bench = current
        .get("benchmarks")
        .and_then(Value::as_array)
        .ok_or_else(|| BenchError::Runner("Canonical file has invalid benchmarks section".into()))?;
    let new_bench = rerun.get("benchmarks").and_then(Value::as_array).ok_or_else(|| {
        BenchError::Runner("Scenario rerun aggregation produced invalid benchmarks section".into())
    })?;

    let current_by_key = benchmarks_by_key(cur_bench, "canonical file")?;
    let rerun_by_key = benchmarks_by_key(new_bench, "scenario rerun output")?;

    let mut nowhere: Vec<String> = Vec::new();
    let mut not_rerun: Vec<String> = Vec::new();
    for key in selected {
        match (current_by_key.contains_key(key), rerun_by_key.contains_key(key)) {
            (_, true) => {}
            (false, false) => nowhere.push(key.selector()),
            (true, false) => not_rerun.push(key.selector()),
        }
    }
    nowhere.sort();
    not_rerun.sort();
    if !nowhere.is_empty() {
        return Err(BenchError::Runner(format!(
            "Requested scenario(s) exist neither in the canonical file nor in the rerun output: {}",
            nowhere.join(", ")
        )));
    }
    if !not_rerun.is_empty() {
        return Err(BenchError::Runner(format!(
            "Scenario-rerun output missing requested scenario(s): {}. \
             Ensure the benchmark program honours METAFFI_TEST_SCENARIOS.",
            not_rerun.join(", ")
        )));
    }

    let mut merged: Vec<Value> = Vec::with_capacity(cur_bench.len() + selected.len());
    for b in cur_bench {
        let key = record_key(b)?;
        match rerun_by_key.get(&key) {
            Some(fresh) if selected.contains(&key) => merged.push((*fresh).clone()),
            _ => merged.push(b.clone()),
        }
    }
    let mut appended: Vec<&ScenarioKey> = selected
        .iter()
        .filter(|k| !current_by_key.contains_key(*k))
        .collect();
    appended.sort();
    for key in appended {
        if let Some(fresh) = rerun_by_key.get(key) {
            merged.push((*fresh).clone());
        }
    }

    let mut selectors: Vec<String> = selected.iter().map(ScenarioKey::selector).collect();
    selectors.sort();

    let root = current
        .as_object_mut()
        .ok_or_else(|| BenchError::Runner("Canonical file is not a JSON object".into()))?;
    root.insert("benchmarks".to_string(), Value::Array(merged));
    let metadata = object_entry(root, "metadata")?;
    metadata.insert("timestamp".to_string(), Value::from(utc_timestamp()));
    let config = object_entry(metadata, "config")?;
    config.insert("last_partial_run_id".to_string(), Value::from(run_id));
    config.insert("last_partial_scenarios".to_string(), Value::from(selectors));
    Ok(())
}

/// Load the canonical file that scenario-merge mode updates.
pub fn load_canonical(path: &Path) -> BenchResult<Value> {
    if !path.is_file() {
        return Err(BenchError::Runner(format!(
            "Scenario-rerun requires existing canonical result file, missing: {}",
            path.display()
        )));
    }
    let bytes = std::fs::read(path).map_err(|e| {
        BenchError::Runner(format!("failed to read canonical file {}: {e}", path.display()))
    })?;
    serde_json::from_slice(&bytes).map_err(|e| {
        BenchError::Runner(format!("Malformed canonical JSON in {}: {e}", path.display()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rec(name: &str, size: Option<u64>, mean: f64) -> Value {
        json!({"scenario": name, "data_size": size, "status": "PASS",
               "raw_iterations_ns": [mean], "phases": {"total": {"mean_ns": mean}}})
    }

    #[test]
    fn test_replaces_only_selected() {
        let mut current = json!({
            "metadata": {"host": "go", "config": {"run_id": "old"}},
            "benchmarks": [rec("void_call", None, 1.0), rec("array_sum", Some(10), 2.0)]
        });
        let rerun = json!({"benchmarks": [rec("void_call", None, 9.0), rec("array_sum", Some(10), 8.0)]});
        let selected = vec![ScenarioKey::new("void_call", None)];

        merge_selected(&mut current, &rerun, &selected, "new_run").unwrap();

        let benches = current["benchmarks"].as_array().unwrap();
        assert_eq!(benches[0]["phases"]["total"]["mean_ns"], 9.0);
        assert_eq!(benches[1]["phases"]["total"]["mean_ns"], 2.0);
        assert_eq!(current["metadata"]["config"]["run_id"], "old");
        assert_eq!(current["metadata"]["config"]["last_partial_run_id"], "new_run");
        assert_eq!(current["metadata"]["config"]["last_partial_scenarios"], json!(["void_call"]));
    }

    #[test]
    fn test_new_scenarios_are_appended_in_key_order() {
        let mut current = json!({"benchmarks": [rec("void_call", None, 1.0)]});
        let rerun = json!({"benchmarks": [rec("b", None, 3.0), rec("a", Some(5), 4.0)]});
        let selected = vec![ScenarioKey::new("b", None), ScenarioKey::new("a", Some(5))];

        merge_selected(&mut current, &rerun, &selected, "r").unwrap();
        let names: Vec<&str> = current["benchmarks"]
            .as_array()
            .unwrap()
            .iter()
            .map(|b| b["scenario"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["void_call", "a", "b"]);
        assert_eq!(
            current["metadata"]["config"]["last_partial_scenarios"],
            json!(["a_5", "b"])
        );
    }

    #[test]
    fn test_scenario_absent_everywhere_is_fatal() {
        let mut current = json!({"benchmarks": [rec("void_call", None, 1.0)]});
        let rerun = json!({"benchmarks": [rec("void_call", None, 2.0)]});
        let err = merge_selected(&mut current, &rerun, &[ScenarioKey::new("nope", None)], "r")
            .unwrap_err();
        assert!(err.to_string().contains("exist neither"));
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn test_scenario_missing_from_rerun_is_fatal() {
        let mut current = json!({"benchmarks": [rec("void_call", None, 1.0)]});
        let rerun = json!({"benchmarks": []});
        let err = merge_selected(&mut current, &rerun, &[ScenarioKey::new("void_call", None)], "r")
            .unwrap_err();
        assert!(err.to_string().contains("missing requested scenario(s): void_call"));
    }

    #[test]
    fn test_load_canonical_requires_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_canonical(&dir.path().join("x.json")).unwrap_err();
        assert!(err.to_string().contains("requires existing canonical result file"));
    }

    #[test]
    fn test_record_key_validation() {
        assert!(record_key(&json!({"data_size": 3})).is_err());
        assert!(record_key(&json!({"scenario": "x", "data_size": "big"})).is_err());
        assert_eq!(
            record_key(&json!({"scenario": "x", "data_size": 3})).unwrap(),
            ScenarioKey::new("x", Some(3))
        );
    }
}
