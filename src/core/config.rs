//! Strict loader for the runner configuration document.
//!
//! The document is a mapping with exactly four sections (`run`, `selection`,
//! `execution`, `outputs`), each with a closed key set. Any missing or unknown
//! key, wrong type or out-of-range value aborts loading; a partially valid
//! `Config` is never produced.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_yaml::{Mapping, Value};

use super::triple::{Lang, Mechanism, Triple, parse_pair, select_triples};
use crate::{BenchError, BenchResult};

const TOP_LEVEL_KEYS: &[&str] = &["run", "selection", "execution", "outputs"];

const RUN_KEYS: &[&str] = &[
    "include_benchmarks",
    "include_correctness",
    "repeats",
    "warmup_iterations",
    "measured_iterations",
    "batch_min_elapsed_ns",
    "batch_max_calls",
    "heartbeat_seconds",
];

const SELECTION_KEYS: &[&str] = &["hosts", "pairs", "mechanisms"];

const EXECUTION_KEYS: &[&str] = &[
    "rerun_existing",
    "fail_fast",
    "default_timeout_seconds",
    "java_metaffi_timeout_seconds",
];

const OUTPUT_KEYS: &[&str] = &[
    "canonical_results_dir",
    "repeat_root_dir",
    "write_repeat_files",
    "run_complexity",
    "run_consolidation",
    "run_tables",
    "run_report",
];

/// Validated, immutable run configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    // run
    pub include_benchmarks: bool,
    pub include_correctness: bool,
    pub repeats: u32,
    pub warmup_iterations: u64,
    pub measured_iterations: u64,
    pub batch_min_elapsed_ns: u64,
    pub batch_max_calls: u64,
    pub heartbeat_seconds: u64,

    // selection
    pub hosts: Vec<Lang>,
    pub pairs: Vec<(Lang, Lang)>,
    pub mechanisms: Vec<Mechanism>,

    // execution
    pub rerun_existing: bool,
    pub fail_fast: bool,
    pub default_timeout_seconds: u64,
    pub java_metaffi_timeout_seconds: u64,

    // outputs (resolved against the repo root)
    pub canonical_results_dir: PathBuf,
    pub repeat_root_dir: PathBuf,
    pub write_repeat_files: bool,
    pub run_complexity: bool,
    pub run_consolidation: bool,
    pub run_tables: bool,
    pub run_report: bool,
}

impl Config {
    /// Triples selected by this config, in catalog order.
    pub fn selected_triples(&self) -> BenchResult<Vec<Triple>> {
        select_triples(&self.hosts, &self.pairs, &self.mechanisms)
    }

    /// Hard timeout for one command of `triple`.
    pub fn timeout_for(&self, triple: &Triple) -> Duration {
        let secs = if triple.host == Lang::Java && triple.mechanism == Mechanism::Metaffi {
            self.java_metaffi_timeout_seconds
        } else {
            self.default_timeout_seconds
        };
        Duration::from_secs(secs)
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_seconds)
    }
}

/// Load and validate a config document. YAML unless the file ends in `.toml`.
///
/// Relative output directories are resolved against `repo_root`.
pub fn load_config(path: &Path, repo_root: &Path) -> BenchResult<Config> {
    if !path.is_file() {
        return Err(BenchError::Config(format!(
            "config file does not exist: {}",
            path.display()
        )));
    }
    let text = std::fs::read_to_string(path)
        .map_err(|e| BenchError::Config(format!("failed to read {}: {e}", path.display())))?;

    let is_toml = path
        .extension()
        .map(|e| e.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let doc: Value = if is_toml {
        toml::from_str(&text).map_err(|e| {
            BenchError::Config(format!("invalid TOML in {}: {e}", path.display()))
        })?
    } else {
        serde_yaml::from_str(&text).map_err(|e| {
            BenchError::Config(format!("invalid YAML in {}: {e}", path.display()))
        })?
    };

    parse_config(&doc, repo_root)
}

/// Validate an already-decoded document.
pub fn parse_config(doc: &Value, repo_root: &Path) -> BenchResult<Config> {
    let top = as_mapping(doc, "config")?;
    require_keys(top, TOP_LEVEL_KEYS, "config")?;

    let run = as_mapping(field(top, "run"), "run")?;
    let selection = as_mapping(field(top, "selection"), "selection")?;
    let execution = as_mapping(field(top, "execution"), "execution")?;
    let outputs = as_mapping(field(top, "outputs"), "outputs")?;

    require_keys(run, RUN_KEYS, "run")?;
    require_keys(selection, SELECTION_KEYS, "selection")?;
    require_keys(execution, EXECUTION_KEYS, "execution")?;
    require_keys(outputs, OUTPUT_KEYS, "outputs")?;

    let include_benchmarks = as_bool(run, "run", "include_benchmarks")?;
    let include_correctness = as_bool(run, "run", "include_correctness")?;
    if !include_benchmarks && !include_correctness {
        return Err(BenchError::Config(
            "at least one of run.include_benchmarks/run.include_correctness must be true".into(),
        ));
    }

    let repeats = as_int(run, "run", "repeats", 1)?;
    let repeats = u32::try_from(repeats)
        .map_err(|_| BenchError::Config(format!("run.repeats is too large: {repeats}")))?;

    let hosts = string_list(selection, "selection", "hosts", false)?
        .iter()
        .map(|h| {
            h.parse::<Lang>().map_err(|_| {
                BenchError::Config(format!("selection.hosts contains unsupported host '{h}'"))
            })
        })
        .collect::<BenchResult<Vec<_>>>()?;

    let pairs = string_list(selection, "selection", "pairs", true)?
        .iter()
        .map(|p| parse_pair(p))
        .collect::<BenchResult<Vec<_>>>()?;

    let mechanisms = string_list(selection, "selection", "mechanisms", false)?
        .iter()
        .map(|m| {
            m.parse::<Mechanism>().map_err(|_| {
                BenchError::Config(format!(
                    "selection.mechanisms contains unsupported mechanism '{m}'"
                ))
            })
        })
        .collect::<BenchResult<Vec<_>>>()?;

    Ok(Config {
        include_benchmarks,
        include_correctness,
        repeats,
        warmup_iterations: as_int(run, "run", "warmup_iterations", 0)?,
        measured_iterations: as_int(run, "run", "measured_iterations", 1)?,
        batch_min_elapsed_ns: as_int(run, "run", "batch_min_elapsed_ns", 1)?,
        batch_max_calls: as_int(run, "run", "batch_max_calls", 1)?,
        heartbeat_seconds: as_int(run, "run", "heartbeat_seconds", 1)?,
        hosts,
        pairs,
        mechanisms,
        rerun_existing: as_bool(execution, "execution", "rerun_existing")?,
        fail_fast: as_bool(execution, "execution", "fail_fast")?,
        default_timeout_seconds: as_int(execution, "execution", "default_timeout_seconds", 1)?,
        java_metaffi_timeout_seconds: as_int(
            execution,
            "execution",
            "java_metaffi_timeout_seconds",
            1,
        )?,
        canonical_results_dir: repo_root.join(as_path(outputs, "outputs", "canonical_results_dir")?),
        repeat_root_dir: repo_root.join(as_path(outputs, "outputs", "repeat_root_dir")?),
        write_repeat_files: as_bool(outputs, "outputs", "write_repeat_files")?,
        run_complexity: as_bool(outputs, "outputs", "run_complexity")?,
        run_consolidation: as_bool(outputs, "outputs", "run_consolidation")?,
        run_tables: as_bool(outputs, "outputs", "run_tables")?,
        run_report: as_bool(outputs, "outputs", "run_report")?,
    })
}

/// Turn a config file stem into a safe path component.
pub fn sanitize_path_component(name: &str) -> BenchResult<String> {
    let mut out = String::with_capacity(name.len());
    let mut in_bad_run = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
            out.push(c);
            in_bad_run = false;
        } else if !in_bad_run {
            out.push('_');
            in_bad_run = true;
        }
    }
    let cleaned = out.trim_matches(|c| matches!(c, '.' | '_' | '-')).to_string();
    if cleaned.is_empty() {
        return Err(BenchError::Config(format!(
            "config filename stem '{name}' cannot be sanitized into a valid path component"
        )));
    }
    Ok(cleaned)
}

/// Sanitised stem of a config path, used to name state and session directories.
pub fn config_stem(path: &Path) -> BenchResult<String> {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    sanitize_path_component(&stem)
}

fn require_keys(map: &Mapping, expected: &[&str], ctx: &str) -> BenchResult<()> {
    let mut present: Vec<String> = Vec::with_capacity(map.len());
    for key in map.keys() {
        match key.as_str() {
            Some(k) => present.push(k.to_string()),
            None => {
                return Err(BenchError::Config(format!(
                    "{ctx}: keys must be strings, found {key:?}"
                )));
            }
        }
    }

    let mut missing: Vec<&str> = expected
        .iter()
        .copied()
        .filter(|k| !present.iter().any(|p| p == k))
        .collect();
    let mut unknown: Vec<&str> = present
        .iter()
        .map(String::as_str)
        .filter(|p| !expected.contains(p))
        .collect();
    missing.sort_unstable();
    unknown.sort_unstable();

    match (missing.is_empty(), unknown.is_empty()) {
        (true, true) => Ok(()),
        (false, true) => Err(BenchError::Config(format!(
            "{ctx}: missing required keys: {missing:?}"
        ))),
        (true, false) => Err(BenchError::Config(format!(
            "{ctx}: unknown keys: {unknown:?}"
        ))),
        (false, false) => Err(BenchError::Config(format!(
            "{ctx}: missing required keys: {missing:?}; unknown keys: {unknown:?}"
        ))),
    }
}

fn field<'a>(map: &'a Mapping, key: &str) -> &'a Value {
    map.get(key).unwrap_or(&Value::Null)
}

fn as_mapping<'a>(value: &'a Value, ctx: &str) -> BenchResult<&'a Mapping> {
    value
        .as_mapping()
        .ok_or_else(|| BenchError::Config(format!("{ctx} must be a mapping")))
}

fn as_bool(map: &Mapping, section: &str, key: &str) -> BenchResult<bool> {
    field(map, key)
        .as_bool()
        .ok_or_else(|| BenchError::Config(format!("{section}.{key} must be boolean")))
}

fn as_int(map: &Mapping, section: &str, key: &str, min: u64) -> BenchResult<u64> {
    let value = field(map, key);
    let n = match value {
        Value::Number(n) if n.is_i64() || n.is_u64() => n,
        _ => {
            return Err(BenchError::Config(format!(
                "{section}.{key} must be integer"
            )));
        }
    };
    match n.as_u64() {
        Some(v) if v >= min => Ok(v),
        _ => Err(BenchError::Config(format!(
            "{section}.{key} must be >= {min}"
        ))),
    }
}

fn as_path(map: &Mapping, section: &str, key: &str) -> BenchResult<PathBuf> {
    match field(map, key) {
        Value::String(s) if !s.trim().is_empty() => Ok(PathBuf::from(s.trim())),
        _ => Err(BenchError::Config(format!(
            "{section}.{key} must be a non-empty string"
        ))),
    }
}

fn string_list(map: &Mapping, section: &str, key: &str, allow_empty: bool) -> BenchResult<Vec<String>> {
    let seq = field(map, key).as_sequence().ok_or_else(|| {
        BenchError::Config(format!("{section}.{key} must be a list"))
    })?;
    if seq.is_empty() && !allow_empty {
        return Err(BenchError::Config(format!(
            "{section}.{key} must be a non-empty list"
        )));
    }
    seq.iter()
        .map(|v| {
            v.as_str().map(|s| s.to_string()).ok_or_else(|| {
                BenchError::Config(format!("{section}.{key} entries must be strings"))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
run:
  include_benchmarks: true
  include_correctness: true
  repeats: 3
  warmup_iterations: 0
  measured_iterations: 100
  batch_min_elapsed_ns: 10000
  batch_max_calls: 100000
  heartbeat_seconds: 30
selection:
  hosts: [go, Python3]
  pairs: ["go:python3"]
  mechanisms: [metaffi, grpc]
execution:
  rerun_existing: false
  fail_fast: true
  default_timeout_seconds: 600
  java_metaffi_timeout_seconds: 1200
outputs:
  canonical_results_dir: results
  repeat_root_dir: results/repeats
  write_repeat_files: true
  run_complexity: false
  run_consolidation: false
  run_tables: false
  run_report: false
"#;

    fn parse(text: &str) -> BenchResult<Config> {
        let doc: Value = serde_yaml::from_str(text).unwrap();
        parse_config(&doc, Path::new("/repo"))
    }

    #[test]
    fn test_valid_config() {
        let cfg = parse(VALID).unwrap();
        assert_eq!(cfg.repeats, 3);
        assert_eq!(cfg.warmup_iterations, 0);
        assert_eq!(cfg.hosts, vec![Lang::Go, Lang::Python3]);
        assert_eq!(cfg.pairs, vec![(Lang::Go, Lang::Python3)]);
        assert_eq!(cfg.mechanisms, vec![Mechanism::Metaffi, Mechanism::Grpc]);
        assert_eq!(cfg.canonical_results_dir, PathBuf::from("/repo/results"));
        assert_eq!(cfg.repeat_root_dir, PathBuf::from("/repo/results/repeats"));
        assert_eq!(cfg.heartbeat(), Duration::from_secs(30));
    }

    #[test]
    fn test_unknown_run_key_is_rejected() {
        let text = VALID.replace("  repeats: 3", "  repeats: 3\n  repeast: 3");
        let err = parse(&text).unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("unknown keys"));
        assert!(err.to_string().contains("repeast"));
    }

    #[test]
    fn test_missing_key_is_rejected() {
        let text = VALID.replace("  fail_fast: true\n", "");
        let err = parse(&text).unwrap_err();
        assert!(err.to_string().contains("execution: missing required keys"));
        assert!(err.to_string().contains("fail_fast"));
    }

    #[test]
    fn test_missing_and_unknown_reported_together() {
        let text = VALID.replace("  run_report: false", "  run_reports: false");
        let err = parse(&text).unwrap_err().to_string();
        assert!(err.contains("run_report\""));
        assert!(err.contains("run_reports"));
    }

    #[test]
    fn test_missing_section_is_rejected() {
        let text = VALID.split("outputs:").next().unwrap().to_string();
        let err = parse(&text).unwrap_err().to_string();
        assert!(err.contains("config: missing required keys"));
    }

    #[test]
    fn test_bool_must_be_strict() {
        let text = VALID.replace("rerun_existing: false", "rerun_existing: \"no\"");
        let err = parse(&text).unwrap_err().to_string();
        assert!(err.contains("execution.rerun_existing must be boolean"));
    }

    #[test]
    fn test_integer_ranges() {
        let text = VALID.replace("repeats: 3", "repeats: 0");
        assert!(parse(&text).unwrap_err().to_string().contains("run.repeats must be >= 1"));

        let text = VALID.replace("warmup_iterations: 0", "warmup_iterations: -1");
        assert!(parse(&text).unwrap_err().to_string().contains("run.warmup_iterations must be >= 0"));

        let text = VALID.replace("measured_iterations: 100", "measured_iterations: 1.5");
        assert!(parse(&text).unwrap_err().to_string().contains("must be integer"));

        let text = VALID.replace("heartbeat_seconds: 30", "heartbeat_seconds: true");
        assert!(parse(&text).unwrap_err().to_string().contains("must be integer"));
    }

    #[test]
    fn test_both_stages_disabled() {
        let text = VALID
            .replace("include_benchmarks: true", "include_benchmarks: false")
            .replace("include_correctness: true", "include_correctness: false");
        assert!(parse(&text).unwrap_err().to_string().contains("at least one of"));
    }

    #[test]
    fn test_catalog_validation() {
        let text = VALID.replace("hosts: [go, Python3]", "hosts: [go, rust]");
        assert!(parse(&text).unwrap_err().to_string().contains("unsupported host 'rust'"));

        let text = VALID.replace("mechanisms: [metaffi, grpc]", "mechanisms: [pyo3]");
        assert!(parse(&text).unwrap_err().to_string().contains("unsupported mechanism 'pyo3'"));

        let text = VALID.replace("pairs: [\"go:python3\"]", "pairs: [\"go:go\"]");
        assert!(parse(&text).unwrap_err().to_string().contains("invalid pair"));

        let text = VALID.replace("hosts: [go, Python3]", "hosts: []");
        assert!(parse(&text).unwrap_err().to_string().contains("non-empty list"));
    }

    #[test]
    fn test_timeout_for_java_metaffi() {
        let cfg = parse(VALID).unwrap();
        let java = Triple::new(Lang::Java, Lang::Go, Mechanism::Metaffi);
        let go = Triple::new(Lang::Go, Lang::Java, Mechanism::Metaffi);
        assert_eq!(cfg.timeout_for(&java), Duration::from_secs(1200));
        assert_eq!(cfg.timeout_for(&go), Duration::from_secs(600));
    }

    #[test]
    fn test_toml_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nightly.toml");
        std::fs::write(
            &path,
            r#"
[run]
include_benchmarks = true
include_correctness = false
repeats = 2
warmup_iterations = 10
measured_iterations = 100
batch_min_elapsed_ns = 10000
batch_max_calls = 100000
heartbeat_seconds = 15

[selection]
hosts = ["go"]
pairs = []
mechanisms = ["metaffi"]

[execution]
rerun_existing = true
fail_fast = false
default_timeout_seconds = 60
java_metaffi_timeout_seconds = 60

[outputs]
canonical_results_dir = "out"
repeat_root_dir = "out/repeats"
write_repeat_files = true
run_complexity = false
run_consolidation = false
run_tables = false
run_report = false
"#,
        )
        .unwrap();
        let cfg = load_config(&path, dir.path()).unwrap();
        assert_eq!(cfg.repeats, 2);
        assert!(!cfg.fail_fast);
        assert_eq!(cfg.canonical_results_dir, dir.path().join("out"));
    }

    #[test]
    fn test_sanitize_path_component() {
        assert_eq!(sanitize_path_component("nightly run (v2)").unwrap(), "nightly_run_v2");
        assert_eq!(sanitize_path_component("..quick.").unwrap(), "quick");
        assert!(sanitize_path_component("???").is_err());
    }
}
