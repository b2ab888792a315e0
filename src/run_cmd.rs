//! `xlang-bench --config <path>`: one full benchmark session.

use std::path::{Path, PathBuf};

use crate::core::load_config;
use crate::core::schema::parse_scenario_selectors;
use crate::engine::{PipelineDriver, ProcessSupervisor, RunReport, ToolPaths, Workspace};
use crate::report::render_summary;
use crate::{BenchError, BenchResult};

/// Inputs of a run as given on the command line.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub config_path: PathBuf,
    /// Raw `--scenario` values; repeatable and comma separated.
    pub scenarios: Vec<String>,
    pub tests_root: PathBuf,
    /// Base for relative output directories; defaults to the parent of `tests_root`.
    pub repo_root: Option<PathBuf>,
    pub tools: ToolPaths,
}

impl RunOptions {
    pub fn new(config_path: impl Into<PathBuf>, tests_root: impl Into<PathBuf>) -> Self {
        RunOptions {
            config_path: config_path.into(),
            scenarios: Vec::new(),
            tests_root: tests_root.into(),
            repo_root: None,
            tools: ToolPaths::new(),
        }
    }

    pub fn with_scenarios(mut self, scenarios: Vec<String>) -> Self {
        self.scenarios = scenarios;
        self
    }

    pub fn with_repo_root(mut self, repo_root: impl Into<PathBuf>) -> Self {
        self.repo_root = Some(repo_root.into());
        self
    }

    pub fn with_tools(mut self, tools: ToolPaths) -> Self {
        self.tools = tools;
        self
    }
}

/// Resolve the tests root and the repo root used for relative output paths.
pub fn resolve_roots(tests_root: &Path, repo_root: Option<&Path>) -> BenchResult<(PathBuf, PathBuf)> {
    let tests_root = std::fs::canonicalize(tests_root).map_err(|e| {
        BenchError::Config(format!("tests root {} is not accessible: {e}", tests_root.display()))
    })?;
    let repo_root = match repo_root {
        Some(r) => r.to_path_buf(),
        None => tests_root
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| tests_root.clone()),
    };
    Ok((tests_root, repo_root))
}

/// Validate everything, then run the pipeline. No summary is printed.
pub fn execute(opts: &RunOptions) -> BenchResult<RunReport> {
    execute_with(opts, ProcessSupervisor::new())
}

/// [`execute`] with a caller-supplied supervisor.
pub fn execute_with(opts: &RunOptions, supervisor: ProcessSupervisor) -> BenchResult<RunReport> {
    let (tests_root, repo_root) = resolve_roots(&opts.tests_root, opts.repo_root.as_deref())?;
    let config = load_config(&opts.config_path, &repo_root)?;

    // Scenario mode follows the flag, not what survived parsing.
    let scenario_mode = !opts.scenarios.is_empty();
    let scenarios = parse_scenario_selectors(&opts.scenarios)?;
    if scenario_mode && scenarios.is_empty() {
        return Err(BenchError::Config("--scenario selected no scenarios".into()));
    }
    if scenario_mode && (!config.include_benchmarks || config.include_correctness) {
        return Err(BenchError::Config(
            "--scenario requires run.include_benchmarks=true and run.include_correctness=false"
                .into(),
        ));
    }

    let workspace = Workspace::new(tests_root, repo_root);
    PipelineDriver::new(&config, &opts.config_path, &workspace, &opts.tools)?
        .with_supervisor(supervisor)
        .with_scenarios(scenarios)
        .run()
}

/// Run and print the summary. Returns the process exit code.
pub fn run(opts: RunOptions) -> BenchResult<i32> {
    let report = execute(&opts)?;
    println!("{}", render_summary(&report.summary()));
    Ok(report.exit_code())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_root_defaults_to_parent() {
        let dir = tempfile::tempdir().unwrap();
        let tests = dir.path().join("tests");
        std::fs::create_dir_all(&tests).unwrap();

        let (t, r) = resolve_roots(&tests, None).unwrap();
        assert_eq!(t, std::fs::canonicalize(&tests).unwrap());
        assert_eq!(r, std::fs::canonicalize(dir.path()).unwrap());

        let (_, r) = resolve_roots(&tests, Some(Path::new("/elsewhere"))).unwrap();
        assert_eq!(r, PathBuf::from("/elsewhere"));
    }

    #[test]
    fn test_missing_tests_root_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve_roots(&dir.path().join("nope"), None).unwrap_err();
        assert!(err.is_config());
    }
}
