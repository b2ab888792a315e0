//! Mapping of (triple, stage) to a concrete child execution spec.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::{Config, Lang, Mechanism, ScenarioKey, Stage, Triple};
use crate::{BenchError, BenchResult};

use super::toolchain::ToolPaths;

pub const ENV_WARMUP: &str = "METAFFI_TEST_WARMUP";
pub const ENV_ITERATIONS: &str = "METAFFI_TEST_ITERATIONS";
pub const ENV_BATCH_MIN_ELAPSED_NS: &str = "METAFFI_TEST_BATCH_MIN_ELAPSED_NS";
pub const ENV_BATCH_MAX_CALLS: &str = "METAFFI_TEST_BATCH_MAX_CALLS";
pub const ENV_MODE: &str = "METAFFI_TEST_MODE";
pub const ENV_RESULTS_FILE: &str = "METAFFI_TEST_RESULTS_FILE";
pub const ENV_SCENARIOS: &str = "METAFFI_TEST_SCENARIOS";
pub const ENV_JEP_HOME: &str = "JEP_HOME";

/// Location of the external test programs and of the repository they live in.
#[derive(Debug, Clone)]
pub struct Workspace {
    tests_root: PathBuf,
    repo_root: PathBuf,
}

impl Workspace {
    pub fn new(tests_root: impl Into<PathBuf>, repo_root: impl Into<PathBuf>) -> Self {
        Workspace {
            tests_root: tests_root.into(),
            repo_root: repo_root.into(),
        }
    }

    pub fn tests_root(&self) -> &Path {
        &self.tests_root
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    /// Directory holding the test program of `triple`.
    pub fn test_directory(&self, triple: &Triple) -> PathBuf {
        let host = self.tests_root.join(triple.host.as_str());
        match triple.mechanism {
            Mechanism::Metaffi => host.join(format!("call_{}", triple.guest)),
            Mechanism::Grpc => host
                .join("without_metaffi")
                .join(format!("call_{}_grpc", triple.guest)),
            native => host
                .join("without_metaffi")
                .join(format!("call_{}_{}", triple.guest, native)),
        }
    }
}

/// Everything needed to run one stage as child processes.
///
/// `env` is an overlay on top of the orchestrator's own environment.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildSpec {
    pub commands: Vec<Vec<String>>,
    pub cwd: PathBuf,
    pub env: BTreeMap<String, String>,
    pub timeout: Duration,
    pub heartbeat: Duration,
}

impl ChildSpec {
    pub fn new(cwd: impl Into<PathBuf>, timeout: Duration, heartbeat: Duration) -> Self {
        ChildSpec {
            commands: Vec::new(),
            cwd: cwd.into(),
            env: BTreeMap::new(),
            timeout,
            heartbeat,
        }
    }

    pub fn with_command<I, S>(mut self, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.commands.push(argv.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_env(mut self, key: &str, value: impl Into<String>) -> Self {
        self.env.insert(key.to_string(), value.into());
        self
    }

    /// Stages without any command are reported as skipped.
    pub fn is_noop(&self) -> bool {
        self.commands.is_empty()
    }

    /// Shell line that reproduces the stage by hand.
    pub fn display(&self) -> String {
        let mut parts = vec![format!("cd {}", quote(&self.cwd.to_string_lossy()))];
        parts.extend(
            self.env
                .iter()
                .map(|(k, v)| format!("export {k}={}", quote(v))),
        );
        parts.extend(self.commands.iter().map(|argv| {
            argv.iter()
                .map(|a| quote(a))
                .collect::<Vec<_>>()
                .join(" ")
        }));
        parts.join(" && ")
    }
}

fn quote(s: &str) -> String {
    shlex::try_quote(s)
        .map(|q| q.into_owned())
        .unwrap_or_else(|_| s.to_string())
}

fn path_arg(p: &Path) -> String {
    p.to_string_lossy().into_owned()
}

/// Builds [`ChildSpec`]s for the selected triples.
pub struct StageCommandBuilder<'a> {
    config: &'a Config,
    workspace: &'a Workspace,
    tools: &'a ToolPaths,
}

impl<'a> StageCommandBuilder<'a> {
    pub fn new(config: &'a Config, workspace: &'a Workspace, tools: &'a ToolPaths) -> Self {
        StageCommandBuilder {
            config,
            workspace,
            tools,
        }
    }

    /// Resolve the child spec of one stage.
    ///
    /// `result_path` is where the program must write its result document and
    /// `scenarios` restricts a benchmark run to the given selectors. Fails if
    /// the test directory or a required companion tool is missing.
    pub fn build(
        &self,
        triple: &Triple,
        stage: Stage,
        result_path: Option<&Path>,
        scenarios: &[ScenarioKey],
    ) -> BenchResult<ChildSpec> {
        let cwd = self.workspace.test_directory(triple);
        if !cwd.is_dir() {
            return Err(BenchError::Runner(format!(
                "Test directory missing for {triple}: {}",
                cwd.display()
            )));
        }

        let cfg = self.config;
        let mut spec = ChildSpec::new(&cwd, cfg.timeout_for(triple), cfg.heartbeat())
            .with_env(ENV_WARMUP, cfg.warmup_iterations.to_string())
            .with_env(ENV_ITERATIONS, cfg.measured_iterations.to_string())
            .with_env(ENV_BATCH_MIN_ELAPSED_NS, cfg.batch_min_elapsed_ns.to_string())
            .with_env(ENV_BATCH_MAX_CALLS, cfg.batch_max_calls.to_string())
            .with_env(ENV_MODE, stage.mode_flag());
        if stage == Stage::Benchmark && !scenarios.is_empty() {
            let joined: Vec<String> = scenarios.iter().map(ScenarioKey::selector).collect();
            spec = spec.with_env(ENV_SCENARIOS, joined.join(","));
        }
        if let Some(path) = result_path {
            spec = spec.with_env(ENV_RESULTS_FILE, path_arg(path));
        }

        match stage {
            Stage::Correctness => self.correctness(triple, spec),
            Stage::Benchmark => self.benchmark(triple, spec),
        }
    }

    fn correctness(&self, triple: &Triple, spec: ChildSpec) -> BenchResult<ChildSpec> {
        if triple.mechanism != Mechanism::Metaffi {
            return Ok(spec);
        }
        match triple.host {
            Lang::Go => Ok(spec.with_command([
                path_arg(self.tools.go()),
                "test".into(),
                "-v".into(),
                "-count=1".into(),
                "-timeout=600s".into(),
                "./...".into(),
            ])),
            Lang::Python3 => {
                let test_file = spec.cwd.join("test_correctness.py");
                let mut argv = self.pytest(triple);
                argv.push(path_arg(&test_file));
                Ok(spec.with_command(argv))
            }
            Lang::Java => {
                let mvn = path_arg(&self.tools.maven()?);
                Ok(spec.with_command([mvn.as_str(), "test", "-Dtest=TestCorrectness", "-pl", "."]))
            }
        }
    }

    fn benchmark(&self, triple: &Triple, mut spec: ChildSpec) -> BenchResult<ChildSpec> {
        match triple.host {
            Lang::Go => Ok(spec.with_command([
                path_arg(self.tools.go()),
                "test".into(),
                "-v".into(),
                "-run".into(),
                "TestBenchmarkAll".into(),
                "-count=1".into(),
                "-timeout=600s".into(),
                "./...".into(),
            ])),
            Lang::Python3 if triple.mechanism == Mechanism::Metaffi => {
                let test_file = spec.cwd.join("test_benchmark.py");
                let mut argv = self.pytest(triple);
                argv.extend([path_arg(&test_file), "-k".into(), "test_all_benchmarks".into()]);
                Ok(spec.with_command(argv))
            }
            Lang::Python3 => {
                let script = spec.cwd.join("benchmark.py");
                Ok(spec.with_command([path_arg(self.tools.python()), path_arg(&script)]))
            }
            Lang::Java => {
                let mvn = path_arg(&self.tools.maven()?);
                let test_selector = if triple.mechanism == Mechanism::Metaffi {
                    "-Dtest=TestBenchmark"
                } else {
                    "-Dtest=BenchmarkTest"
                };

                match (triple.guest, triple.mechanism) {
                    (Lang::Go, Mechanism::Jni) => {
                        let bridge = go_bridge_command(&spec.cwd)?;
                        Ok(spec
                            .with_command(bridge)
                            .with_command([mvn.as_str(), "test", test_selector, "-pl", "."]))
                    }
                    (_, Mechanism::Grpc) => Ok(spec.with_command([
                        mvn.as_str(),
                        "compile",
                        "test",
                        test_selector,
                        "-pl",
                        ".",
                    ])),
                    (_, mechanism) => {
                        if mechanism == Mechanism::Jep {
                            if let Some(home) = self.tools.jep_home() {
                                spec = spec.with_env(ENV_JEP_HOME, path_arg(&home));
                            }
                        }
                        Ok(spec.with_command([mvn.as_str(), "test", test_selector, "-pl", "."]))
                    }
                }
            }
        }
    }

    fn pytest(&self, triple: &Triple) -> Vec<String> {
        let mut argv = vec![
            path_arg(self.tools.python()),
            "-m".into(),
            "pytest".into(),
            "-v".into(),
            "--tb=short".into(),
        ];
        // the JVM installs its own signal handlers
        if triple.guest == Lang::Java {
            argv.extend(["-p".into(), "no:faulthandler".into()]);
        }
        argv
    }
}

/// Build step for the Go shared library loaded by the Java JNI benchmark.
fn go_bridge_command(cwd: &Path) -> BenchResult<Vec<String>> {
    let bridge_dir = cwd.join("go_bridge");
    if !bridge_dir.is_dir() {
        return Err(BenchError::Runner(format!(
            "Missing Go JNI bridge directory: {}",
            bridge_dir.display()
        )));
    }

    let (script, argv): (PathBuf, Vec<String>) = if cfg!(windows) {
        let script = bridge_dir.join("build.ps1");
        let argv = vec![
            "powershell".into(),
            "-NoProfile".into(),
            "-ExecutionPolicy".into(),
            "Bypass".into(),
            "-File".into(),
            path_arg(&script),
        ];
        (script, argv)
    } else {
        let script = bridge_dir.join("build.sh");
        let argv = vec!["sh".into(), path_arg(&script)];
        (script, argv)
    };

    if !script.is_file() {
        return Err(BenchError::Runner(format!(
            "Missing Go JNI bridge build script: {}",
            script.display()
        )));
    }
    Ok(argv)
}
