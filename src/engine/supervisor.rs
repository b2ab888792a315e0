//! Supervised execution of child processes.
//!
//! Each command of a [`ChildSpec`] runs to completion before the next one
//! starts. While a child runs the supervisor polls it on a short tick,
//! enforces the hard timeout, emits heartbeats and samples resident memory.
//! A benchmark-stage command that fails with a recognised transient
//! signature is retried once.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::process::{Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::core::{Lang, Mechanism, Stage, StageOutcome, Triple};
use crate::{BenchError, BenchResult};

use super::command::{ChildSpec, ENV_SCENARIOS};

/// Number of non-empty output lines kept for diagnostics.
pub const TAIL_LINES: usize = 40;

type TransientPredicate = Box<dyn Fn(&Triple, &str) -> bool + Send + Sync>;

/// A known transient infrastructure failure, recognised from the output tail.
pub struct TransientMatcher {
    description: String,
    predicate: TransientPredicate,
}

impl TransientMatcher {
    pub fn new<F>(description: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&Triple, &str) -> bool + Send + Sync + 'static,
    {
        TransientMatcher {
            description: description.into(),
            predicate: Box::new(predicate),
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn matches(&self, triple: &Triple, tail: &str) -> bool {
        (self.predicate)(triple, tail)
    }
}

impl std::fmt::Debug for TransientMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransientMatcher")
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

fn java_grpc(triple: &Triple) -> bool {
    triple.host == Lang::Java && triple.mechanism == Mechanism::Grpc
}

/// Signatures of flaky protobuf code generation in the Java gRPC module.
pub fn default_transient_matchers() -> Vec<TransientMatcher> {
    let mut matchers = vec![TransientMatcher::new(
        "stale generated protobuf classes",
        |t: &Triple, tail: &str| {
            java_grpc(t)
                && tail.contains("BenchmarkProto$ArraySumRequest")
                && tail.contains("access$7()")
                && tail.contains("NoSuchMethod")
        },
    )];
    for marker in [
        "Unable to clean up temporary proto file directory",
        "Proto path element is not a directory",
        "Unable to create test class 'BenchmarkTest'",
    ] {
        matchers.push(TransientMatcher::new(marker, move |t: &Triple, tail: &str| {
            java_grpc(t) && tail.contains(marker)
        }));
    }
    matchers
}

/// Result of one finished (or killed) command.
#[derive(Debug, Clone)]
pub struct CommandRun {
    pub status: Option<ExitStatus>,
    pub timed_out: bool,
    pub elapsed: Duration,
    pub tail: String,
    pub peak_rss_bytes: Option<u64>,
}

impl CommandRun {
    pub fn success(&self) -> bool {
        !self.timed_out && self.status.map(|s| s.success()).unwrap_or(false)
    }

    fn exit_code_display(&self) -> String {
        match self.status {
            Some(s) => s
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| s.to_string()),
            None => "unknown".to_string(),
        }
    }
}

/// Runs child specs one command at a time.
#[derive(Debug)]
pub struct ProcessSupervisor {
    matchers: Vec<TransientMatcher>,
    poll_interval: Duration,
    retry_backoff: Duration,
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSupervisor {
    /// Supervisor with the default transient matchers, a 100 ms tick and 1 s retry backoff.
    pub fn new() -> Self {
        ProcessSupervisor {
            matchers: default_transient_matchers(),
            poll_interval: Duration::from_millis(100),
            retry_backoff: Duration::from_secs(1),
        }
    }

    pub fn with_matchers(mut self, matchers: Vec<TransientMatcher>) -> Self {
        self.matchers = matchers;
        self
    }

    pub fn with_matcher(mut self, matcher: TransientMatcher) -> Self {
        self.matchers.push(matcher);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn matchers(&self) -> &[TransientMatcher] {
        &self.matchers
    }

    fn transient_match(&self, triple: &Triple, tail: &str) -> Option<&TransientMatcher> {
        self.matchers.iter().find(|m| m.matches(triple, tail))
    }

    /// Run every command of `spec` in order and report the stage outcome.
    ///
    /// Never returns an error: spawn failures, timeouts and non-zero exits all
    /// become `FAIL` outcomes carrying the reproducible command line.
    pub fn run(
        &self,
        triple: &Triple,
        stage: Stage,
        repeat_index: Option<u32>,
        spec: &ChildSpec,
    ) -> StageOutcome {
        let display = spec.display();
        debug!(cwd = %spec.cwd.display(), env = ?spec.env, "child spec for {triple} stage={stage}");

        let mut base_label = format!("{triple} stage={stage}");
        if let Some(r) = repeat_index {
            base_label.push_str(&format!(" repeat={r}"));
        }

        let phases = spec.commands.len();
        let multi_phase = phases > 1;
        let phase_suffix = |i: usize| {
            if multi_phase {
                format!(" at command phase {i}")
            } else {
                String::new()
            }
        };

        let mut total = Duration::ZERO;
        let mut peak_rss: Option<u64> = None;
        let finish = |mut outcome: StageOutcome, peak: Option<u64>| {
            outcome.peak_rss_bytes = peak;
            outcome
        };

        for (idx, argv) in spec.commands.iter().enumerate() {
            let phase = idx + 1;
            let label = if multi_phase {
                format!("{base_label} phase={phase}/{phases}")
            } else {
                base_label.clone()
            };

            let mut attempt = 1;
            loop {
                let heartbeat_label = if attempt == 1 {
                    label.clone()
                } else {
                    format!("{label} retry={attempt}")
                };

                let run = match self.run_command(argv, spec, &heartbeat_label) {
                    Ok(run) => run,
                    Err(e) => {
                        return finish(
                            StageOutcome::fail(*triple, stage, repeat_index, total, display, e.to_string()),
                            peak_rss,
                        );
                    }
                };
                total += run.elapsed;
                peak_rss = max_opt(peak_rss, run.peak_rss_bytes);

                if run.timed_out {
                    let error = format!(
                        "TIMEOUT after {}s{}\n{}",
                        spec.timeout.as_secs(),
                        phase_suffix(phase),
                        run.tail
                    );
                    return finish(
                        StageOutcome::fail(*triple, stage, repeat_index, total, display, error),
                        peak_rss,
                    );
                }

                if run.success() {
                    break;
                }

                if attempt == 1 && stage == Stage::Benchmark {
                    if let Some(matcher) = self.transient_match(triple, &run.tail) {
                        warn!(
                            "RETRY transient failure ({}): {label}",
                            matcher.description()
                        );
                        std::thread::sleep(self.retry_backoff);
                        attempt += 1;
                        continue;
                    }
                }

                let error = format!(
                    "Exit code {}{}\n{}",
                    run.exit_code_display(),
                    phase_suffix(phase),
                    run.tail
                );
                return finish(
                    StageOutcome::fail(*triple, stage, repeat_index, total, display, error),
                    peak_rss,
                );
            }
        }

        finish(
            StageOutcome::pass(*triple, stage, repeat_index, total, display),
            peak_rss,
        )
    }

    /// Run a single command with combined output captured to a temp file.
    pub fn run_command(
        &self,
        argv: &[String],
        spec: &ChildSpec,
        label: &str,
    ) -> BenchResult<CommandRun> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| BenchError::Runner("empty command".into()))?;

        let log = tempfile::tempfile()
            .map_err(|e| BenchError::Runner(format!("failed to create output capture file: {e}")))?;
        let stdout = log
            .try_clone()
            .map_err(|e| BenchError::Runner(format!("failed to clone output capture file: {e}")))?;
        let stderr = log
            .try_clone()
            .map_err(|e| BenchError::Runner(format!("failed to clone output capture file: {e}")))?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(&spec.cwd)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));
        if !spec.env.contains_key(ENV_SCENARIOS) {
            cmd.env_remove(ENV_SCENARIOS);
        }

        let start = Instant::now();
        let mut child = cmd
            .spawn()
            .map_err(|e| BenchError::Runner(format!("failed to spawn {program}: {e}")))?;

        let mut rss = RssSampler::new(child.id());
        let mut next_heartbeat = start + spec.heartbeat;
        let mut timed_out = false;

        let status = loop {
            if let Some(status) = child
                .try_wait()
                .map_err(|e| BenchError::Runner(format!("failed to poll {program}: {e}")))?
            {
                break Some(status);
            }

            let now = Instant::now();
            let elapsed = now.duration_since(start);
            if elapsed > spec.timeout {
                let _ = child.kill();
                let _ = child.wait();
                timed_out = true;
                break None;
            }

            if now >= next_heartbeat {
                info!("[alive] {label} | elapsed={:.1}s", elapsed.as_secs_f64());
                next_heartbeat = now + spec.heartbeat;
            }

            rss.sample();
            std::thread::sleep(self.poll_interval);
        };

        let elapsed = start.elapsed();
        Ok(CommandRun {
            status,
            timed_out,
            elapsed,
            tail: read_tail(log, TAIL_LINES),
            peak_rss_bytes: rss.peak(),
        })
    }
}

fn max_opt(a: Option<u64>, b: Option<u64>) -> Option<u64> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (x, None) => x,
        (None, y) => y,
    }
}

/// Last `n` non-empty lines of the captured output.
fn read_tail(mut log: File, n: usize) -> String {
    let mut bytes = Vec::new();
    if log.seek(SeekFrom::Start(0)).is_err() || log.read_to_end(&mut bytes).is_err() {
        return String::new();
    }
    tail_lines(&String::from_utf8_lossy(&bytes), n)
}

pub fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

#[cfg(feature = "mem")]
struct RssSampler {
    sys: sysinfo::System,
    pid: sysinfo::Pid,
    peak: u64,
}

#[cfg(feature = "mem")]
impl RssSampler {
    fn new(pid: u32) -> Self {
        use sysinfo::{ProcessRefreshKind, RefreshKind, System};
        RssSampler {
            sys: System::new_with_specifics(
                RefreshKind::new().with_processes(ProcessRefreshKind::new().with_memory()),
            ),
            pid: sysinfo::Pid::from_u32(pid),
            peak: 0,
        }
    }

    fn sample(&mut self) {
        if self.sys.refresh_process(self.pid) {
            if let Some(p) = self.sys.process(self.pid) {
                self.peak = self.peak.max(p.memory());
            }
        }
    }

    fn peak(&self) -> Option<u64> {
        (self.peak > 0).then_some(self.peak)
    }
}

#[cfg(not(feature = "mem"))]
struct RssSampler;

#[cfg(not(feature = "mem"))]
impl RssSampler {
    fn new(_pid: u32) -> Self {
        RssSampler
    }

    fn sample(&mut self) {}

    fn peak(&self) -> Option<u64> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::OutcomeStatus;

    fn triple() -> Triple {
        Triple::new(Lang::Java, Lang::Python3, Mechanism::Grpc)
    }

    #[test]
    fn test_tail_keeps_last_non_empty_lines() {
        let text = "a\n\n  \nb\nc\n\n";
        assert_eq!(tail_lines(text, 2), "b\nc");
        assert_eq!(tail_lines(text, 10), "a\nb\nc");
        assert_eq!(tail_lines("", 3), "");
    }

    #[test]
    fn test_default_matchers_only_apply_to_java_grpc() {
        let sup = ProcessSupervisor::new();
        let tail = "[ERROR] Proto path element is not a directory";
        assert!(sup.transient_match(&triple(), tail).is_some());

        let go = Triple::new(Lang::Go, Lang::Python3, Mechanism::Grpc);
        assert!(sup.transient_match(&go, tail).is_none());
        assert!(sup.transient_match(&triple(), "BUILD FAILURE").is_none());

        let stale = "java.lang.NoSuchMethodError: BenchmarkProto$ArraySumRequest.access$7()";
        assert!(sup.transient_match(&triple(), stale).is_some());
    }

    #[cfg(unix)]
    mod unix {
        use super::*;
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        fn sh(script: &str, timeout: Duration) -> ChildSpec {
            ChildSpec::new(
                std::env::temp_dir(),
                timeout,
                Duration::from_secs(60),
            )
            .with_command(["sh", "-c", script])
        }

        fn fast() -> ProcessSupervisor {
            ProcessSupervisor::new()
                .with_poll_interval(Duration::from_millis(10))
                .with_retry_backoff(Duration::from_millis(10))
        }

        #[test]
        fn test_pass() {
            let spec = sh("echo hello", Duration::from_secs(10));
            let o = fast().run(&triple(), Stage::Benchmark, Some(1), &spec);
            assert_eq!(o.status, OutcomeStatus::Pass);
            assert!(o.command_display.contains("sh -c"));
        }

        #[test]
        fn test_exit_code_and_tail() {
            let spec = sh("echo first; echo boom >&2; exit 3", Duration::from_secs(10));
            let o = fast().run(&triple(), Stage::Correctness, None, &spec);
            assert_eq!(o.status, OutcomeStatus::Fail);
            let err = o.error.unwrap();
            assert!(err.starts_with("Exit code 3\n"));
            assert!(err.contains("first"));
            assert!(err.contains("boom"));
        }

        #[test]
        fn test_timeout_kills_child() {
            let spec = sh("sleep 30", Duration::from_secs(1));
            let started = Instant::now();
            let o = fast().run(&triple(), Stage::Benchmark, Some(1), &spec);
            assert!(started.elapsed() < Duration::from_secs(10));
            assert_eq!(o.status, OutcomeStatus::Fail);
            assert!(o.error.unwrap().starts_with("TIMEOUT after 1s"));
        }

        #[test]
        fn test_multi_phase_reports_phase() {
            let spec = sh("true", Duration::from_secs(10)).with_command(["sh", "-c", "exit 4"]);
            let o = fast().run(&triple(), Stage::Benchmark, None, &spec);
            assert!(o.error.unwrap().starts_with("Exit code 4 at command phase 2"));
        }

        #[test]
        fn test_spawn_failure_is_fail_outcome() {
            let spec = ChildSpec::new(std::env::temp_dir(), Duration::from_secs(5), Duration::from_secs(5))
                .with_command(["/nonexistent/program-xyz"]);
            let o = fast().run(&triple(), Stage::Benchmark, None, &spec);
            assert_eq!(o.status, OutcomeStatus::Fail);
            assert!(o.error.unwrap().contains("failed to spawn /nonexistent/program-xyz"));
        }

        #[test]
        fn test_transient_failure_retried_once_in_benchmark_stage() {
            let dir = tempfile::tempdir().unwrap();
            let marker = dir.path().join("attempted");
            let script = format!(
                "if [ -f '{m}' ]; then exit 0; fi; touch '{m}'; echo FLAKY; exit 1",
                m = marker.display()
            );
            let calls = Arc::new(AtomicUsize::new(0));
            let seen = Arc::clone(&calls);
            let sup = fast().with_matchers(vec![TransientMatcher::new("flaky", move |_, tail| {
                seen.fetch_add(1, Ordering::SeqCst);
                tail.contains("FLAKY")
            })]);

            let o = sup.run(&triple(), Stage::Benchmark, Some(1), &sh(&script, Duration::from_secs(10)));
            assert_eq!(o.status, OutcomeStatus::Pass);
            assert_eq!(calls.load(Ordering::SeqCst), 1);
        }

        #[test]
        fn test_no_retry_in_correctness_stage() {
            let sup = fast().with_matchers(vec![TransientMatcher::new("any", |_, _| true)]);
            let o = sup.run(
                &triple(),
                Stage::Correctness,
                None,
                &sh("echo FLAKY; exit 1", Duration::from_secs(10)),
            );
            assert_eq!(o.status, OutcomeStatus::Fail);
        }

        #[test]
        fn test_retry_is_bounded() {
            let sup = fast().with_matchers(vec![TransientMatcher::new("any", |_, _| true)]);
            let o = sup.run(
                &triple(),
                Stage::Benchmark,
                None,
                &sh("exit 2", Duration::from_secs(10)),
            );
            assert!(o.error.unwrap().starts_with("Exit code 2"));
        }
    }
}
