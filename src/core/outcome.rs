//! Outcome of one stage invocation.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::triple::Triple;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Correctness,
    Benchmark,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Correctness => "correctness",
            Stage::Benchmark => "benchmark",
        }
    }

    /// Value of `METAFFI_TEST_MODE` handed to child programs.
    pub fn mode_flag(&self) -> &'static str {
        match self {
            Stage::Correctness => "correctness",
            Stage::Benchmark => "benchmarks",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OutcomeStatus {
    Pass,
    Fail,
    Skip,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeStatus::Pass => "PASS",
            OutcomeStatus::Fail => "FAIL",
            OutcomeStatus::Skip => "SKIP",
        }
    }
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageOutcome {
    pub triple: Triple,
    pub stage: Stage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_index: Option<u32>,
    pub status: OutcomeStatus,
    pub elapsed_seconds: f64,
    /// Reproducible command line, or a parenthesised reason for skips.
    pub command_display: String,
    /// Exit code or timeout line followed by the captured output tail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peak_rss_bytes: Option<u64>,
}

impl StageOutcome {
    pub fn skip(triple: Triple, stage: Stage, repeat_index: Option<u32>, reason: &str) -> Self {
        StageOutcome {
            triple,
            stage,
            repeat_index,
            status: OutcomeStatus::Skip,
            elapsed_seconds: 0.0,
            command_display: reason.to_string(),
            error: None,
            peak_rss_bytes: None,
        }
    }

    pub fn pass(
        triple: Triple,
        stage: Stage,
        repeat_index: Option<u32>,
        elapsed: Duration,
        command_display: String,
    ) -> Self {
        StageOutcome {
            triple,
            stage,
            repeat_index,
            status: OutcomeStatus::Pass,
            elapsed_seconds: elapsed.as_secs_f64(),
            command_display,
            error: None,
            peak_rss_bytes: None,
        }
    }

    pub fn fail(
        triple: Triple,
        stage: Stage,
        repeat_index: Option<u32>,
        elapsed: Duration,
        command_display: String,
        error: String,
    ) -> Self {
        StageOutcome {
            triple,
            stage,
            repeat_index,
            status: OutcomeStatus::Fail,
            elapsed_seconds: elapsed.as_secs_f64(),
            command_display,
            error: Some(error),
            peak_rss_bytes: None,
        }
    }

    pub fn is_fail(&self) -> bool {
        self.status == OutcomeStatus::Fail
    }

    /// First line of the error detail, if any.
    pub fn error_headline(&self) -> Option<&str> {
        self.error.as_deref().and_then(|e| e.lines().next())
    }

    /// `go->python3 [metaffi] stage=benchmark repeat=2`
    pub fn label(&self) -> String {
        match self.repeat_index {
            Some(r) => format!("{} stage={} repeat={}", self.triple, self.stage, r),
            None => format!("{} stage={}", self.triple, self.stage),
        }
    }
}
