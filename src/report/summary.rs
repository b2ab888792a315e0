//! Run summary: outcome counts and the list of failures with reproducible
//! command lines.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::core::{OutcomeStatus, StageOutcome};

/// Outcome counts of one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeCounts {
    pub total: usize,
    pub pass: usize,
    pub fail: usize,
    pub skip: usize,
}

impl OutcomeCounts {
    pub fn tally(outcomes: &[StageOutcome]) -> Self {
        outcomes.iter().fold(OutcomeCounts::default(), |mut c, o| {
            c.total += 1;
            match o.status {
                OutcomeStatus::Pass => c.pass += 1,
                OutcomeStatus::Fail => c.fail += 1,
                OutcomeStatus::Skip => c.skip += 1,
            }
            c
        })
    }
}

/// Everything the final summary prints.
#[derive(Debug, Clone)]
pub struct RunSummary<'a> {
    pub outcomes: &'a [StageOutcome],
    pub elapsed: Duration,
    /// Session directory, when repeat files were persisted.
    pub repeat_dir: Option<PathBuf>,
    pub canonical_dir: PathBuf,
}

impl RunSummary<'_> {
    pub fn counts(&self) -> OutcomeCounts {
        OutcomeCounts::tally(self.outcomes)
    }

    /// Process exit code: 0 iff no outcome failed.
    pub fn exit_code(&self) -> i32 {
        if self.counts().fail > 0 { 1 } else { 0 }
    }
}

/// Render the plain-text summary block.
pub fn render_summary(summary: &RunSummary<'_>) -> String {
    let counts = summary.counts();
    let rule = "=".repeat(70);
    let mut out = String::new();

    out.push_str(&format!("\n{rule}\nSUMMARY\n{rule}\n"));
    out.push_str(&format!(
        "  Outcomes: total={} pass={} fail={} skip={}\n",
        counts.total, counts.pass, counts.fail, counts.skip
    ));
    out.push_str(&format!("  Elapsed: {:.1}s\n", summary.elapsed.as_secs_f64()));
    if let Some(dir) = &summary.repeat_dir {
        out.push_str(&format!("  Repeat files: {}\n", dir.display()));
    }
    out.push_str(&format!(
        "  Canonical results: {}\n",
        summary.canonical_dir.display()
    ));

    if counts.fail > 0 {
        out.push_str("\nFAILED OUTCOMES:\n");
        for o in summary.outcomes.iter().filter(|o| o.is_fail()) {
            out.push_str(&format!("  {}\n", o.label()));
            if let Some(headline) = o.error_headline() {
                out.push_str(&format!("    Error: {headline}\n"));
            }
            out.push_str(&format!("    Command: {}\n", o.command_display));
        }
    }
    out
}

/// Log one outcome as it happens; failures carry their output tail.
pub fn log_outcome(outcome: &StageOutcome) {
    let line = format!(
        "{:<5} {} ({:.1}s)",
        outcome.status.as_str(),
        outcome.label(),
        outcome.elapsed_seconds
    );
    match &outcome.error {
        None => info!("{line}"),
        Some(error) => {
            let mut lines = error.lines();
            let headline = lines.next().unwrap_or_default();
            let tail: Vec<&str> = lines.collect();
            if tail.is_empty() {
                warn!("{line}\n        Error: {headline}");
            } else {
                warn!(
                    "{line}\n        Error: {headline}\n        Output tail:\n          {}",
                    tail.join("\n          ")
                );
            }
        }
    }
}
