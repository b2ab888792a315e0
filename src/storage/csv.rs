//! CSV export of stage outcomes.

use std::io::Write;
use std::path::Path;

use crate::BenchError;
use crate::core::StageOutcome;

/// CSV column headers in deterministic order.
pub const OUTCOME_CSV_HEADERS: &[&str] = &[
    "host",
    "guest",
    "mechanism",
    "stage",
    "repeat",
    "status",
    "elapsed_seconds",
    "peak_rss_bytes",
    "error",
    "command",
];

/// CSV exporter for stage outcomes.
///
/// One row per outcome, flat columns, deterministic order. Only the first
/// line of the error detail is exported.
#[derive(Debug, Clone, Default)]
pub struct OutcomeCsvExporter;

impl OutcomeCsvExporter {
    pub fn new() -> Self {
        OutcomeCsvExporter
    }

    /// Export outcomes to a CSV file.
    ///
    /// # Errors
    /// Returns an error if file operations or CSV writing fails.
    pub fn export(&self, outcomes: &[StageOutcome], output: &Path) -> Result<(), BenchError> {
        if let Some(parent) = output.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| BenchError::Runner(format!("failed to create directory: {e}")))?;
            }
        }

        let file = std::fs::File::create(output)
            .map_err(|e| BenchError::Runner(format!("failed to create file: {e}")))?;

        self.export_to_writer(outcomes, file)
    }

    /// Export outcomes to any writer implementing Write.
    pub fn export_to_writer<W: Write>(
        &self,
        outcomes: &[StageOutcome],
        writer: W,
    ) -> Result<(), BenchError> {
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer
            .write_record(OUTCOME_CSV_HEADERS)
            .map_err(|e| BenchError::Runner(format!("failed to write CSV headers: {e}")))?;

        for outcome in outcomes {
            csv_writer
                .write_record(&self.outcome_to_row(outcome))
                .map_err(|e| BenchError::Runner(format!("failed to write CSV row: {e}")))?;
        }

        csv_writer
            .flush()
            .map_err(|e| BenchError::Runner(format!("failed to flush CSV writer: {e}")))?;

        Ok(())
    }

    fn outcome_to_row(&self, outcome: &StageOutcome) -> Vec<String> {
        vec![
            outcome.triple.host.to_string(),
            outcome.triple.guest.to_string(),
            outcome.triple.mechanism.to_string(),
            outcome.stage.to_string(),
            outcome.repeat_index.map(|r| r.to_string()).unwrap_or_default(),
            outcome.status.to_string(),
            format!("{:.3}", outcome.elapsed_seconds),
            outcome.peak_rss_bytes.map(|b| b.to_string()).unwrap_or_default(),
            outcome.error_headline().unwrap_or_default().to_string(),
            outcome.command_display.clone(),
        ]
    }
}
