//! Human-readable reporting of run progress and results.
//!
//! Per-outcome progress goes through `tracing`; the final summary is plain
//! text on stdout.

pub mod summary;

// Re-export key types
pub use summary::{OutcomeCounts, RunSummary, log_outcome, render_summary};
