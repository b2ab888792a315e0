//! Statistical aggregation of repeated benchmark runs.
//!
//! # Pipeline
//!
//! - `fold`: pools the raw per-call samples of every repeat per scenario,
//!   cleans them with IQR outlier removal and computes summary statistics.
//! - `merge`: splices a subset of freshly aggregated scenarios into an
//!   existing canonical document.
//! - `stats`: the numeric building blocks.
//!
//! Canonical documents are always written with a whole-file atomic replace.

pub mod fold;
pub mod merge;
pub mod stats;

use std::path::Path;

use crate::BenchResult;
use crate::core::{ScenarioKey, Triple};
use crate::storage::write_json_atomic;

// Re-export key types for convenience
pub use fold::{AggregationContext, RepeatInput, build_aggregated};
pub use merge::{load_canonical, merge_selected};
pub use stats::{SummaryStats, remove_outliers_iqr};

/// Aggregate `inputs` and replace `canonical_file` with the result.
pub fn write_canonical(
    triple: &Triple,
    inputs: &[RepeatInput],
    canonical_file: &Path,
    ctx: &AggregationContext<'_>,
) -> BenchResult<()> {
    let doc = build_aggregated(triple, inputs, ctx)?;
    write_json_atomic(canonical_file, &doc)
}

/// Aggregate `inputs` and merge only the `selected` scenarios into the
/// existing `canonical_file`.
pub fn merge_into_canonical(
    triple: &Triple,
    inputs: &[RepeatInput],
    canonical_file: &Path,
    selected: &[ScenarioKey],
    ctx: &AggregationContext<'_>,
) -> BenchResult<()> {
    let mut current = load_canonical(canonical_file)?;
    let rerun = build_aggregated(triple, inputs, ctx)?;
    merge_selected(&mut current, &rerun, selected, ctx.run_id)?;
    write_json_atomic(canonical_file, &current)
}
