//! Core types: the triple catalog, configuration, stage outcomes and the
//! result document schema.

pub mod config;
pub mod env;
pub mod outcome;
pub mod schema;
pub mod triple;

// Re-export key types for convenience
pub use config::{Config, config_stem, load_config};
pub use env::EnvironmentInfo;
pub use outcome::{OutcomeStatus, Stage, StageOutcome};
pub use schema::{ScenarioKey, ScenarioRecord};
pub use triple::{Lang, Mechanism, Triple, catalog, select_triples};
