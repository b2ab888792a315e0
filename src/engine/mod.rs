//! Engine module: runs the external test programs and drives a full session.
//!
//! # Architecture
//!
//! - **toolchain**: locates companion executables (go, python, Maven, JEP).
//! - **command**: resolves a triple and stage into a [`ChildSpec`], the
//!   ordered command list plus environment overlay, cwd and timeout.
//! - **supervisor**: executes a `ChildSpec` with output capture, heartbeats,
//!   timeouts and the bounded transient-failure retry.
//! - **stage** / **repeat**: one stage invocation, and the repeat loop that
//!   feeds aggregation.
//! - **pipeline**: the session from correctness through aggregation to the
//!   `downstream` tools.
//!
//! # Boundaries
//!
//! - The supervisor never fails a run: child problems become `FAIL` outcomes.
//! - Only setup problems and fail-fast conditions surface as `Err`.

pub mod command;
pub mod downstream;
pub mod pipeline;
pub mod repeat;
pub mod stage;
pub mod supervisor;
pub mod toolchain;

// Re-export key types for convenience
pub use command::{ChildSpec, StageCommandBuilder, Workspace};
pub use pipeline::{PipelineDriver, RunReport};
pub use repeat::RepeatRunner;
pub use stage::StageRunner;
pub use supervisor::{ProcessSupervisor, TransientMatcher, default_transient_matchers};
pub use toolchain::ToolPaths;
