//! tidyfs rule engine
//!
//! Executing a rule is a four-stage pipeline, each stage in its own module:
//!
//! ```text
//! location ──→ snapshot ──→ traversal ──→ filters ──→ action chain
//!              (C_SNAP)     (DFS/BFS)     (C_FILT)      (C_ACT)
//! ```
//!
//! [`runner::RuleRunner`] drives the pipeline and emits
//! [`tidyfs_core::rule::ExecutionStats`]. Progress and per-file traces go
//! through the [`report::Reporter`] contract; passing the null reporter
//! enables short-circuit filter evaluation.

pub mod action;
pub mod filter;
pub mod report;
pub mod runner;
pub mod snapshot;

pub use report::{LogReporter, NullReporter, Reporter};
pub use runner::RuleRunner;
