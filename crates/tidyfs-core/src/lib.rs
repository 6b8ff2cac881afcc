//! tidyfs Core - Rule model, configuration and persisted state
//!
//! This crate contains everything the engine and daemon crates share:
//! - **Rule model** - `Rule`, `FilterExpression`, `Action` and their leaf types
//! - **Configuration** - YAML loading, shorthand decoding, validation, defaults
//! - **Templates** - `${name}`/`${ext}` and strftime-style token expansion
//! - **State store** - per-rule execution statistics persisted as JSON
//! - **Errors** - configuration errors and filesystem-error classification
//!
//! The rule model is plain owned data: filters and actions are tagged enums
//! decoded directly from the configuration file, so the engine dispatches by
//! matching on the variant rather than through a name-keyed registry.

pub mod config;
pub mod decode;
pub mod errors;
pub mod rule;
pub mod state;
pub mod template;
