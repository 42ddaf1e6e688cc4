// src/env/mod.rs

//! Environment composition for application pools.
//!
//! An application's worker environment is built fresh on every
//! initialization by folding zero or more shell-sourced overlays over a base
//! environment:
//!
//! - [`sourcer`] executes a single shell script and captures the environment
//!   it exports.
//! - [`pipeline`] runs the ordered rc-file pass and the version-manager step,
//!   threading the accumulating environment through each sourcing.

use std::collections::BTreeMap;

pub mod pipeline;
pub mod sourcer;

pub use pipeline::EnvPipeline;
pub use sourcer::{ScriptSourcer, ShellSourcer, SourceOptions};

/// Ordered key/value environment mapping; later insertions shadow earlier
/// keys.
pub type EnvMap = BTreeMap<String, String>;

/// Snapshot of the current process environment as an [`EnvMap`].
pub fn process_env() -> EnvMap {
    std::env::vars().collect()
}
