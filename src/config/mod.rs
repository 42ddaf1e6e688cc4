// src/config/mod.rs

//! Host-level configuration.
//!
//! [`Settings`] carries the process-wide defaults the supervisor falls back
//! to when an application's sourced environment does not override them, plus
//! the base environment every pipeline run starts from.

pub mod loader;
pub mod model;

pub use loader::{load_and_validate, load_from_path};
pub use model::Settings;
