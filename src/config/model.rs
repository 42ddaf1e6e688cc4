// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

/// Top-level host settings as read from a TOML file.
///
/// ```toml
/// workers = 2
/// timeout_secs = 900
/// base_port = 5000
/// rvm_path = "/usr/local/rvm/scripts/rvm"
///
/// [env]
/// RAILS_ENV = "development"
/// ```
///
/// All fields are optional and have reasonable defaults. The `[env]` table is
/// the base environment overlay handed to the environment pipeline; sourced
/// rc files shadow it key by key.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Default number of workers per application pool.
    ///
    /// Overridden per application by `HARBOR_WORKERS` in its sourced
    /// environment.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Default idle timeout in seconds before a pool's workers are reaped.
    ///
    /// Overridden per application by `HARBOR_TIMEOUT`. Zero disables idle
    /// reaping.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// First port assigned to spawned workers; worker `i` gets
    /// `base_port + i`.
    #[serde(default = "default_base_port")]
    pub base_port: u16,

    /// Path to the rvm activation script sourced for applications that carry
    /// a `.rvmrc`.
    #[serde(default = "default_rvm_path")]
    pub rvm_path: PathBuf,

    /// Base environment for every application's pipeline run.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

fn default_workers() -> usize {
    2
}

fn default_timeout_secs() -> u64 {
    15 * 60
}

fn default_base_port() -> u16 {
    5000
}

fn default_rvm_path() -> PathBuf {
    let home = std::env::var_os("HOME").unwrap_or_default();
    PathBuf::from(home).join(".rvm/scripts/rvm")
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            timeout_secs: default_timeout_secs(),
            base_port: default_base_port(),
            rvm_path: default_rvm_path(),
            env: BTreeMap::new(),
        }
    }
}
