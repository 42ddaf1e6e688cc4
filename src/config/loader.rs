// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::Settings;
use crate::errors::{HarborError, Result};

/// Load settings from a given path without semantic validation.
///
/// This only performs TOML deserialization; use [`load_and_validate`] as the
/// entry point for the rest of the application.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<Settings> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let settings: Settings = toml::from_str(&contents)?;

    Ok(settings)
}

/// Load settings from path and run basic validation.
///
/// - Reads TOML.
/// - Applies defaults (handled by `serde` + `Default` impls).
/// - Checks basic sanity of the pool parameters.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<Settings> {
    let settings = load_from_path(&path)?;
    validate(&settings)?;
    Ok(settings)
}

/// Basic sanity checks on loaded settings.
pub fn validate(settings: &Settings) -> Result<()> {
    if settings.workers == 0 {
        return Err(HarborError::ConfigError(
            "workers must be at least 1".to_string(),
        ));
    }
    if settings.base_port < 1024 {
        return Err(HarborError::ConfigError(format!(
            "base_port {} is inside the privileged range",
            settings.base_port
        )));
    }
    Ok(())
}

/// Helper to resolve a default config path.
///
/// Currently this just returns `Harbor.toml` in the current working
/// directory, but this function exists so an embedding server can later
/// respect an env var or search multiple locations.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("Harbor.toml")
}
