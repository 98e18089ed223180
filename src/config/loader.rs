// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{FerrymanError, Result};

/// Read a configuration file without semantic validation.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|e| {
        FerrymanError::Config(format!("cannot read config '{}': {e}", path.display()))
    })?;

    let config: RawConfigFile = toml::from_str(&contents)?;
    debug!(
        path = %path.display(),
        endpoints = config.endpoint.len(),
        templates = config.template.len(),
        "config parsed"
    );

    Ok(config)
}

/// Load a configuration file and validate it.
///
/// This is the entry point for the rest of the application:
///
/// - Reads TOML and applies defaults.
/// - Checks endpoint structure, global limits and every template.
/// - Rejects event-trigger loops between templates.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let raw_config = load_from_path(&path)?;
    ConfigFile::try_from(raw_config)
}

/// Parse and validate configuration from a string (tests, embedded configs).
pub fn parse_str(contents: &str) -> Result<ConfigFile> {
    let raw: RawConfigFile = toml::from_str(contents)?;
    ConfigFile::try_from(raw)
}

/// `Ferryman.toml` in the current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("Ferryman.toml")
}
