// src/config/loader.rs

use std::fs;
use std::path::Path;

use crate::config::model::{RawConfigFile, WorkerConfig};
use crate::errors::Result;

/// Load a configuration file from a given path and return the raw `RawConfigFile`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let config: RawConfigFile = toml::from_str(&contents)?;

    Ok(config)
}

/// Load a configuration file from path and run validation.
///
/// - Reads TOML.
/// - Applies defaults (handled by `serde` + `Default` impls).
/// - Checks limits and compiles `[policy].allowed_working_dirs`.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<WorkerConfig> {
    let raw_config = load_from_path(&path)?;
    let config = WorkerConfig::try_from(raw_config)?;
    Ok(config)
}

/// Load the config at `path`, or fall back to built-in defaults.
pub fn load_or_default(path: Option<&Path>) -> Result<WorkerConfig> {
    match path {
        Some(path) => load_and_validate(path),
        None => Ok(WorkerConfig::default()),
    }
}
