// src/config/mod.rs

//! Configuration loading and validation for execworker.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate limits and compile policy patterns (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path};
pub use model::{OutputSection, PolicySection, RawConfigFile, WorkerConfig, WorkerSection};
