// src/config/validate.rs

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::config::model::{RawConfigFile, WorkerConfig};
use crate::errors::{Result, WorkerError};

impl TryFrom<RawConfigFile> for WorkerConfig {
    type Error = crate::errors::WorkerError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        let allowed_dirs = compile_dir_patterns(&raw.policy.allowed_working_dirs)?;
        Ok(WorkerConfig::new_unchecked(
            raw.worker,
            raw.output,
            raw.policy,
            allowed_dirs,
        ))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    validate_worker_limits(cfg)?;
    validate_timeouts(cfg)?;
    validate_output(cfg)?;
    validate_policy(cfg)?;
    Ok(())
}

fn validate_worker_limits(cfg: &RawConfigFile) -> Result<()> {
    let w = &cfg.worker;
    for (key, value) in [
        ("max_concurrent_jobs", w.max_concurrent_jobs),
        ("inbound_queue_length", w.inbound_queue_length),
        ("response_queue_length", w.response_queue_length),
    ] {
        if value == 0 {
            return Err(WorkerError::ConfigError(format!(
                "[worker].{key} must be >= 1 (got 0)"
            )));
        }
    }
    if w.send_timeout_ms == 0 {
        return Err(WorkerError::ConfigError(
            "[worker].send_timeout_ms must be >= 1 (got 0)".to_string(),
        ));
    }
    if w.default_path.trim().is_empty() {
        return Err(WorkerError::ConfigError(
            "[worker].default_path must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_timeouts(cfg: &RawConfigFile) -> Result<()> {
    let w = &cfg.worker;
    if w.default_timeout_secs == 0 {
        return Err(WorkerError::ConfigError(
            "[worker].default_timeout_secs must be >= 1 (got 0)".to_string(),
        ));
    }
    if w.default_timeout_secs > w.max_timeout_secs {
        return Err(WorkerError::ConfigError(format!(
            "[worker].default_timeout_secs ({}) exceeds [worker].max_timeout_secs ({})",
            w.default_timeout_secs, w.max_timeout_secs
        )));
    }
    Ok(())
}

fn validate_output(cfg: &RawConfigFile) -> Result<()> {
    if cfg.output.chunk_size == 0 {
        return Err(WorkerError::ConfigError(
            "[output].chunk_size must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_policy(cfg: &RawConfigFile) -> Result<()> {
    for user in cfg.policy.allowed_users.iter() {
        if user.trim().is_empty() {
            return Err(WorkerError::ConfigError(
                "[policy].allowed_users must not contain empty names".to_string(),
            ));
        }
    }
    for pattern in cfg.policy.allowed_working_dirs.iter() {
        if !pattern.starts_with('/') {
            return Err(WorkerError::ConfigError(format!(
                "[policy].allowed_working_dirs entry '{pattern}' must be an absolute pattern"
            )));
        }
    }
    Ok(())
}

fn compile_dir_patterns(patterns: &[String]) -> Result<Option<GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }

    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| {
            WorkerError::ConfigError(format!(
                "[policy].allowed_working_dirs entry '{pattern}' is not a valid glob: {e}"
            ))
        })?;
        builder.add(glob);
    }

    let set = builder.build().map_err(|e| {
        WorkerError::ConfigError(format!("compiling [policy].allowed_working_dirs: {e}"))
    })?;
    Ok(Some(set))
}
