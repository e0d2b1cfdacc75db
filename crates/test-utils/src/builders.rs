#![allow(dead_code)]

use std::collections::BTreeMap;

use execworker::config::{RawConfigFile, WorkerConfig};
use execworker::job::{NumericField, RawJobDescriptor};
use execworker::types::ChunkPolicy;

/// Builder for `WorkerConfig` to simplify test setup.
///
/// Starts from the built-in defaults with a short send timeout so a test
/// with a stuck consumer fails fast.
pub struct WorkerConfigBuilder {
    config: RawConfigFile,
}

impl WorkerConfigBuilder {
    pub fn new() -> Self {
        let mut config = RawConfigFile::default();
        config.worker.send_timeout_ms = 200;
        Self { config }
    }

    pub fn max_concurrent_jobs(mut self, n: usize) -> Self {
        self.config.worker.max_concurrent_jobs = n;
        self
    }

    pub fn default_timeout_secs(mut self, secs: u64) -> Self {
        self.config.worker.default_timeout_secs = secs;
        self
    }

    pub fn max_timeout_secs(mut self, secs: u64) -> Self {
        self.config.worker.max_timeout_secs = secs;
        self
    }

    pub fn kill_grace_ms(mut self, ms: u64) -> Self {
        self.config.worker.kill_grace_ms = ms;
        self
    }

    pub fn chunk_policy(mut self, policy: ChunkPolicy) -> Self {
        self.config.output.chunk_policy = policy;
        self
    }

    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.output.chunk_size = size;
        self
    }

    pub fn allow_user(mut self, name: &str) -> Self {
        self.config.policy.allowed_users.push(name.to_string());
        self
    }

    pub fn allow_root(mut self, val: bool) -> Self {
        self.config.policy.allow_root = val;
        self
    }

    pub fn allow_working_dir(mut self, pattern: &str) -> Self {
        self.config
            .policy
            .allowed_working_dirs
            .push(pattern.to_string());
        self
    }

    pub fn build(self) -> WorkerConfig {
        WorkerConfig::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for WorkerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for the wire form of a job.
pub struct JobBuilder {
    job: RawJobDescriptor,
}

impl JobBuilder {
    pub fn new(id: &str, command: &str) -> Self {
        Self {
            job: RawJobDescriptor {
                id: id.to_string(),
                command: command.to_string(),
                working_dir: Some("/tmp".to_string()),
                timeout: Some(NumericField::Int(5)),
                env: BTreeMap::new(),
                ..RawJobDescriptor::default()
            },
        }
    }

    pub fn arg(mut self, arg: &str) -> Self {
        self.job.args.push(arg.to_string());
        self
    }

    pub fn shell(mut self, val: bool) -> Self {
        self.job.shell = val;
        self
    }

    pub fn run_as(mut self, user: &str) -> Self {
        self.job.run_as = Some(user.to_string());
        self
    }

    pub fn working_dir(mut self, dir: &str) -> Self {
        self.job.working_dir = Some(dir.to_string());
        self
    }

    pub fn no_working_dir(mut self) -> Self {
        self.job.working_dir = None;
        self
    }

    pub fn timeout(mut self, secs: u64) -> Self {
        self.job.timeout = Some(NumericField::Int(secs as i64));
        self
    }

    /// Timeout exactly as a dispatcher might send it as text.
    pub fn timeout_text(mut self, text: &str) -> Self {
        self.job.timeout = Some(NumericField::Text(text.to_string()));
        self
    }

    pub fn request_seq(mut self, seq: u64) -> Self {
        self.job.request_seq = Some(NumericField::Int(seq as i64));
        self
    }

    pub fn task_id(mut self, task_id: &str) -> Self {
        self.job.task_id = Some(task_id.to_string());
        self
    }

    pub fn source(mut self, source: &str) -> Self {
        self.job.source = Some(source.to_string());
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.job.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn stdout_mode(mut self, mode: &str) -> Self {
        self.job.stdout = Some(mode.to_string());
        self
    }

    pub fn stderr_mode(mut self, mode: &str) -> Self {
        self.job.stderr = Some(mode.to_string());
        self
    }

    pub fn stdout_path(mut self, path: &str) -> Self {
        self.job.stdout_path = Some(path.to_string());
        self
    }

    pub fn stderr_path(mut self, path: &str) -> Self {
        self.job.stderr_path = Some(path.to_string());
        self
    }

    pub fn build(self) -> RawJobDescriptor {
        self.job
    }
}
