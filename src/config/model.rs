// src/config/model.rs

use std::time::Duration;

use globset::GlobSet;
use serde::Deserialize;

use crate::types::ChunkPolicy;

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [worker]
/// max_concurrent_jobs = 8
/// default_timeout_secs = 30
///
/// [output]
/// chunk_policy = "size"
/// chunk_size = 1000
///
/// [policy]
/// allowed_users = ["deploy", "builder"]
/// allow_root = false
/// allowed_working_dirs = ["/srv/**", "/tmp/**"]
/// ```
///
/// All sections are optional and have reasonable defaults.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfigFile {
    #[serde(default)]
    pub worker: WorkerSection,

    #[serde(default)]
    pub output: OutputSection,

    #[serde(default)]
    pub policy: PolicySection,
}

/// `[worker]` section: concurrency, queueing and deadline limits.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerSection {
    /// Upper bound on jobs executing at the same time.
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// Capacity of the inbound job channel.
    #[serde(default = "default_inbound_queue_length")]
    pub inbound_queue_length: usize,

    /// Capacity of the outbound response channel used by the binary.
    #[serde(default = "default_response_queue_length")]
    pub response_queue_length: usize,

    /// How long a single response send may wait on a full channel.
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,

    /// Timeout applied to jobs that do not carry one.
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,

    /// Largest timeout a job may request.
    #[serde(default = "default_max_timeout_secs")]
    pub max_timeout_secs: u64,

    /// Grace period between SIGTERM and SIGKILL when a job times out.
    ///
    /// `0` sends SIGKILL straight away.
    #[serde(default)]
    pub kill_grace_ms: u64,

    /// `PATH` given to every child process.
    #[serde(default = "default_path")]
    pub default_path: String,
}

fn default_max_concurrent_jobs() -> usize {
    8
}

fn default_inbound_queue_length() -> usize {
    64
}

fn default_response_queue_length() -> usize {
    256
}

fn default_send_timeout_ms() -> u64 {
    1000
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_timeout_secs() -> u64 {
    86_400
}

fn default_path() -> String {
    "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin".to_string()
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            inbound_queue_length: default_inbound_queue_length(),
            response_queue_length: default_response_queue_length(),
            send_timeout_ms: default_send_timeout_ms(),
            default_timeout_secs: default_timeout_secs(),
            max_timeout_secs: default_max_timeout_secs(),
            kill_grace_ms: 0,
            default_path: default_path(),
        }
    }
}

/// `[output]` section: how captured output is cut into responses.
#[derive(Debug, Clone, Deserialize)]
pub struct OutputSection {
    #[serde(default)]
    pub chunk_policy: ChunkPolicy,

    /// Chunk boundary in bytes for `chunk_policy = "size"`; also the read
    /// buffer size of the capturer.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

fn default_chunk_size() -> usize {
    1000
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            chunk_policy: ChunkPolicy::default(),
            chunk_size: default_chunk_size(),
        }
    }
}

/// `[policy]` section: who a job may run as, and where.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PolicySection {
    /// User names a job may request via `run_as`. Empty allows any user.
    #[serde(default)]
    pub allowed_users: Vec<String>,

    /// Whether `run_as` may resolve to uid 0.
    #[serde(default)]
    pub allow_root: bool,

    /// Glob patterns a working directory must match. Empty allows any.
    #[serde(default)]
    pub allowed_working_dirs: Vec<String>,
}

impl PolicySection {
    pub fn permits_user(&self, name: &str) -> bool {
        self.allowed_users.is_empty() || self.allowed_users.iter().any(|u| u == name)
    }
}

/// Validated configuration.
///
/// Built only through `TryFrom<RawConfigFile>` so every instance has passed
/// validation and carries compiled working-directory patterns.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker: WorkerSection,
    pub output: OutputSection,
    pub policy: PolicySection,
    allowed_dirs: Option<GlobSet>,
}

impl WorkerConfig {
    pub(crate) fn new_unchecked(
        worker: WorkerSection,
        output: OutputSection,
        policy: PolicySection,
        allowed_dirs: Option<GlobSet>,
    ) -> Self {
        Self {
            worker,
            output,
            policy,
            allowed_dirs,
        }
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.worker.send_timeout_ms)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.worker.kill_grace_ms)
    }

    /// Whether `path` is inside the configured working-directory allow-list.
    pub fn permits_working_dir(&self, path: &std::path::Path) -> bool {
        match &self.allowed_dirs {
            Some(set) => set.is_match(path),
            None => true,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::new_unchecked(
            WorkerSection::default(),
            OutputSection::default(),
            PolicySection::default(),
            None,
        )
    }
}
