// src/job/mod.rs

//! Job model and the pre-spawn stages of the pipeline.
//!
//! - [`descriptor`] holds the wire form of a job and its validated,
//!   immutable counterpart.
//! - [`identity`] decides who the job runs as and where (`check_uid`,
//!   `check_cwd`).
//! - [`command`] turns a validated job into an argv-style [`CommandSpec`].
//!
//! Nothing in this module spawns a process: a job rejected here never
//! reaches the launcher.

pub mod command;
pub mod descriptor;
pub mod identity;

pub use command::{CommandSpec, build_command, to_integer};
pub use descriptor::{JobDescriptor, NumericField, RawJobDescriptor, StreamOptions};
pub use identity::{IdentityContext, TargetUser, check_cwd, check_uid};
