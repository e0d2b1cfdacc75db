// src/exec/mod.rs

//! Process execution layer.
//!
//! Everything that happens to a job after it has been validated lives here:
//!
//! - [`launcher`] spawns the child under the target identity, in its own
//!   process group.
//! - [`capture`] reads the child's stdout/stderr incrementally.
//! - [`watchdog`] enforces the job's deadline.
//! - [`pack`] holds pending output and decides where messages are cut.
//! - [`sender`] turns captured output into ordered responses and sends the
//!   terminal one.
//! - [`coordination`] is the small piece of per-job state those tasks share.
//! - [`pipeline`] wires the stages together for one job.

pub mod capture;
pub mod coordination;
pub mod launcher;
pub mod pack;
pub mod pipeline;
pub mod sender;
pub mod watchdog;

pub use capture::{CapturedChunk, spawn_capturer};
pub use coordination::{JobCoordination, JobState};
pub use launcher::{ExecutionHandle, launch};
pub use pack::{PackSlice, ResponsePack};
pub use pipeline::run_job;
pub use sender::{DeliveryReport, ResponseSender, Termination};
pub use watchdog::{WatchdogVerdict, terminate_process_group, watch_deadline};
