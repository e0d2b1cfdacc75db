// src/job/identity.rs

//! Identity and working-directory validation.
//!
//! Both checks run before anything is spawned. A failure here is terminal
//! for the job: the caller gets a single `PermissionDenied` or `InvalidPath`
//! response and no process ever exists.

use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use nix::unistd::{User, getegid, geteuid, getuid};
use tracing::{debug, warn};

use crate::config::WorkerConfig;
use crate::errors::{Result, WorkerError};
use crate::job::descriptor::JobDescriptor;

/// The account a job's process will run as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetUser {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub home: PathBuf,
    pub shell: PathBuf,
}

impl TargetUser {
    fn from_passwd(user: User) -> Self {
        Self {
            name: user.name,
            uid: user.uid.as_raw(),
            gid: user.gid.as_raw(),
            home: user.dir,
            shell: user.shell,
        }
    }
}

/// Worker ids plus the resolved target, fixed before spawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityContext {
    /// Effective uid of the worker process.
    pub euid: u32,
    /// Real uid of the worker process.
    pub ruid: u32,
    pub target: TargetUser,
}

impl IdentityContext {
    /// True when the child must be started under a different uid than the
    /// worker's own.
    pub fn switches_identity(&self) -> bool {
        self.target.uid != self.euid
    }

    fn worker_is_privileged(&self) -> bool {
        self.euid == 0
    }
}

/// Resolve the identity of the worker process itself.
///
/// Containers often run under a uid with no passwd entry; that is not an
/// error, the account is synthesised from the raw ids.
pub fn current_user() -> Result<TargetUser> {
    let euid = geteuid();
    match User::from_uid(euid) {
        Ok(Some(user)) => Ok(TargetUser::from_passwd(user)),
        Ok(None) => Ok(TargetUser {
            name: euid.as_raw().to_string(),
            uid: euid.as_raw(),
            gid: getegid().as_raw(),
            home: PathBuf::from("/"),
            shell: PathBuf::from("/bin/sh"),
        }),
        Err(errno) => Err(WorkerError::PermissionDenied(format!(
            "resolving worker uid {}: {errno}",
            euid.as_raw()
        ))),
    }
}

/// Decide whether the job may run as the identity it asks for.
pub fn check_uid(job: &JobDescriptor, config: &WorkerConfig) -> Result<IdentityContext> {
    let euid = geteuid().as_raw();
    let ruid = getuid().as_raw();

    if euid != ruid {
        warn!(
            job_id = %job.id,
            euid,
            ruid,
            "worker effective and real uid differ"
        );
    }

    let target = match job.run_as.as_deref() {
        None => current_user()?,
        Some(name) => resolve_requested_user(name, config)?,
    };

    let identity = IdentityContext { euid, ruid, target };

    if job.run_as.is_some() {
        if identity.target.uid == 0 && !config.policy.allow_root {
            return Err(WorkerError::PermissionDenied(format!(
                "user '{}' resolves to uid 0 and [policy].allow_root is false",
                identity.target.name
            )));
        }

        if identity.switches_identity() && !identity.worker_is_privileged() {
            return Err(WorkerError::PermissionDenied(format!(
                "worker running as uid {} cannot switch to user '{}' (uid {})",
                identity.euid, identity.target.name, identity.target.uid
            )));
        }
    }

    debug!(
        job_id = %job.id,
        user = %identity.target.name,
        uid = identity.target.uid,
        switching = identity.switches_identity(),
        "identity accepted"
    );

    Ok(identity)
}

fn resolve_requested_user(name: &str, config: &WorkerConfig) -> Result<TargetUser> {
    if !config.policy.permits_user(name) {
        return Err(WorkerError::PermissionDenied(format!(
            "user '{name}' is not in [policy].allowed_users"
        )));
    }

    match User::from_name(name) {
        Ok(Some(user)) => Ok(TargetUser::from_passwd(user)),
        Ok(None) => Err(WorkerError::PermissionDenied(format!(
            "unknown user '{name}'"
        ))),
        Err(errno) => Err(WorkerError::PermissionDenied(format!(
            "resolving user '{name}': {errno}"
        ))),
    }
}

/// Resolve and check the job's working directory for the target identity.
///
/// Returns the canonical path the child will start in.
pub fn check_cwd(
    job: &JobDescriptor,
    identity: &IdentityContext,
    config: &WorkerConfig,
) -> Result<PathBuf> {
    let requested = match job.working_dir {
        Some(ref dir) => dir.clone(),
        None if identity.target.home.is_dir() => identity.target.home.clone(),
        None => PathBuf::from("/"),
    };

    if !requested.is_absolute() {
        return Err(WorkerError::InvalidPath(format!(
            "working directory '{}' must be absolute",
            requested.display()
        )));
    }

    let canonical = fs::canonicalize(&requested).map_err(|e| {
        WorkerError::InvalidPath(format!(
            "working directory '{}': {e}",
            requested.display()
        ))
    })?;

    let meta = fs::metadata(&canonical).map_err(|e| {
        WorkerError::InvalidPath(format!("working directory '{}': {e}", canonical.display()))
    })?;
    if !meta.is_dir() {
        return Err(WorkerError::InvalidPath(format!(
            "working directory '{}' is not a directory",
            canonical.display()
        )));
    }

    if !config.permits_working_dir(&canonical) {
        return Err(WorkerError::InvalidPath(format!(
            "working directory '{}' is outside [policy].allowed_working_dirs",
            canonical.display()
        )));
    }

    check_search_path(&canonical, identity)?;

    Ok(canonical)
}

/// Kind of access checked against a file's mode bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Access {
    Search,
    Write,
}

impl Access {
    /// The "other" bit; owner and group bits are shifted from it.
    fn bit(self) -> u32 {
        match self {
            Access::Search => 0o001,
            Access::Write => 0o002,
        }
    }
}

/// Groups the child will hold.
///
/// Switching uid also drops supplementary groups, so only the target's
/// primary gid counts then. Otherwise the child inherits the worker's groups.
fn effective_groups(identity: &IdentityContext) -> Vec<u32> {
    if identity.switches_identity() {
        return vec![identity.target.gid];
    }

    let mut groups = worker_groups();
    let egid = getegid().as_raw();
    if !groups.contains(&egid) {
        groups.push(egid);
    }
    groups
}

#[cfg(target_os = "linux")]
fn worker_groups() -> Vec<u32> {
    nix::unistd::getgroups()
        .map(|groups| groups.into_iter().map(|g| g.as_raw()).collect())
        .unwrap_or_default()
}

#[cfg(not(target_os = "linux"))]
fn worker_groups() -> Vec<u32> {
    Vec::new()
}

/// Whether the child would be granted `access` on a file with `meta`.
pub(crate) fn may_access(
    meta: &fs::Metadata,
    identity: &IdentityContext,
    access: Access,
) -> bool {
    if identity.target.uid == 0 {
        return true;
    }

    let mode = meta.mode();
    let bit = access.bit();
    if meta.uid() == identity.target.uid {
        return mode & (bit << 6) != 0;
    }
    if effective_groups(identity).contains(&meta.gid()) {
        return mode & (bit << 3) != 0;
    }
    mode & bit != 0
}

/// Every directory from `/` down to `dir` must be searchable by the child.
pub(crate) fn check_search_path(dir: &Path, identity: &IdentityContext) -> Result<()> {
    let mut components: Vec<&Path> = dir.ancestors().collect();
    components.reverse();

    for component in components {
        let meta = fs::metadata(component).map_err(|e| {
            WorkerError::InvalidPath(format!("'{}': {e}", component.display()))
        })?;
        if !may_access(&meta, identity, Access::Search) {
            return Err(WorkerError::PermissionDenied(format!(
                "user '{}' cannot search '{}'",
                identity.target.name,
                component.display()
            )));
        }
    }
    Ok(())
}
