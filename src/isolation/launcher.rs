//! Isolated process launcher
//!
//! Saves the script, opens the log, and spawns the isolation command with
//! a pre-exec hook that joins the environment's cgroup. The PID is
//! persisted before `launch` returns, so any later manager process can
//! find it.

use std::fs::{self, File};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tracing::{debug, info};

use super::{CgroupJoin, IsolationCommand};
use crate::artifacts::ArtifactLayout;
use crate::environment::EnvironmentConfig;
use crate::error::{ExecSpaceError, Result};

/// A process started by [`Launcher::launch`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchedProcess {
    pub pid: i32,
    pub script_path: PathBuf,
    pub log_path: PathBuf,
}

/// Starts scripts inside fresh namespaces, already confined to a cgroup
#[derive(Debug, Clone)]
pub struct Launcher {
    layout: ArtifactLayout,
    isolation: IsolationCommand,
}

impl Launcher {
    pub fn new(layout: ArtifactLayout, isolation: IsolationCommand) -> Self {
        Self { layout, isolation }
    }

    /// Write the script for `env_id` and mark it executable (0755)
    ///
    /// Overwrites any earlier script for the same identifier.
    pub fn save_script(&self, env_id: &str, content: &str) -> Result<PathBuf> {
        let path = self.layout.script_path(env_id);
        fs::write(&path, content)?;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
        debug!(env_id, path = %path.display(), "Script saved");
        Ok(path)
    }

    /// Spawn the isolated script as a member of `group_path`
    ///
    /// The child writes its own PID into `group_path/cgroup.procs` before
    /// exec. If that write fails the spawn fails: nothing ever runs
    /// outside its limits.
    pub fn launch(&self, config: &EnvironmentConfig, group_path: &Path) -> Result<LaunchedProcess> {
        let env_id = config.env_id.as_str();
        let script_path = self.save_script(env_id, &config.script_content)?;

        let log_path = self.layout.log_path(env_id);
        let log = File::create(&log_path)?;
        let log_err = log.try_clone()?;

        let join = CgroupJoin::new(group_path)?;

        let mut command = self.isolation.command(&script_path);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err));

        // SAFETY: pre_exec runs after fork() but before exec() in the child.
        // join_self only uses async-signal-safe libc calls on memory that
        // was prepared before the fork.
        unsafe {
            command.pre_exec(move || join.join_self());
        }

        let child = command.spawn().map_err(|e| {
            ExecSpaceError::Launch(format!(
                "{} for {}: {}",
                self.isolation.program.display(),
                env_id,
                e
            ))
        })?;

        let pid = i32::try_from(child.id())
            .map_err(|_| ExecSpaceError::Launch(format!("pid {} out of range", child.id())))?;

        // The Child handle is dropped here; liveness and reaping go through
        // the PID file so any manager instance can take over.
        drop(child);

        self.layout.write_pid(env_id, pid)?;

        info!(env_id, pid, log = %log_path.display(), "Isolated process launched");

        Ok(LaunchedProcess {
            pid,
            script_path,
            log_path,
        })
    }
}
