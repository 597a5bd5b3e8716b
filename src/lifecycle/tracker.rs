//! Lifecycle tracking from on-disk artifacts
//!
//! The tracker keeps no table of environments. Every answer is derived
//! from the PID file, the log file and the cgroup the launcher wrote,
//! so it works the same in a manager process that never launched
//! anything.
//!
//! # Teardown order
//!
//! ```text
//! remove(id)
//!   1. stop(id)              SIGTERM → grace → SIGKILL on the recorded PID
//!   2. kill group members    SIGKILL every pid in cgroup.procs (+ cgroup.kill)
//!   3. settle                give the kernel time to empty the group
//!   4. rmdir group           retried once after another kill pass
//!   5. unlink .pid .sh .log
//! ```
//!
//! A failing step is logged and the next one still runs.

use std::fs;
use std::io;
use std::path::Path;
use std::thread;
use std::time::Duration;

use nix::sys::signal::Signal;
use tracing::{debug, info, warn};

use super::process::{self, Delivery, Liveness};
use crate::artifacts::ArtifactLayout;
use crate::cgroups::CgroupManager;
use crate::environment::{EnvironmentStatus, EnvironmentSummary};

/// Returned by `logs` when no log file exists
pub const NO_LOGS: &str = "No logs available";

/// Grace period between SIGTERM and SIGKILL
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(1);

/// Wait after killing group members, before rmdir
pub const DEFAULT_SETTLE_INTERVAL: Duration = Duration::from_millis(500);

/// Answers liveness, logs and termination for environment ids
#[derive(Debug, Clone)]
pub struct Tracker {
    layout: ArtifactLayout,
    cgroups: CgroupManager,
    stop_grace: Duration,
    settle_interval: Duration,
    verify_membership: bool,
}

impl Tracker {
    pub fn new(layout: ArtifactLayout, cgroups: CgroupManager) -> Self {
        Self {
            layout,
            cgroups,
            stop_grace: DEFAULT_STOP_GRACE,
            settle_interval: DEFAULT_SETTLE_INTERVAL,
            verify_membership: true,
        }
    }

    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    pub fn with_settle_interval(mut self, settle: Duration) -> Self {
        self.settle_interval = settle;
        self
    }

    /// Cross-check live PIDs against the group's `cgroup.procs`
    pub fn with_membership_check(mut self, enabled: bool) -> Self {
        self.verify_membership = enabled;
        self
    }

    /// Recorded PID, or None if missing, unparsable or unsafe to signal
    pub fn read_pid(&self, env_id: &str) -> Option<i32> {
        let content = fs::read_to_string(self.layout.pid_path(env_id)).ok()?;
        let pid: i32 = content.trim().parse().ok()?;

        // Never signal init, our own process group or "all processes"
        if pid <= 1 {
            warn!(env_id, pid, "Ignoring unusable PID in PID file");
            return None;
        }
        Some(pid)
    }

    /// Derive the current status
    ///
    /// A live PID that is missing from a readable `cgroup.procs` belongs
    /// to some other process that reused the number, so it reports
    /// EXITED. Without a readable group the probe alone decides.
    pub fn status(&self, env_id: &str) -> EnvironmentStatus {
        let Some(pid) = self.read_pid(env_id) else {
            return EnvironmentStatus::Error;
        };

        match process::probe(pid) {
            Liveness::Gone => EnvironmentStatus::Exited,
            Liveness::Alive if self.is_foreign(env_id, pid) => {
                debug!(env_id, pid, "PID alive but not in its cgroup, treating as exited");
                EnvironmentStatus::Exited
            }
            Liveness::Alive => EnvironmentStatus::Running,
        }
    }

    /// The group's readable `cgroup.procs` does not list `pid`
    ///
    /// Always false with membership checks off or an unreadable group.
    fn is_foreign(&self, env_id: &str, pid: i32) -> bool {
        if !self.verify_membership {
            return false;
        }
        match self.cgroups.procs(env_id) {
            Ok(members) => !members.contains(&pid),
            Err(_) => false,
        }
    }

    /// Log contents, a sentinel when absent, or an error string
    ///
    /// Never fails: log retrieval must not break the caller's request.
    pub fn logs(&self, env_id: &str) -> String {
        let path = self.layout.log_path(env_id);
        match fs::read(&path) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => NO_LOGS.to_string(),
            Err(e) => {
                warn!(env_id, path = %path.display(), error = %e, "Failed to read logs");
                format!("Error reading logs: {}", e)
            }
        }
    }

    /// SIGTERM, wait the grace period, then SIGKILL unconditionally
    ///
    /// Returns false only when no PID is recorded. Signalling a process
    /// that already exited counts as success. A PID that left its group
    /// belongs to someone else now and is never signalled.
    pub fn stop(&self, env_id: &str) -> bool {
        let Some(pid) = self.read_pid(env_id) else {
            debug!(env_id, "Stop requested but no PID recorded");
            return false;
        };

        if self.is_foreign(env_id, pid) {
            debug!(env_id, pid, "Recorded PID is not in the cgroup, not signalling");
            return true;
        }

        match process::send_signal(pid, Signal::SIGTERM) {
            Ok(Delivery::Delivered) => thread::sleep(self.stop_grace),
            Ok(Delivery::AlreadyGone) => {}
            Err(e) => warn!(env_id, pid, error = %e, "SIGTERM failed"),
        }

        match process::send_signal(pid, Signal::SIGKILL) {
            Ok(_) => {}
            Err(e) => warn!(env_id, pid, error = %e, "SIGKILL failed"),
        }

        process::reap_if_child(pid);

        info!(env_id, pid, "Environment stopped");
        true
    }

    /// Stop, empty and delete the group, then delete every artifact
    ///
    /// Returns true if anything belonging to `env_id` existed.
    pub fn remove(&self, env_id: &str) -> bool {
        let pid_path = self.layout.pid_path(env_id);
        let script_path = self.layout.script_path(env_id);
        let log_path = self.layout.log_path(env_id);

        let found = pid_path.exists()
            || script_path.exists()
            || log_path.exists()
            || self.cgroups.exists(env_id);

        let pid = self
            .read_pid(env_id)
            .filter(|pid| !self.is_foreign(env_id, *pid));
        self.stop(env_id);

        if self.cgroups.exists(env_id) {
            self.kill_members(env_id);
            thread::sleep(self.settle_interval);
            if let Some(pid) = pid {
                process::reap_if_child(pid);
            }

            if let Err(e) = self.cgroups.remove_group(env_id) {
                debug!(env_id, error = %e, "Cgroup busy, killing again before retry");
                self.kill_members(env_id);
                thread::sleep(self.settle_interval);

                if let Err(e) = self.cgroups.remove_group(env_id) {
                    warn!(env_id, error = %e, "Failed to remove cgroup");
                }
            }
        }

        for path in [&pid_path, &script_path, &log_path] {
            remove_artifact(env_id, path);
        }

        if found {
            info!(env_id, "Environment removed");
        } else {
            debug!(env_id, "Nothing to remove");
        }
        found
    }

    /// Every environment with a PID file, with its derived status
    pub fn list(&self) -> Vec<EnvironmentSummary> {
        let ids = match self.layout.pid_ids() {
            Ok(ids) => ids,
            Err(e) => {
                warn!(dir = %self.layout.env_dir().display(), error = %e, "Failed to scan PID files");
                return Vec::new();
            }
        };

        ids.into_iter()
            .map(|id| {
                let status = self.status(&id);
                EnvironmentSummary { id, status }
            })
            .collect()
    }

    /// SIGKILL every member of the group, then ask the kernel to do the same
    ///
    /// Catches descendants the PID file does not know about.
    fn kill_members(&self, env_id: &str) {
        match self.cgroups.procs(env_id) {
            Ok(pids) => {
                for member in pids {
                    if let Err(e) = process::send_signal(member, Signal::SIGKILL) {
                        warn!(env_id, pid = member, error = %e, "Failed to kill cgroup member");
                    }
                }
            }
            Err(e) => debug!(env_id, error = %e, "Cannot read cgroup.procs"),
        }

        if let Err(e) = self.cgroups.kill_all(env_id) {
            debug!(env_id, error = %e, "cgroup.kill write failed");
        }
    }
}

fn remove_artifact(env_id: &str, path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!(env_id, path = %path.display(), "Removed artifact"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(env_id, path = %path.display(), error = %e, "Failed to remove artifact"),
    }
}
