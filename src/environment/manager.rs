//! Environment Manager - the operation contract used by the API layer
//!
//! The EnvironmentManager is responsible for:
//! - Initializing the execspace cgroup hierarchy once, at construction
//! - Creating environments: group → limits → launch → PID file, in order
//! - Answering status/logs/list and performing stop/remove via the tracker
//!
//! It holds no per-environment state. Two managers pointed at the same
//! directories see the same environments.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{error, info};

use super::config::{
    validate_id, CreatedEnvironment, EnvironmentConfig, EnvironmentStatus, EnvironmentSummary,
};
use crate::artifacts::ArtifactLayout;
use crate::cgroups::{CgroupManager, CpuStats, Enforcement, ResourceLimits, CGROUP_NAMESPACE, CGROUP_ROOT};
use crate::error::{ExecSpaceError, Result};
use crate::isolation::{IsolationCommand, Launcher};
use crate::lifecycle::{Tracker, DEFAULT_SETTLE_INTERVAL, DEFAULT_STOP_GRACE, NO_LOGS};
use crate::metrics::{
    CREATE_DURATION, CREATE_FAILURES, ENVIRONMENTS_CREATED, ENVIRONMENTS_REMOVED,
    ENVIRONMENTS_STOPPED,
};
use crate::privileges::PrivilegeReport;

/// Default directory for scripts and PID files
pub const DEFAULT_ENV_DIR: &str = "/var/lib/execspace/environments";

/// Default directory for environment logs
pub const DEFAULT_LOG_DIR: &str = "/var/log/execspace";

/// Configuration for the EnvironmentManager
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// cgroup v2 mount point
    pub cgroup_root: PathBuf,
    /// Name of our subtree below the mount point
    pub group_namespace: String,
    /// Scripts and PID files
    pub env_dir: PathBuf,
    /// Log files
    pub log_dir: PathBuf,
    /// unshare invocation
    pub isolation: IsolationCommand,
    /// Wait between SIGTERM and SIGKILL in `stop`
    pub stop_grace: Duration,
    /// Wait between killing group members and rmdir in `remove`
    pub settle_interval: Duration,
    /// Policy for missing controllers
    pub enforcement: Enforcement,
    /// Cross-check live PIDs against cgroup membership
    pub verify_membership: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            cgroup_root: PathBuf::from(CGROUP_ROOT),
            group_namespace: CGROUP_NAMESPACE.to_string(),
            env_dir: PathBuf::from(DEFAULT_ENV_DIR),
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            isolation: IsolationCommand::default(),
            stop_grace: DEFAULT_STOP_GRACE,
            settle_interval: DEFAULT_SETTLE_INTERVAL,
            enforcement: Enforcement::BestEffort,
            verify_membership: true,
        }
    }
}

impl ManagerConfig {
    /// Defaults overridden by `EXECSPACE_*` environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each key
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(root) = lookup("EXECSPACE_CGROUP_ROOT") {
            config.cgroup_root = PathBuf::from(root);
        }
        if let Some(dir) = lookup("EXECSPACE_ENV_DIR") {
            config.env_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("EXECSPACE_LOG_DIR") {
            config.log_dir = PathBuf::from(dir);
        }
        if let Some(program) = lookup("EXECSPACE_UNSHARE") {
            config.isolation.program = PathBuf::from(program);
        }
        if let Some(shell) = lookup("EXECSPACE_SHELL") {
            config.isolation.shell = PathBuf::from(shell);
        }
        if let Some(userns) = lookup("EXECSPACE_USERNS") {
            config.isolation.user_namespace = matches!(userns.as_str(), "1" | "true" | "yes");
        }
        if let Some(mode) = lookup("EXECSPACE_ENFORCEMENT") {
            config.enforcement = if mode.eq_ignore_ascii_case("strict") {
                Enforcement::Strict
            } else {
                Enforcement::BestEffort
            };
        }

        config
    }
}

/// Live resource usage read from the environment's cgroup
#[derive(Debug, Clone, Serialize)]
pub struct ResourceUsage {
    pub memory_bytes: u64,
    pub cpu: CpuStats,
}

/// Everything known about one environment
#[derive(Debug, Clone, Serialize)]
pub struct EnvironmentInfo {
    pub id: String,
    pub status: EnvironmentStatus,
    pub pid: Option<i32>,
    pub cgroup: Option<String>,
    pub script_file: Option<String>,
    pub log_file: Option<String>,
    pub usage: Option<ResourceUsage>,
}

/// Creates and manages isolated execution environments
pub struct EnvironmentManager {
    config: ManagerConfig,
    layout: ArtifactLayout,
    cgroups: CgroupManager,
    launcher: Launcher,
    tracker: Tracker,
    privileges: PrivilegeReport,
}

impl EnvironmentManager {
    /// Create a new EnvironmentManager
    ///
    /// Creates the artifact directories (fatal if impossible) and
    /// initializes the cgroup hierarchy (never fatal). Missing privileges
    /// are reported as a warning; operations that need them fail later.
    pub fn new(config: ManagerConfig) -> Result<Self> {
        let layout = ArtifactLayout::new(&config.env_dir, &config.log_dir);
        layout.ensure_dirs()?;

        let privileges = PrivilegeReport::probe();
        privileges.warn_if_unprivileged();

        let cgroups = CgroupManager::new(&config.cgroup_root, &config.group_namespace)
            .with_enforcement(config.enforcement);
        cgroups.initialize();

        let launcher = Launcher::new(layout.clone(), config.isolation.clone());
        let tracker = Tracker::new(layout.clone(), cgroups.clone())
            .with_stop_grace(config.stop_grace)
            .with_settle_interval(config.settle_interval)
            .with_membership_check(config.verify_membership);

        info!(
            env_dir = %config.env_dir.display(),
            log_dir = %config.log_dir.display(),
            cgroup = %cgroups.base_path().display(),
            "Environment manager ready"
        );

        Ok(Self {
            config,
            layout,
            cgroups,
            launcher,
            tracker,
            privileges,
        })
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn privileges(&self) -> PrivilegeReport {
        self.privileges
    }

    pub fn cgroups(&self) -> &CgroupManager {
        &self.cgroups
    }

    /// Create the environment's group, apply limits and launch the script
    ///
    /// Steps run strictly in order; the first failure aborts the call.
    /// Artifacts of an aborted attempt are left for `remove`.
    pub fn create(&self, config: &EnvironmentConfig) -> Result<CreatedEnvironment> {
        let started = Instant::now();
        let env_id = config.env_id.as_str();

        config.validate().map_err(|e| fail("validate", env_id, e))?;
        info!(env_id, name = %config.name, "Creating environment");

        let group = self
            .cgroups
            .create_group(env_id)
            .map_err(|e| fail("cgroup", env_id, e))?;

        if self.config.enforcement == Enforcement::Strict {
            self.cgroups
                .check_enforceable(env_id)
                .map_err(|e| fail("cgroup", env_id, e))?;
        }

        self.cgroups
            .apply_limits(&group, &ResourceLimits::from(config))
            .map_err(|e| fail("limits", env_id, e))?;

        let launched = self
            .launcher
            .launch(config, &group)
            .map_err(|e| fail("launch", env_id, e))?;

        CREATE_DURATION.observe(started.elapsed().as_secs_f64());
        ENVIRONMENTS_CREATED.inc();
        info!(env_id, pid = launched.pid, "Environment created");

        Ok(CreatedEnvironment {
            env_id: env_id.to_string(),
            pid: launched.pid,
            status: EnvironmentStatus::Running,
            cgroup: group.display().to_string(),
            log_file: launched.log_path.display().to_string(),
        })
    }

    /// Derived status; ERROR for unknown or malformed identifiers
    pub fn status(&self, env_id: &str) -> EnvironmentStatus {
        if validate_id(env_id).is_err() {
            return EnvironmentStatus::Error;
        }
        self.tracker.status(env_id)
    }

    /// Log contents or a sentinel
    pub fn logs(&self, env_id: &str) -> String {
        if validate_id(env_id).is_err() {
            return NO_LOGS.to_string();
        }
        self.tracker.logs(env_id)
    }

    /// Graceful-then-forced termination; false if no PID is recorded
    pub fn stop(&self, env_id: &str) -> bool {
        if validate_id(env_id).is_err() {
            return false;
        }
        let stopped = self.tracker.stop(env_id);
        if stopped {
            ENVIRONMENTS_STOPPED.inc();
        }
        stopped
    }

    /// Full teardown; false if nothing existed for the identifier
    pub fn remove(&self, env_id: &str) -> bool {
        if validate_id(env_id).is_err() {
            return false;
        }
        let removed = self.tracker.remove(env_id);
        if removed {
            ENVIRONMENTS_REMOVED.inc();
        }
        removed
    }

    /// All environments with a PID file and their derived status
    pub fn list(&self) -> Vec<EnvironmentSummary> {
        self.tracker.list()
    }

    /// Status, PID, artifact paths and live usage for one environment
    pub fn inspect(&self, env_id: &str) -> Result<EnvironmentInfo> {
        validate_id(env_id)?;

        let existing = |path: PathBuf| path.exists().then(|| path.display().to_string());

        let usage = match (self.cgroups.memory_usage(env_id), self.cgroups.cpu_stats(env_id)) {
            (Ok(memory_bytes), Ok(cpu)) => Some(ResourceUsage { memory_bytes, cpu }),
            _ => None,
        };

        Ok(EnvironmentInfo {
            id: env_id.to_string(),
            status: self.tracker.status(env_id),
            pid: self.tracker.read_pid(env_id),
            cgroup: existing(self.cgroups.group_path(env_id)),
            script_file: existing(self.layout.script_path(env_id)),
            log_file: existing(self.layout.log_path(env_id)),
            usage,
        })
    }
}

/// Count and log a failed creation stage
fn fail(stage: &str, env_id: &str, e: ExecSpaceError) -> ExecSpaceError {
    CREATE_FAILURES.with_label_values(&[stage]).inc();
    error!(env_id, stage, error = %e, "Failed to create environment");
    e
}
