//! cgroup v2 resource isolation for execution environments
//!
//! Each environment gets its own cgroup under /sys/fs/cgroup/execspace/{env_id}/
//!
//! # How cgroups v2 Works
//!
//! ```text
//! /sys/fs/cgroup/                     ← cgroup v2 root
//! └── execspace/                      ← our namespace
//!     ├── 0192f3.../                  ← per-environment cgroup
//!     │   ├── cpu.max                 ← CPU limit: "50000 100000" = 0.5 cores
//!     │   ├── memory.max              ← Memory limit in bytes
//!     │   ├── io.weight               ← "default 500" (when io is delegated)
//!     │   └── cgroup.procs            ← PIDs in this cgroup
//!     └── ...
//! ```
//!
//! When a process is added to a cgroup, the kernel enforces the limits:
//! - CPU: Process gets throttled if it exceeds its quota
//! - Memory: Process gets reclaimed, then OOM-killed, above memory.max
//! - I/O: Proportional share against sibling cgroups

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::environment::EnvironmentConfig;
use crate::error::{ExecSpaceError, Result};

/// Base path for cgroup v2 filesystem
pub const CGROUP_ROOT: &str = "/sys/fs/cgroup";

/// Our namespace within the cgroup hierarchy
pub const CGROUP_NAMESPACE: &str = "execspace";

/// CPU scheduling period in microseconds (100ms)
pub const CPU_PERIOD_USEC: u64 = 100_000;

/// Controllers every environment group needs
pub const REQUIRED_CONTROLLERS: [&str; 3] = ["cpu", "memory", "io"];

/// Resource limits for one environment
///
/// # CPU Quota Explained
///
/// cgroups v2 uses `cpu.max` with format: "{quota} {period}"
/// - "100000 100000" = 1 CPU core
/// - "50000 100000"  = 0.5 CPU cores
///
/// The ceiling is relative to the period, not to the host core count.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceLimits {
    /// Number of CPU cores (can be fractional, e.g., 0.5 for half a core)
    pub cpu_cores: f64,

    /// Memory limit in bytes
    pub memory_bytes: u64,

    /// Proportional I/O weight (1..=10000)
    pub io_weight: u16,
}

impl ResourceLimits {
    pub fn new(cpu_cores: f64, memory_mb: u64, io_weight: u16) -> Self {
        Self {
            cpu_cores,
            memory_bytes: memory_mb.saturating_mul(1024 * 1024),
            io_weight,
        }
    }

    /// Quota in microseconds per [`CPU_PERIOD_USEC`]
    pub fn cpu_quota(&self) -> u64 {
        (self.cpu_cores * CPU_PERIOD_USEC as f64).round() as u64
    }

    /// Contents for `cpu.max`
    pub fn cpu_max(&self) -> String {
        format!("{} {}", self.cpu_quota(), CPU_PERIOD_USEC)
    }

    /// Contents for `memory.max`
    pub fn memory_max(&self) -> String {
        self.memory_bytes.to_string()
    }

    /// Contents for `io.weight`
    pub fn io_weight_line(&self) -> String {
        format!("default {}", self.io_weight)
    }
}

impl From<&EnvironmentConfig> for ResourceLimits {
    fn from(config: &EnvironmentConfig) -> Self {
        Self::new(config.cpu_limit, config.memory_mb, config.io_weight)
    }
}

/// How hard to insist on controller availability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Enforcement {
    /// Missing controllers degrade that axis; creation proceeds
    #[default]
    BestEffort,
    /// Creation fails unless `cpu` and `memory` are usable in the group
    Strict,
}

/// Manages the execspace cgroup subtree
///
/// # Example
///
/// ```ignore
/// let cgroups = CgroupManager::new("/sys/fs/cgroup", "execspace");
/// cgroups.initialize();
///
/// let path = cgroups.create_group("env-1")?;
/// cgroups.apply_limits(&path, &ResourceLimits::new(0.5, 256, 500))?;
///
/// // ... the launcher joins the child to path/cgroup.procs ...
///
/// cgroups.remove_group("env-1")?;
/// ```
#[derive(Debug, Clone)]
pub struct CgroupManager {
    /// Mount point of the unified hierarchy (/sys/fs/cgroup)
    mount_root: PathBuf,
    /// Base path: /sys/fs/cgroup/execspace
    base_path: PathBuf,
    /// What a failed cpu.max / memory.max write means
    enforcement: Enforcement,
}

impl CgroupManager {
    /// Create a manager rooted at `mount_root/namespace`
    ///
    /// Does not touch the filesystem; call [`CgroupManager::initialize`].
    pub fn new(mount_root: impl Into<PathBuf>, namespace: &str) -> Self {
        let mount_root = mount_root.into();
        let base_path = mount_root.join(namespace);
        Self {
            mount_root,
            base_path,
            enforcement: Enforcement::BestEffort,
        }
    }

    pub fn with_enforcement(mut self, enforcement: Enforcement) -> Self {
        self.enforcement = enforcement;
        self
    }

    /// Path of the manager's root group
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Ensure the root group exists and controllers are delegated
    ///
    /// # cgroups v2 Controller Delegation
    ///
    /// Children can only use controllers that are enabled in their
    /// parent's `cgroup.subtree_control`. We enable cpu, memory and io at
    /// the mount root and at our namespace, one directive per write so a
    /// single unavailable controller does not reject the others.
    ///
    /// Nothing here is fatal. A controller that cannot be enabled only
    /// loses that axis of isolation.
    pub fn initialize(&self) {
        if let Err(e) = fs::create_dir_all(&self.base_path) {
            warn!(path = %self.base_path.display(), error = %e, "Failed to create cgroup root");
            return;
        }

        for level in [&self.mount_root, &self.base_path] {
            let subtree = level.join("cgroup.subtree_control");
            if !subtree.exists() {
                debug!(path = %subtree.display(), "No subtree_control, skipping");
                continue;
            }
            for controller in REQUIRED_CONTROLLERS {
                if let Err(e) = fs::write(&subtree, format!("+{}\n", controller)) {
                    warn!(
                        path = %subtree.display(),
                        controller,
                        error = %e,
                        "Failed to enable controller"
                    );
                }
            }
        }

        info!(path = %self.base_path.display(), "Cgroup hierarchy initialized");
    }

    /// Get the path to an environment's cgroup directory
    pub fn group_path(&self, env_id: &str) -> PathBuf {
        self.base_path.join(env_id)
    }

    /// Create the environment's cgroup (succeeds if it already exists)
    pub fn create_group(&self, env_id: &str) -> Result<PathBuf> {
        let path = self.group_path(env_id);

        // The kernel populates the control files on mkdir
        fs::create_dir_all(&path).map_err(|e| ExecSpaceError::cgroup(&path, e))?;
        debug!(env_id, path = %path.display(), "Cgroup created");

        Ok(path)
    }

    /// Write CPU, memory and I/O limits into a group
    ///
    /// Under [`Enforcement::Strict`] a failed CPU or memory write is
    /// returned. Under best effort it is logged and that axis stays
    /// unlimited. The I/O weight is written only when `io.weight` exists,
    /// and a failed write is always just logged.
    pub fn apply_limits(&self, path: &Path, limits: &ResourceLimits) -> Result<()> {
        self.write_limit(&path.join("cpu.max"), &limits.cpu_max())?;
        self.write_limit(&path.join("memory.max"), &limits.memory_max())?;

        let io_weight = path.join("io.weight");
        if io_weight.exists() {
            if let Err(e) = fs::write(&io_weight, limits.io_weight_line()) {
                warn!(path = %io_weight.display(), error = %e, "Failed to set io.weight");
            }
        } else {
            debug!(path = %path.display(), "io.weight not available, skipping");
        }

        info!(
            path = %path.display(),
            cpu_max = %limits.cpu_max(),
            memory_bytes = limits.memory_bytes,
            io_weight = limits.io_weight,
            "Limits applied"
        );
        Ok(())
    }

    fn write_limit(&self, file: &Path, value: &str) -> Result<()> {
        match fs::write(file, value) {
            Ok(()) => Ok(()),
            Err(e) if self.enforcement == Enforcement::BestEffort => {
                warn!(path = %file.display(), error = %e, "Failed to set limit, axis not enforced");
                Ok(())
            }
            Err(e) => Err(ExecSpaceError::cgroup(file, e)),
        }
    }

    /// Controllers available inside an environment's group
    pub fn controllers(&self, env_id: &str) -> io::Result<Vec<String>> {
        let content = fs::read_to_string(self.group_path(env_id).join("cgroup.controllers"))?;
        Ok(content.split_whitespace().map(str::to_string).collect())
    }

    /// Fail unless `cpu` and `memory` can be enforced in the group
    pub fn check_enforceable(&self, env_id: &str) -> Result<()> {
        let available = self
            .controllers(env_id)
            .map_err(|e| ExecSpaceError::ControllerUnavailable(format!("cgroup.controllers: {}", e)))?;

        for required in ["cpu", "memory"] {
            if !available.iter().any(|c| c == required) {
                return Err(ExecSpaceError::ControllerUnavailable(format!(
                    "{} controller not delegated to {}",
                    required,
                    self.group_path(env_id).display()
                )));
            }
        }
        Ok(())
    }

    /// PIDs currently in an environment's group
    pub fn procs(&self, env_id: &str) -> io::Result<Vec<i32>> {
        let content = fs::read_to_string(self.group_path(env_id).join("cgroup.procs"))?;
        Ok(parse_pids(&content))
    }

    /// Kill every member through `cgroup.kill` (kernel 5.14+)
    ///
    /// Returns false when the interface does not exist.
    pub fn kill_all(&self, env_id: &str) -> io::Result<bool> {
        let kill_file = self.group_path(env_id).join("cgroup.kill");
        if !kill_file.exists() {
            return Ok(false);
        }
        fs::write(kill_file, "1")?;
        Ok(true)
    }

    /// Remove an environment's cgroup
    ///
    /// rmdir, not rm -rf: the kernel refuses to remove a group that still
    /// has members, so the tracker must empty it first.
    pub fn remove_group(&self, env_id: &str) -> Result<()> {
        let path = self.group_path(env_id);

        if path.exists() {
            fs::remove_dir(&path).map_err(|e| ExecSpaceError::cgroup(&path, e))?;
            debug!(env_id, path = %path.display(), "Cgroup removed");
        }

        Ok(())
    }

    /// Check if an environment's cgroup exists
    pub fn exists(&self, env_id: &str) -> bool {
        self.group_path(env_id).exists()
    }

    /// Current memory usage in bytes (memory.current)
    pub fn memory_usage(&self, env_id: &str) -> io::Result<u64> {
        let content = fs::read_to_string(self.group_path(env_id).join("memory.current"))?;
        content
            .trim()
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Current CPU statistics (cpu.stat)
    pub fn cpu_stats(&self, env_id: &str) -> io::Result<CpuStats> {
        let content = fs::read_to_string(self.group_path(env_id).join("cpu.stat"))?;
        Ok(CpuStats::parse(&content))
    }

    /// List all environment groups under our namespace
    pub fn list_groups(&self) -> io::Result<Vec<String>> {
        let mut groups = Vec::new();

        if self.base_path.exists() {
            for entry in fs::read_dir(&self.base_path)? {
                let entry = entry?;
                if entry.file_type()?.is_dir() {
                    if let Some(name) = entry.file_name().to_str() {
                        groups.push(name.to_string());
                    }
                }
            }
        }

        groups.sort();
        Ok(groups)
    }
}

/// Parse a `cgroup.procs` listing, skipping blank or malformed lines
pub fn parse_pids(content: &str) -> Vec<i32> {
    content
        .lines()
        .filter_map(|line| line.trim().parse::<i32>().ok())
        .filter(|pid| *pid > 0)
        .collect()
}

/// CPU statistics from cpu.stat
#[derive(Debug, Default, Clone, PartialEq, serde::Serialize)]
pub struct CpuStats {
    /// Total CPU time consumed (microseconds)
    pub usage_usec: u64,
    /// User-mode CPU time (microseconds)
    pub user_usec: u64,
    /// Kernel-mode CPU time (microseconds)
    pub system_usec: u64,
    /// Number of periods the group was throttled
    pub nr_throttled: u64,
    /// Total time spent throttled (microseconds)
    pub throttled_usec: u64,
}

impl CpuStats {
    fn parse(content: &str) -> Self {
        let mut stats = CpuStats::default();

        for line in content.lines() {
            let mut parts = line.split_whitespace();
            let (Some(key), Some(value), None) = (parts.next(), parts.next(), parts.next()) else {
                continue;
            };
            let value: u64 = value.parse().unwrap_or(0);
            match key {
                "usage_usec" => stats.usage_usec = value,
                "user_usec" => stats.user_usec = value,
                "system_usec" => stats.system_usec = value,
                "nr_throttled" => stats.nr_throttled = value,
                "throttled_usec" => stats.throttled_usec = value,
                _ => {}
            }
        }

        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager(dir: &TempDir) -> CgroupManager {
        CgroupManager::new(dir.path(), CGROUP_NAMESPACE)
    }

    #[test]
    fn test_cpu_quota_half_core() {
        let limits = ResourceLimits::new(0.5, 256, 500);
        assert_eq!(limits.cpu_quota(), 50_000);
        assert_eq!(limits.cpu_max(), "50000 100000");
    }

    #[test]
    fn test_memory_bytes_from_mb() {
        let limits = ResourceLimits::new(1.0, 256, 500);
        assert_eq!(limits.memory_bytes, 268_435_456);
        assert_eq!(limits.memory_max(), "268435456");
        assert_eq!(limits.io_weight_line(), "default 500");
    }

    #[test]
    fn test_apply_limits_writes_files() {
        let dir = TempDir::new().unwrap();
        let cgroups = manager(&dir);
        let path = cgroups.create_group("env-a").unwrap();

        cgroups
            .apply_limits(&path, &ResourceLimits::new(0.5, 256, 500))
            .unwrap();

        assert_eq!(fs::read_to_string(path.join("cpu.max")).unwrap(), "50000 100000");
        assert_eq!(fs::read_to_string(path.join("memory.max")).unwrap(), "268435456");
        // No io.weight interface on this "host": skipped, not created
        assert!(!path.join("io.weight").exists());
    }

    #[test]
    fn test_apply_limits_writes_io_weight_when_present() {
        let dir = TempDir::new().unwrap();
        let cgroups = manager(&dir);
        let path = cgroups.create_group("env-io").unwrap();
        fs::write(path.join("io.weight"), "default 100").unwrap();

        cgroups
            .apply_limits(&path, &ResourceLimits::new(1.0, 512, 750))
            .unwrap();

        assert_eq!(fs::read_to_string(path.join("io.weight")).unwrap(), "default 750");
    }

    #[test]
    fn test_create_group_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let cgroups = manager(&dir);

        let first = cgroups.create_group("env-b").unwrap();
        let second = cgroups.create_group("env-b").unwrap();
        assert_eq!(first, second);
        assert!(cgroups.exists("env-b"));
    }

    #[test]
    fn test_apply_limits_best_effort_skips_broken_axis() {
        let dir = TempDir::new().unwrap();
        let cgroups = manager(&dir);
        let path = cgroups.create_group("env-be").unwrap();
        // Not writable as a file
        fs::create_dir(path.join("memory.max")).unwrap();

        cgroups
            .apply_limits(&path, &ResourceLimits::new(0.5, 256, 500))
            .unwrap();
        assert_eq!(fs::read_to_string(path.join("cpu.max")).unwrap(), "50000 100000");

        let strict = manager(&dir).with_enforcement(Enforcement::Strict);
        let err = strict
            .apply_limits(&path, &ResourceLimits::new(0.5, 256, 500))
            .unwrap_err();
        assert!(matches!(err, ExecSpaceError::Cgroup { .. }));
    }

    #[test]
    fn test_initialize_enables_controllers() {
        let dir = TempDir::new().unwrap();
        let cgroups = manager(&dir);
        fs::create_dir_all(cgroups.base_path()).unwrap();
        let root_control = dir.path().join("cgroup.subtree_control");
        let base_control = cgroups.base_path().join("cgroup.subtree_control");
        fs::write(&root_control, "").unwrap();
        fs::write(&base_control, "").unwrap();

        cgroups.initialize();

        assert!(cgroups.base_path().is_dir());
        // Plain files keep only the last write; the real kernel file accumulates
        for control in [&root_control, &base_control] {
            assert_eq!(fs::read_to_string(control).unwrap(), "+io\n", "{}", control.display());
        }
    }

    #[test]
    fn test_initialize_skips_levels_without_subtree_control() {
        let dir = TempDir::new().unwrap();
        let cgroups = manager(&dir);

        cgroups.initialize();

        assert!(cgroups.base_path().is_dir());
        assert!(!dir.path().join("cgroup.subtree_control").exists());
        assert!(!cgroups.base_path().join("cgroup.subtree_control").exists());
    }

    #[test]
    fn test_initialize_never_fails() {
        let cgroups = CgroupManager::new("/proc/definitely/not/writable", CGROUP_NAMESPACE);
        cgroups.initialize();
        assert!(!cgroups.base_path().exists());
    }

    #[test]
    fn test_remove_group() {
        let dir = TempDir::new().unwrap();
        let cgroups = manager(&dir);
        cgroups.create_group("env-c").unwrap();

        cgroups.remove_group("env-c").unwrap();
        assert!(!cgroups.exists("env-c"));
        // Already gone is fine
        cgroups.remove_group("env-c").unwrap();
    }

    #[test]
    fn test_remove_non_empty_group_fails() {
        let dir = TempDir::new().unwrap();
        let cgroups = manager(&dir);
        let path = cgroups.create_group("env-d").unwrap();
        fs::write(path.join("cgroup.procs"), "4242\n").unwrap();

        let err = cgroups.remove_group("env-d").unwrap_err();
        assert!(matches!(err, ExecSpaceError::Cgroup { .. }));
    }

    #[test]
    fn test_procs_and_list_groups() {
        let dir = TempDir::new().unwrap();
        let cgroups = manager(&dir);
        let path = cgroups.create_group("env-e").unwrap();
        cgroups.create_group("env-f").unwrap();
        fs::write(path.join("cgroup.procs"), "12\n\n13\nbogus\n").unwrap();

        assert_eq!(cgroups.procs("env-e").unwrap(), vec![12, 13]);
        assert_eq!(cgroups.list_groups().unwrap(), vec!["env-e", "env-f"]);
    }

    #[test]
    fn test_kill_all_without_interface() {
        let dir = TempDir::new().unwrap();
        let cgroups = manager(&dir);
        cgroups.create_group("env-g").unwrap();

        assert!(!cgroups.kill_all("env-g").unwrap());
    }

    #[test]
    fn test_check_enforceable() {
        let dir = TempDir::new().unwrap();
        let cgroups = manager(&dir);
        let path = cgroups.create_group("env-h").unwrap();

        fs::write(path.join("cgroup.controllers"), "cpu io\n").unwrap();
        assert!(matches!(
            cgroups.check_enforceable("env-h"),
            Err(ExecSpaceError::ControllerUnavailable(_))
        ));

        fs::write(path.join("cgroup.controllers"), "cpu io memory pids\n").unwrap();
        assert!(cgroups.check_enforceable("env-h").is_ok());
    }

    #[test]
    fn test_cpu_stats_parse() {
        let stats = CpuStats::parse(
            "usage_usec 1200\nuser_usec 800\nsystem_usec 400\nnr_periods 9\nnr_throttled 3\nthrottled_usec 150\n",
        );
        assert_eq!(stats.usage_usec, 1200);
        assert_eq!(stats.user_usec, 800);
        assert_eq!(stats.system_usec, 400);
        assert_eq!(stats.nr_throttled, 3);
        assert_eq!(stats.throttled_usec, 150);
    }
}
