//! cgroups v2 resource isolation module
//!
//! This module provides resource limits (CPU, memory, I/O) for execution
//! environments using Linux cgroups v2.
//!
//! # Why cgroups?
//!
//! Without cgroups, a runaway script could consume all host CPU/memory,
//! starving other environments. cgroups provide kernel-enforced limits
//! that the script cannot escape, and a membership list that survives
//! the manager process.
//!
//! # Example Usage
//!
//! ```ignore
//! use execspace::cgroups::{CgroupManager, ResourceLimits};
//!
//! // Manager for /sys/fs/cgroup/execspace/
//! let cgroups = CgroupManager::new("/sys/fs/cgroup", "execspace");
//! cgroups.initialize();
//!
//! // Half a core, 256MB, default I/O weight
//! let path = cgroups.create_group("env-1")?;
//! cgroups.apply_limits(&path, &ResourceLimits::new(0.5, 256, 500))?;
//!
//! // Monitor resource usage
//! let memory = cgroups.memory_usage("env-1")?;
//! let cpu = cgroups.cpu_stats("env-1")?;
//!
//! // Clean up once the group is empty
//! cgroups.remove_group("env-1")?;
//! ```

pub mod manager;

pub use manager::{
    CgroupManager, CpuStats, Enforcement, ResourceLimits, CGROUP_NAMESPACE, CGROUP_ROOT,
    CPU_PERIOD_USEC,
};
