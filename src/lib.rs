//! ExecSpace - resource-isolated execution environments on Linux
//!
//! Runs user-supplied shell scripts inside fresh PID, mount, UTS and IPC
//! namespaces, each confined to its own cgroup v2 group with CPU, memory
//! and I/O limits. All lifecycle state lives on disk, so any manager
//! process can answer status, logs, stop and remove for environments
//! another process created.
//!
//! # Modules
//!
//! - `environment` - configuration types and the `EnvironmentManager` facade
//! - `cgroups` - cgroup v2 hierarchy and limit files
//! - `isolation` - `unshare` launcher with a pre-exec cgroup join
//! - `lifecycle` - liveness probing, stop and teardown
//! - `artifacts` - script, PID and log file layout
//! - `metrics` - Prometheus counters and histograms
//! - `telemetry` - tracing subscriber setup
//! - `privileges` - euid / capability probe
//!
//! # Quick Start
//!
//! ```ignore
//! use execspace::{EnvironmentConfig, EnvironmentManager, ManagerConfig};
//!
//! let manager = EnvironmentManager::new(ManagerConfig::from_env())?;
//!
//! let config = EnvironmentConfig::new("demo", "echo hi", 0.5, 256, 500);
//! let created = manager.create(&config)?;
//!
//! println!("{}", manager.status(&created.env_id));
//! println!("{}", manager.logs(&created.env_id));
//! manager.remove(&created.env_id);
//! ```

pub mod artifacts;
pub mod cgroups;
pub mod environment;
pub mod error;
pub mod isolation;
pub mod lifecycle;
pub mod metrics;
pub mod privileges;
pub mod telemetry;

// Re-export commonly used types at crate root for convenience
pub use cgroups::{Enforcement, ResourceLimits};
pub use environment::{
    CreatedEnvironment, EnvironmentConfig, EnvironmentInfo, EnvironmentManager,
    EnvironmentStatus, EnvironmentSummary, ManagerConfig,
};
pub use error::{ExecSpaceError, Result};
