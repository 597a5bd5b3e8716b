//! Environment configuration, status and records
//!
//! `EnvironmentConfig` is the validated request handed to the manager.
//! `EnvironmentRecord` is the shape the persistence layer stores.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cgroups::CPU_PERIOD_USEC;
use crate::error::{ExecSpaceError, Result};

/// Default I/O weight when the caller does not pick one
pub const DEFAULT_IO_WEIGHT: u16 = 500;

/// Longest identifier accepted (fits the persistence layer's key column)
pub const MAX_ID_LEN: usize = 64;

/// Smallest quota the kernel accepts in cpu.max (1ms)
const MIN_CPU_QUOTA_USEC: f64 = 1000.0;

/// Largest memory limit whose byte count fits in u64
const MAX_MEMORY_MB: u64 = u64::MAX / (1024 * 1024);

/// Configuration of one execution environment
///
/// Immutable once built; the manager never changes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    /// Unique identifier, also used as file and cgroup name
    pub env_id: String,
    /// Human-readable name
    pub name: String,
    /// Script body, run through the configured shell
    pub script_content: String,
    /// CPU limit in cores (0.5 = half of one core)
    pub cpu_limit: f64,
    /// Memory ceiling in megabytes
    pub memory_mb: u64,
    /// Proportional I/O weight (1..=10000)
    pub io_weight: u16,
}

impl EnvironmentConfig {
    /// Build a config with a freshly allocated UUIDv7 identifier
    pub fn new(
        name: impl Into<String>,
        script_content: impl Into<String>,
        cpu_limit: f64,
        memory_mb: u64,
        io_weight: u16,
    ) -> Self {
        Self::with_id(
            Uuid::now_v7().to_string(),
            name,
            script_content,
            cpu_limit,
            memory_mb,
            io_weight,
        )
    }

    /// Build a config with a caller-provided identifier
    pub fn with_id(
        env_id: impl Into<String>,
        name: impl Into<String>,
        script_content: impl Into<String>,
        cpu_limit: f64,
        memory_mb: u64,
        io_weight: u16,
    ) -> Self {
        Self {
            env_id: env_id.into(),
            name: name.into(),
            script_content: script_content.into(),
            cpu_limit,
            memory_mb,
            io_weight,
        }
    }

    /// Check the limits and identifier before anything touches the OS
    pub fn validate(&self) -> Result<()> {
        validate_id(&self.env_id)?;

        if self.name.trim().is_empty() {
            return Err(ExecSpaceError::InvalidConfig("name must not be empty".into()));
        }
        if self.script_content.trim().is_empty() {
            return Err(ExecSpaceError::InvalidConfig("script must not be empty".into()));
        }
        if !self.cpu_limit.is_finite() || self.cpu_limit <= 0.0 {
            return Err(ExecSpaceError::InvalidConfig(format!(
                "cpu_limit must be a positive number of cores, got {}",
                self.cpu_limit
            )));
        }
        if self.cpu_limit * (CPU_PERIOD_USEC as f64) < MIN_CPU_QUOTA_USEC {
            return Err(ExecSpaceError::InvalidConfig(format!(
                "cpu_limit {} is below the 1ms-per-period minimum",
                self.cpu_limit
            )));
        }
        if self.memory_mb == 0 || self.memory_mb > MAX_MEMORY_MB {
            return Err(ExecSpaceError::InvalidConfig(format!(
                "memory_mb out of range: {}",
                self.memory_mb
            )));
        }
        if !(1..=10_000).contains(&self.io_weight) {
            return Err(ExecSpaceError::InvalidConfig(format!(
                "io_weight must be within 1..=10000, got {}",
                self.io_weight
            )));
        }

        Ok(())
    }
}

/// Check that an identifier is a single, harmless path component
pub fn validate_id(env_id: &str) -> Result<()> {
    let well_formed = !env_id.is_empty()
        && env_id.len() <= MAX_ID_LEN
        && env_id != "."
        && env_id != ".."
        && env_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'));

    if well_formed {
        Ok(())
    } else {
        Err(ExecSpaceError::InvalidId(env_id.to_string()))
    }
}

/// Derived status of an environment, recomputed on every query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EnvironmentStatus {
    /// Recorded process exists and answers the liveness probe
    Running,
    /// Recorded process no longer exists
    Exited,
    /// No usable process identifier was found
    Error,
}

impl EnvironmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvironmentStatus::Running => "RUNNING",
            EnvironmentStatus::Exited => "EXITED",
            EnvironmentStatus::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for EnvironmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a successful `create`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedEnvironment {
    pub env_id: String,
    pub pid: i32,
    pub status: EnvironmentStatus,
    pub cgroup: String,
    pub log_file: String,
}

/// One row of `list`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentSummary {
    pub id: String,
    pub status: EnvironmentStatus,
}

/// Environment metadata as the persistence layer keeps it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentRecord {
    pub id: String,
    pub name: String,
    pub status: EnvironmentStatus,
    pub cpu_limit: f64,
    pub memory_mb: u64,
    pub io_weight: u16,
    pub script_content: String,
    pub process_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EnvironmentRecord {
    /// Record for a freshly created environment
    pub fn new(config: &EnvironmentConfig, created: &CreatedEnvironment) -> Self {
        let now = Utc::now();
        Self {
            id: config.env_id.clone(),
            name: config.name.clone(),
            status: created.status,
            cpu_limit: config.cpu_limit,
            memory_mb: config.memory_mb,
            io_weight: config.io_weight,
            script_content: config.script_content.clone(),
            process_id: Some(created.pid.to_string()),
            created_at: now,
            updated_at: now,
        }
    }

    /// Store a freshly derived status; returns true if it changed
    pub fn refresh(&mut self, status: EnvironmentStatus) -> bool {
        if self.status == status {
            return false;
        }
        self.status = status;
        self.updated_at = Utc::now();
        true
    }
}
