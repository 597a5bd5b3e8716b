//! Execution environments
//!
//! - `config` - request, status and record types
//! - `manager` - the create/status/logs/stop/remove/list facade

pub mod config;
pub mod manager;

pub use config::{
    validate_id, CreatedEnvironment, EnvironmentConfig, EnvironmentRecord, EnvironmentStatus,
    EnvironmentSummary, DEFAULT_IO_WEIGHT, MAX_ID_LEN,
};
pub use manager::{
    EnvironmentInfo, EnvironmentManager, ManagerConfig, ResourceUsage, DEFAULT_ENV_DIR,
    DEFAULT_LOG_DIR,
};
