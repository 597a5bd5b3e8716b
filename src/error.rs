//! Error types for the environment manager
//!
//! Only failures the caller has to act on become errors. Lookup misses
//! (no PID file, garbage in it) and termination races (process already
//! gone) are folded into status values instead.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the environment manager
#[derive(Error, Debug)]
pub enum ExecSpaceError {
    /// Rejected before any OS resource was touched
    #[error("Invalid environment config: {0}")]
    InvalidConfig(String),

    /// Identifier cannot be used as a file/cgroup name
    #[error("Invalid environment id: {0:?}")]
    InvalidId(String),

    /// A cgroup file or directory could not be created or written
    #[error("Cgroup error at {}: {source}", path.display())]
    Cgroup {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Strict enforcement only: a required controller is not delegated
    #[error("Controller unavailable: {0}")]
    ControllerUnavailable(String),

    /// Spawning the isolated process failed
    #[error("Launch failed: {0}")]
    Launch(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl ExecSpaceError {
    pub(crate) fn cgroup(path: impl Into<PathBuf>, source: io::Error) -> Self {
        ExecSpaceError::Cgroup {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, ExecSpaceError>;
