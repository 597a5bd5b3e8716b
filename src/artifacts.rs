//! On-disk artifacts for each environment
//!
//! ```text
//! <env_dir>/<id>.sh     executable script body (0755)
//! <env_dir>/<id>.pid    decimal PID of the isolation launcher
//! <log_dir>/<id>.log    merged stdout/stderr
//! ```
//!
//! These files are the only state the manager keeps. A fresh manager
//! process rebuilds everything it needs from them.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Path layout for scripts, PID files and logs
#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    env_dir: PathBuf,
    log_dir: PathBuf,
}

impl ArtifactLayout {
    pub fn new(env_dir: impl Into<PathBuf>, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            env_dir: env_dir.into(),
            log_dir: log_dir.into(),
        }
    }

    pub fn env_dir(&self) -> &Path {
        &self.env_dir
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Create both directories if missing
    pub fn ensure_dirs(&self) -> io::Result<()> {
        fs::create_dir_all(&self.env_dir)?;
        fs::create_dir_all(&self.log_dir)
    }

    pub fn script_path(&self, env_id: &str) -> PathBuf {
        self.env_dir.join(format!("{}.sh", env_id))
    }

    pub fn pid_path(&self, env_id: &str) -> PathBuf {
        self.env_dir.join(format!("{}.pid", env_id))
    }

    pub fn log_path(&self, env_id: &str) -> PathBuf {
        self.log_dir.join(format!("{}.log", env_id))
    }

    /// Write the PID file through a temp file + rename
    ///
    /// Readers see either no PID file or a complete one.
    pub fn write_pid(&self, env_id: &str, pid: i32) -> io::Result<()> {
        let target = self.pid_path(env_id);
        let tmp = self.env_dir.join(format!(".{}.pid.tmp", env_id));

        let mut file = fs::File::create(&tmp)?;
        file.write_all(pid.to_string().as_bytes())?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp, &target)
    }

    /// Identifiers that have a PID file, sorted
    pub fn pid_ids(&self) -> io::Result<Vec<String>> {
        let mut ids = Vec::new();

        let entries = match fs::read_dir(&self.env_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(e),
        };

        for entry in entries {
            let path = entry?.path();
            if path.extension().map(|e| e == "pid").unwrap_or(false) {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    if !stem.starts_with('.') {
                        ids.push(stem.to_string());
                    }
                }
            }
        }

        ids.sort();
        Ok(ids)
    }
}
