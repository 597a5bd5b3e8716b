//! Namespace isolation invocation
//!
//! The isolated program is started through `unshare(1)`:
//!
//! ```text
//! unshare --pid --mount --uts --ipc --fork --mount-proc bash <script>
//!    │       │      │      │     │      │        │
//!    │       │      │      │     │      │        └─ fresh /proc for the new PID ns
//!    │       │      │      │     │      └─ fork so the script becomes PID 1 of the ns
//!    │       │      │      │     └─ private SysV IPC / POSIX queues
//!    │       │      │      └─ private hostname
//!    │       │      └─ private mount table
//!    │       └─ private PID numbering
//!    └─ stays the recorded PID; it waits for the script and exits with it
//! ```

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Builds the `unshare` command line for a saved script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsolationCommand {
    /// Path or name of the unshare binary
    pub program: PathBuf,
    /// Shell interpreter that runs the script
    pub shell: PathBuf,
    /// Add `--user --map-root-user` so the namespaces can be created
    /// without CAP_SYS_ADMIN
    pub user_namespace: bool,
}

impl Default for IsolationCommand {
    fn default() -> Self {
        Self {
            program: PathBuf::from("unshare"),
            shell: PathBuf::from("bash"),
            user_namespace: false,
        }
    }
}

impl IsolationCommand {
    /// Arguments passed to unshare (program not included)
    pub fn args(&self, script: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::with_capacity(10);

        if self.user_namespace {
            args.push("--user".into());
            args.push("--map-root-user".into());
        }

        for flag in ["--pid", "--mount", "--uts", "--ipc", "--fork", "--mount-proc"] {
            args.push(flag.into());
        }

        args.push(self.shell.clone().into_os_string());
        args.push(script.as_os_str().to_os_string());
        args
    }

    /// Full argv, program first
    pub fn argv(&self, script: &Path) -> Vec<OsString> {
        let mut argv = vec![self.program.clone().into_os_string()];
        argv.extend(self.args(script));
        argv
    }

    /// A `Command` ready for stdio and pre-exec setup
    pub fn command(&self, script: &Path) -> Command {
        let mut command = Command::new(&self.program);
        command.args(self.args(script));
        command
    }
}
