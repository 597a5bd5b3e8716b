//! Namespace isolation launcher
//!
//! This module starts a saved script as the sole program of a fresh set
//! of namespaces (PID, mount, UTS, IPC):
//! - `command` - the `unshare` invocation
//! - `preexec` - async-signal-safe cgroup join run between fork and exec
//! - `launcher` - script persistence, log redirection, spawn, PID file

pub mod command;
pub mod launcher;
pub mod preexec;

pub use command::IsolationCommand;
pub use launcher::{LaunchedProcess, Launcher};
pub use preexec::CgroupJoin;
