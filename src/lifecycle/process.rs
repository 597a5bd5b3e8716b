//! Signal-level process helpers
//!
//! Thin wrappers over `kill(2)` and `waitpid(2)` that turn "no such
//! process" into a value instead of an error.

use std::fs;

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use tracing::debug;

/// Outcome of a liveness probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    Gone,
}

/// Outcome of sending a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    AlreadyGone,
}

/// Collect the exit status if `pid` is our own exited child
///
/// Never blocks. Returns true when a zombie was reaped; pids that are
/// not our children (ECHILD) are left alone.
pub fn reap_if_child(pid: i32) -> bool {
    match waitpid(Pid::from_raw(pid), Some(WaitPidFlag::WNOHANG)) {
        Ok(WaitStatus::Exited(..)) | Ok(WaitStatus::Signaled(..)) => {
            debug!(pid, "Reaped exited child");
            true
        }
        Ok(_) | Err(_) => false,
    }
}

/// Is `pid` a zombie (exited, waiting for its parent to reap it)?
pub fn is_zombie(pid: i32) -> bool {
    match fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Ok(stat) => zombie_state(&stat),
        Err(_) => false,
    }
}

/// The state field follows the parenthesised comm, which may itself
/// contain spaces and parentheses
fn zombie_state(stat: &str) -> bool {
    stat.rfind(')')
        .and_then(|end| stat[end + 1..].split_whitespace().next())
        .map(|state| state == "Z" || state == "X")
        .unwrap_or(false)
}

/// Zero-effect liveness probe (signal 0)
///
/// "No such process" means gone. Any other failure (e.g. EPERM) is
/// also reported as gone. A zombie counts as gone.
pub fn probe(pid: i32) -> Liveness {
    reap_if_child(pid);

    match kill(Pid::from_raw(pid), None) {
        Ok(()) if is_zombie(pid) => Liveness::Gone,
        Ok(()) => Liveness::Alive,
        Err(Errno::ESRCH) => Liveness::Gone,
        Err(e) => {
            debug!(pid, error = %e, "Liveness probe failed, treating as exited");
            Liveness::Gone
        }
    }
}

/// Send `signal`, treating an already-exited process as success
pub fn send_signal(pid: i32, signal: Signal) -> nix::Result<Delivery> {
    match kill(Pid::from_raw(pid), signal) {
        Ok(()) => Ok(Delivery::Delivered),
        Err(Errno::ESRCH) => Ok(Delivery::AlreadyGone),
        Err(e) => Err(e),
    }
}
