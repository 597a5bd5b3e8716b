//! Join-before-exec: move the forked child into its cgroup
//!
//! # Ordering
//!
//! ```text
//! parent                         child (after fork)
//! ──────                         ──────────────────
//! CgroupJoin::new()  (alloc)
//! spawn() ─── fork ───────────►  join_self()   write getpid() → cgroup.procs
//!                                execve(unshare ...)
//!                                  └─ script's first instruction already
//!                                     runs under cpu.max / memory.max
//! ```
//!
//! Everything that allocates happens in the parent. Between fork and exec
//! only async-signal-safe calls are allowed, so `join_self` sticks to
//! `getpid`, `open`, `write` and `close` with a stack buffer.

use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

/// Long enough for any pid_t in decimal
const PID_BUF_LEN: usize = 16;

/// Prepared handle to a cgroup's `cgroup.procs`
#[derive(Debug, Clone)]
pub struct CgroupJoin {
    procs_path: CString,
}

impl CgroupJoin {
    /// Prepare a join into the group at `group_path`
    pub fn new(group_path: &Path) -> io::Result<Self> {
        let procs: PathBuf = group_path.join("cgroup.procs");
        let procs_path = CString::new(procs.as_os_str().as_bytes())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        Ok(Self { procs_path })
    }

    /// Write the calling process's PID into `cgroup.procs`
    ///
    /// Async-signal-safe; meant to run inside `Command::pre_exec`.
    pub fn join_self(&self) -> io::Result<()> {
        let pid = unsafe { libc::getpid() };
        let mut buf = [0u8; PID_BUF_LEN];
        let digits = format_pid(pid, &mut buf);

        let fd = unsafe { libc::open(self.procs_path.as_ptr(), libc::O_WRONLY | libc::O_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }

        let written = unsafe { libc::write(fd, digits.as_ptr() as *const libc::c_void, digits.len()) };
        let result = if written < 0 {
            Err(io::Error::last_os_error())
        } else if written as usize != digits.len() {
            Err(io::Error::from_raw_os_error(libc::EIO))
        } else {
            Ok(())
        };

        unsafe { libc::close(fd) };
        result
    }
}

/// Format a positive PID into `buf` without allocating
fn format_pid(pid: libc::pid_t, buf: &mut [u8; PID_BUF_LEN]) -> &[u8] {
    let mut value = pid.unsigned_abs();
    let mut start = PID_BUF_LEN;

    loop {
        start -= 1;
        buf[start] = b'0' + (value % 10) as u8;
        value /= 10;
        if value == 0 {
            break;
        }
    }

    &buf[start..]
}
