//! Privilege probing
//!
//! Creating namespaces and writing cgroup files normally needs root (or
//! CAP_SYS_ADMIN plus a delegated subtree). The manager still starts
//! without them; this module only reports what is missing so the
//! operator sees it up front instead of at the first failed `create`.

use caps::{CapSet, Capability};
use serde::Serialize;

/// What the current process is allowed to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PrivilegeReport {
    /// Effective user ID
    pub euid: u32,
    /// CAP_SYS_ADMIN in the effective set (namespaces, mounts)
    pub sys_admin: bool,
}

impl PrivilegeReport {
    /// Read the euid and effective capabilities of this process
    pub fn probe() -> Self {
        // Using libc directly since nix's geteuid requires the "user" feature
        let euid = unsafe { libc::geteuid() };
        let sys_admin = caps::has_cap(None, CapSet::Effective, Capability::CAP_SYS_ADMIN).unwrap_or(false);
        Self { euid, sys_admin }
    }

    pub fn is_root(&self) -> bool {
        self.euid == 0
    }

    /// Root or CAP_SYS_ADMIN: enough for unshare and cgroup writes
    pub fn is_privileged(&self) -> bool {
        self.is_root() || self.sys_admin
    }

    /// Log a warning when running unprivileged
    pub fn warn_if_unprivileged(&self) {
        if !self.is_privileged() {
            tracing::warn!(
                euid = self.euid,
                "Running without root or CAP_SYS_ADMIN; namespace and cgroup operations may fail"
            );
        }
    }
}
