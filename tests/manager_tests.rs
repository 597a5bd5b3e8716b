//! Integration tests for the environment manager
//!
//! A temp directory stands in for the cgroup v2 mount, and a small shell
//! script stands in for `unshare` (it drops the namespace flags and execs
//! the rest), so the full create → status → logs → stop → remove flow
//! runs without root. Tests against the real hierarchy are marked
//! #[ignore].

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use execspace::lifecycle::NO_LOGS;
use execspace::{
    Enforcement, EnvironmentConfig, EnvironmentManager, EnvironmentStatus, ExecSpaceError,
    ManagerConfig,
};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tempfile::TempDir;

const FAKE_UNSHARE: &str = r#"#!/bin/sh
while [ $# -gt 0 ]; do
  case "$1" in
    --*) shift ;;
    *) break ;;
  esac
done
exec "$@"
"#;

fn config_in(dir: &TempDir) -> ManagerConfig {
    let fake = dir.path().join("fake-unshare");
    fs::write(&fake, FAKE_UNSHARE).unwrap();
    fs::set_permissions(&fake, fs::Permissions::from_mode(0o755)).unwrap();

    let mut config = ManagerConfig {
        cgroup_root: dir.path().join("cgroup"),
        env_dir: dir.path().join("envs"),
        log_dir: dir.path().join("logs"),
        stop_grace: Duration::from_millis(100),
        settle_interval: Duration::from_millis(10),
        ..ManagerConfig::default()
    };
    config.isolation.program = fake;
    config.isolation.shell = PathBuf::from("sh");
    config
}

fn manager_in(dir: &TempDir) -> EnvironmentManager {
    EnvironmentManager::new(config_in(dir)).unwrap()
}

/// The kernel creates cgroup.procs on mkdir; a plain directory needs help
fn prepare_group(manager: &EnvironmentManager, env_id: &str) -> PathBuf {
    let path = manager.cgroups().create_group(env_id).unwrap();
    fs::write(path.join("cgroup.procs"), "").unwrap();
    path
}

fn wait_for(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !check() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(50));
    }
}

fn artifact_paths(dir: &TempDir, env_id: &str) -> [PathBuf; 3] {
    [
        dir.path().join("envs").join(format!("{}.sh", env_id)),
        dir.path().join("envs").join(format!("{}.pid", env_id)),
        dir.path().join("logs").join(format!("{}.log", env_id)),
    ]
}

/// Test the short-lived script scenario end to end
#[test]
fn test_echo_environment_lifecycle() {
    let dir = TempDir::new().unwrap();
    let manager = manager_in(&dir);
    let group = prepare_group(&manager, "echo-env");

    let config = EnvironmentConfig::with_id("echo-env", "echo", "echo hi\n", 0.5, 256, 500);
    let created = manager.create(&config).unwrap();

    assert_eq!(created.env_id, "echo-env");
    assert_eq!(created.status, EnvironmentStatus::Running);
    assert!(created.pid > 1);
    assert_eq!(PathBuf::from(&created.cgroup), group);

    assert_eq!(fs::read_to_string(group.join("cpu.max")).unwrap(), "50000 100000");
    assert_eq!(fs::read_to_string(group.join("memory.max")).unwrap(), "268435456");
    // The child joined its group before exec
    assert_eq!(
        fs::read_to_string(group.join("cgroup.procs")).unwrap().trim(),
        created.pid.to_string()
    );

    wait_for("EXITED", || manager.status("echo-env") == EnvironmentStatus::Exited);
    assert!(manager.logs("echo-env").contains("hi"));

    let listed = manager.list();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, "echo-env");
    assert_eq!(listed[0].status, EnvironmentStatus::Exited);

    assert!(manager.remove("echo-env"));
    for path in artifact_paths(&dir, "echo-env") {
        assert!(!path.exists(), "{} survived remove", path.display());
    }
    assert_eq!(manager.status("echo-env"), EnvironmentStatus::Error);
    assert_eq!(manager.logs("echo-env"), NO_LOGS);
}

/// Test that status is derived from disk, not from the creating instance
#[test]
fn test_second_manager_sees_and_stops_environment() {
    let dir = TempDir::new().unwrap();
    let creator = manager_in(&dir);
    prepare_group(&creator, "long-env");

    let config = EnvironmentConfig::with_id("long-env", "long", "exec sleep 30\n", 0.25, 64, 100);
    let created = creator.create(&config).unwrap();

    let observer = manager_in(&dir);
    assert_eq!(observer.status("long-env"), EnvironmentStatus::Running);

    let info = observer.inspect("long-env").unwrap();
    assert_eq!(info.pid, Some(created.pid));
    assert_eq!(info.status, EnvironmentStatus::Running);
    assert!(info.script_file.is_some());
    assert!(info.cgroup.is_some());
    // No memory.current in a plain directory
    assert!(info.usage.is_none());

    assert!(observer.stop("long-env"));
    wait_for("EXITED", || creator.status("long-env") == EnvironmentStatus::Exited);

    // Stopping an exited environment is still a success
    assert!(observer.stop("long-env"));

    assert!(creator.remove("long-env"));
    // The kernel lets rmdir drop a group's control files; a plain directory doesn't
    let group = creator.cgroups().group_path("long-env");
    if group.exists() {
        fs::remove_dir_all(&group).unwrap();
    }
    assert!(!creator.remove("long-env"));
}

/// Test that removing an environment never touches its siblings
#[test]
fn test_remove_leaves_other_environments() {
    let dir = TempDir::new().unwrap();
    let manager = manager_in(&dir);

    for id in ["keep-a", "drop-b"] {
        prepare_group(&manager, id);
        let config = EnvironmentConfig::with_id(id, id, "exec sleep 30\n", 0.1, 32, 500);
        manager.create(&config).unwrap();
    }

    assert!(manager.remove("drop-b"));

    let listed = manager.list();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, "keep-a");
    assert_eq!(listed[0].status, EnvironmentStatus::Running);

    assert!(manager.remove("keep-a"));
    assert!(manager.list().is_empty());
}

/// Test that list reports each environment's own state
#[test]
fn test_list_mixes_running_and_killed() {
    let dir = TempDir::new().unwrap();
    let manager = manager_in(&dir);

    let mut pids = Vec::new();
    for id in ["alive", "killed"] {
        prepare_group(&manager, id);
        let config = EnvironmentConfig::with_id(id, id, "exec sleep 30\n", 0.1, 32, 500);
        pids.push(manager.create(&config).unwrap().pid);
    }

    // Killed behind the manager's back
    kill(Pid::from_raw(pids[1]), Signal::SIGKILL).unwrap();
    wait_for("EXITED", || manager.status("killed") == EnvironmentStatus::Exited);

    let listed = manager.list();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].id, "alive");
    assert_eq!(listed[0].status, EnvironmentStatus::Running);
    assert_eq!(listed[1].id, "killed");
    assert_eq!(listed[1].status, EnvironmentStatus::Exited);

    assert!(manager.remove("alive"));
    assert!(manager.remove("killed"));
}

/// Test that an unwritable limit file degrades that axis instead of failing create
#[test]
fn test_best_effort_create_survives_broken_memory_limit() {
    let dir = TempDir::new().unwrap();
    let manager = manager_in(&dir);
    let group = prepare_group(&manager, "no-memory");
    fs::create_dir(group.join("memory.max")).unwrap();

    let config = EnvironmentConfig::with_id("no-memory", "nm", "echo hi\n", 1.0, 64, 500);
    let created = manager.create(&config).unwrap();

    assert_eq!(created.status, EnvironmentStatus::Running);
    assert_eq!(fs::read_to_string(group.join("cpu.max")).unwrap(), "100000 100000");

    wait_for("EXITED", || manager.status("no-memory") == EnvironmentStatus::Exited);
    assert!(manager.logs("no-memory").contains("hi"));
    assert!(manager.remove("no-memory"));
}

/// Test that strict enforcement still fails on an unwritable limit file
#[test]
fn test_strict_create_fails_on_broken_memory_limit() {
    let dir = TempDir::new().unwrap();
    let mut config = config_in(&dir);
    config.enforcement = Enforcement::Strict;
    let manager = EnvironmentManager::new(config).unwrap();
    let group = prepare_group(&manager, "strict-memory");
    fs::write(group.join("cgroup.controllers"), "cpu memory\n").unwrap();
    fs::create_dir(group.join("memory.max")).unwrap();

    let env = EnvironmentConfig::with_id("strict-memory", "sm", "echo hi\n", 1.0, 64, 500);
    let err = manager.create(&env).unwrap_err();

    assert!(matches!(err, ExecSpaceError::Cgroup { .. }));
    assert!(!dir.path().join("envs").join("strict-memory.pid").exists());
}

/// Test lookups on identifiers that were never created or are malformed
#[test]
fn test_unknown_and_malformed_ids() {
    let dir = TempDir::new().unwrap();
    let manager = manager_in(&dir);

    for id in ["never-created", "../etc", "", "a/b"] {
        assert_eq!(manager.status(id), EnvironmentStatus::Error, "{:?}", id);
        assert_eq!(manager.logs(id), NO_LOGS);
        assert!(!manager.stop(id));
        assert!(!manager.remove(id));
    }

    assert!(matches!(
        manager.inspect("../etc"),
        Err(ExecSpaceError::InvalidId(_))
    ));
}

/// Test that a garbage PID file lists as ERROR instead of failing the listing
#[test]
fn test_list_reports_unusable_pid_file() {
    let dir = TempDir::new().unwrap();
    let manager = manager_in(&dir);
    fs::write(dir.path().join("envs").join("broken.pid"), "not-a-pid").unwrap();

    let listed = manager.list();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, "broken");
    assert_eq!(listed[0].status, EnvironmentStatus::Error);
}

/// Test that invalid limits are rejected before anything is created
#[test]
fn test_invalid_config_touches_nothing() {
    let dir = TempDir::new().unwrap();
    let manager = manager_in(&dir);

    let config = EnvironmentConfig::with_id("bad-cpu", "bad", "echo hi", 0.0, 64, 500);
    let err = manager.create(&config).unwrap_err();

    assert!(matches!(err, ExecSpaceError::InvalidConfig(_)));
    assert!(!manager.cgroups().exists("bad-cpu"));
    for path in artifact_paths(&dir, "bad-cpu") {
        assert!(!path.exists());
    }
}

/// Test that a failed spawn leaves no PID file behind
#[test]
fn test_launch_failure_is_reported() {
    let dir = TempDir::new().unwrap();
    let mut config = config_in(&dir);
    config.isolation.program = PathBuf::from("/nonexistent/unshare");
    let manager = EnvironmentManager::new(config).unwrap();
    prepare_group(&manager, "no-launcher");

    let env = EnvironmentConfig::with_id("no-launcher", "x", "echo hi", 1.0, 64, 500);
    let err = manager.create(&env).unwrap_err();

    assert!(matches!(err, ExecSpaceError::Launch(_)));
    assert!(!dir.path().join("envs").join("no-launcher.pid").exists());
    assert_eq!(manager.status("no-launcher"), EnvironmentStatus::Error);
}

/// Test strict enforcement against the group's controller list
#[test]
fn test_strict_enforcement_requires_cpu_and_memory() {
    let dir = TempDir::new().unwrap();
    let mut config = config_in(&dir);
    config.enforcement = Enforcement::Strict;
    let manager = EnvironmentManager::new(config).unwrap();

    let group = prepare_group(&manager, "strict-env");
    fs::write(group.join("cgroup.controllers"), "io pids\n").unwrap();

    let env = EnvironmentConfig::with_id("strict-env", "strict", "echo hi", 1.0, 64, 500);
    let err = manager.create(&env).unwrap_err();
    assert!(matches!(err, ExecSpaceError::ControllerUnavailable(_)));
    assert!(!group.join("cpu.max").exists());

    fs::write(group.join("cgroup.controllers"), "cpu io memory pids\n").unwrap();
    let created = manager.create(&env).unwrap();
    assert_eq!(created.status, EnvironmentStatus::Running);

    wait_for("EXITED", || manager.status("strict-env") == EnvironmentStatus::Exited);
    assert!(manager.remove("strict-env"));
}

/// Test that re-creating an identifier overwrites the script and truncates the log
#[test]
fn test_recreate_overwrites_script_and_log() {
    let dir = TempDir::new().unwrap();
    let manager = manager_in(&dir);
    prepare_group(&manager, "again");

    let first = EnvironmentConfig::with_id("again", "a", "echo first\n", 1.0, 64, 500);
    manager.create(&first).unwrap();
    wait_for("first run", || manager.status("again") == EnvironmentStatus::Exited);

    // A plain file keeps the old digits; the kernel's cgroup.procs would not
    fs::write(manager.cgroups().group_path("again").join("cgroup.procs"), "").unwrap();
    let second = EnvironmentConfig::with_id("again", "a", "echo second\n", 1.0, 64, 500);
    manager.create(&second).unwrap();
    wait_for("second run", || manager.status("again") == EnvironmentStatus::Exited);

    let logs = manager.logs("again");
    assert!(logs.contains("second"));
    assert!(!logs.contains("first"));
    assert_eq!(
        fs::read_to_string(dir.path().join("envs").join("again.sh")).unwrap(),
        "echo second\n"
    );

    manager.remove("again");
}

fn real_manager(dir: &Path) -> EnvironmentManager {
    let config = ManagerConfig {
        env_dir: dir.join("envs"),
        log_dir: dir.join("logs"),
        ..ManagerConfig::default()
    };
    EnvironmentManager::new(config).unwrap()
}

/// Test the real hierarchy and namespaces
#[test]
#[ignore = "Requires root and a cgroup v2 mount at /sys/fs/cgroup"]
fn test_real_echo_environment() {
    let dir = TempDir::new().unwrap();
    let manager = real_manager(dir.path());

    let config = EnvironmentConfig::new("real-echo", "echo hi; echo $$", 0.5, 128, 500);
    let created = manager.create(&config).unwrap();
    let id = created.env_id.clone();

    wait_for("EXITED", || manager.status(&id) == EnvironmentStatus::Exited);
    let logs = manager.logs(&id);
    assert!(logs.contains("hi"));
    // First process of a new PID namespace
    assert!(logs.lines().any(|line| line.trim() == "1"));

    assert!(manager.remove(&id));
    assert!(!manager.cgroups().exists(&id));
}

/// Test that remove kills descendants and deletes the group
#[test]
#[ignore = "Requires root and a cgroup v2 mount at /sys/fs/cgroup"]
fn test_real_remove_kills_descendants() {
    let dir = TempDir::new().unwrap();
    let manager = real_manager(dir.path());

    let script = "sleep 300 &\nsleep 300 &\nwait\n";
    let config = EnvironmentConfig::new("real-tree", script, 0.5, 128, 500);
    let created = manager.create(&config).unwrap();
    let id = created.env_id.clone();

    wait_for("descendants", || {
        manager.cgroups().procs(&id).map(|p| p.len() >= 3).unwrap_or(false)
    });
    let memory = manager.cgroups().group_path(&id).join("memory.max");
    assert_eq!(fs::read_to_string(memory).unwrap().trim(), "134217728");

    assert!(manager.remove(&id));
    assert!(!manager.cgroups().exists(&id));
    assert_eq!(manager.status(&id), EnvironmentStatus::Error);
}
