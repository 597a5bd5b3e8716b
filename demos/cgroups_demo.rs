//! Walk through the cgroup v2 side of an environment
//!
//! Run with: sudo cargo run --example cgroups_demo
//! (Requires root and a cgroup v2 mount at /sys/fs/cgroup)

use std::process::Command;
use std::thread;
use std::time::Duration;

use execspace::cgroups::{CgroupManager, ResourceLimits, CGROUP_NAMESPACE, CGROUP_ROOT};
use execspace::privileges::PrivilegeReport;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("┌─────────────────────────────────────────┐");
    println!("│  cgroups v2 Resource Isolation          │");
    println!("└─────────────────────────────────────────┘\n");

    let privileges = PrivilegeReport::probe();
    if !privileges.is_privileged() {
        eprintln!("Warning: not running as root (euid={}). cgroup writes may fail.", privileges.euid);
        eprintln!("   Run with: sudo cargo run --example cgroups_demo\n");
    }

    println!("1. Initializing {}/{} ...", CGROUP_ROOT, CGROUP_NAMESPACE);
    let cgroups = CgroupManager::new(CGROUP_ROOT, CGROUP_NAMESPACE);
    cgroups.initialize();
    match std::fs::read_to_string(cgroups.base_path().join("cgroup.controllers")) {
        Ok(list) => println!("   controllers delegated to us: {}", list.trim()),
        Err(e) => println!("   cannot read cgroup.controllers: {}", e),
    }

    let env_id = "cgroups-demo";
    let limits = ResourceLimits::new(0.5, 256, 500);

    println!("\n2. Creating group '{}' ...", env_id);
    let path = cgroups.create_group(env_id)?;
    cgroups.apply_limits(&path, &limits)?;

    println!("\n3. Limit files:");
    for file in ["cpu.max", "memory.max", "io.weight"] {
        match std::fs::read_to_string(path.join(file)) {
            Ok(content) => println!("   ✅ {} = {}", file, content.trim()),
            Err(_) => println!("   ⚠️  {} not available", file),
        }
    }

    println!("\n4. Moving a 'sleep 5' into the group ...");
    let mut child = Command::new("sleep").arg("5").spawn()?;
    std::fs::write(path.join("cgroup.procs"), child.id().to_string())?;
    println!("   members: {:?}", cgroups.procs(env_id)?);

    thread::sleep(Duration::from_millis(200));

    println!("\n5. Usage:");
    match cgroups.memory_usage(env_id) {
        Ok(bytes) => println!("   memory: {} bytes ({:.2} MB)", bytes, bytes as f64 / (1024.0 * 1024.0)),
        Err(e) => eprintln!("   ❌ memory.current: {}", e),
    }
    match cgroups.cpu_stats(env_id) {
        Ok(stats) => println!(
            "   cpu: {} usec ({} user / {} system), throttled {} times",
            stats.usage_usec, stats.user_usec, stats.system_usec, stats.nr_throttled
        ),
        Err(e) => eprintln!("   ❌ cpu.stat: {}", e),
    }

    println!("\n6. Groups under {}:", cgroups.base_path().display());
    for group in cgroups.list_groups()? {
        println!("   - {}", group);
    }

    println!("\n7. Cleaning up ...");
    if !cgroups.kill_all(env_id)? {
        child.kill()?;
    }
    child.wait()?;
    cgroups.remove_group(env_id)?;
    println!("   ✅ group removed");

    Ok(())
}
