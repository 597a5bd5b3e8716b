//! Full environment lifecycle through the manager facade
//!
//! create → status → logs → stop → remove, with a second manager
//! instance answering for the first one's environment.
//!
//! Run with: sudo cargo run --example lifecycle_demo

use std::thread;
use std::time::Duration;

use execspace::telemetry::{init_tracing, LogFormat};
use execspace::{EnvironmentConfig, EnvironmentManager, ManagerConfig};

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_tracing(LogFormat::Pretty)?;

    let manager = EnvironmentManager::new(ManagerConfig::from_env())?;

    println!("1. Creating a short-lived environment ...");
    let short = EnvironmentConfig::new("short", "echo hi; hostname", 0.5, 128, 500);
    let created = manager.create(&short)?;
    println!("   {}", serde_json::to_string(&created)?);

    thread::sleep(Duration::from_millis(500));
    println!("   status after 500ms: {}", manager.status(&created.env_id));
    println!("   logs:\n{}", manager.logs(&created.env_id));

    println!("\n2. Creating a long-running environment ...");
    let long = EnvironmentConfig::new("long", "while true; do sleep 1; done", 0.25, 64, 100);
    let running = manager.create(&long)?;

    // Nothing is cached: a fresh manager sees the same environment
    let observer = EnvironmentManager::new(ManagerConfig::from_env())?;
    println!("   observer sees: {}", observer.status(&running.env_id));
    println!("   {}", serde_json::to_string_pretty(&observer.inspect(&running.env_id)?)?);

    println!("\n3. Listing ...");
    for summary in manager.list() {
        println!("   {} {}", summary.id, summary.status);
    }

    println!("\n4. Stopping and removing ...");
    println!("   stop:   {}", observer.stop(&running.env_id));
    println!("   status: {}", observer.status(&running.env_id));
    println!("   remove: {}", manager.remove(&running.env_id));
    println!("   remove: {}", manager.remove(&created.env_id));
    println!("   remove again: {}", manager.remove(&created.env_id));

    println!("\n{}", execspace::metrics::encode_text());
    Ok(())
}
