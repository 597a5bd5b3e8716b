//! `execspace` - command-line front end for the environment manager
//!
//! Every subcommand prints a JSON document on stdout. Logs go to stderr.
//!
//! ```text
//! sudo execspace create --name demo --cpu 0.5 --memory-mb 256 --inline 'echo hi'
//! sudo execspace status <id>
//! sudo execspace logs <id>
//! sudo execspace remove <id>
//! ```

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::json;

use execspace::environment::DEFAULT_IO_WEIGHT;
use execspace::telemetry::{self, LogFormat};
use execspace::{EnvironmentConfig, EnvironmentManager, ManagerConfig};

#[derive(Parser, Debug)]
#[command(name = "execspace", version, about = "Resource-isolated execution environments")]
struct Cli {
    /// Log output format on stderr (pretty or json)
    #[arg(long, global = true, default_value = "pretty", env = "EXECSPACE_LOG_FORMAT")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Launch a script in a new isolated environment
    Create(CreateArgs),
    /// Print the derived status of an environment
    Status { id: String },
    /// Print the captured output of an environment
    Logs { id: String },
    /// Terminate an environment's process
    Stop { id: String },
    /// Stop an environment and delete all of its artifacts
    Remove { id: String },
    /// List every environment with a PID file
    List,
    /// Show status, PID, paths and live resource usage
    Inspect { id: String },
}

#[derive(Args, Debug)]
struct CreateArgs {
    /// Human-readable name
    #[arg(long)]
    name: String,

    /// CPU limit in cores (0.5 = half a core)
    #[arg(long)]
    cpu: f64,

    /// Memory limit in megabytes
    #[arg(long)]
    memory_mb: u64,

    /// Proportional I/O weight (1-10000)
    #[arg(long, default_value_t = DEFAULT_IO_WEIGHT)]
    io_weight: u16,

    /// Read the script from a file
    #[arg(long, conflicts_with = "inline", required_unless_present = "inline")]
    script: Option<PathBuf>,

    /// Script body given on the command line
    #[arg(long)]
    inline: Option<String>,

    /// Use this identifier instead of a fresh UUIDv7
    #[arg(long)]
    id: Option<String>,
}

impl CreateArgs {
    fn into_config(self) -> Result<EnvironmentConfig> {
        let script = match (self.script, self.inline) {
            (Some(path), _) => fs::read_to_string(&path)
                .with_context(|| format!("reading script {}", path.display()))?,
            (None, Some(body)) => body,
            (None, None) => anyhow::bail!("one of --script or --inline is required"),
        };

        Ok(match self.id {
            Some(id) => {
                EnvironmentConfig::with_id(id, self.name, script, self.cpu, self.memory_mb, self.io_weight)
            }
            None => EnvironmentConfig::new(self.name, script, self.cpu, self.memory_mb, self.io_weight),
        })
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    telemetry::init_tracing(cli.log_format)
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {}", e))?;

    let manager = EnvironmentManager::new(ManagerConfig::from_env())
        .context("failed to initialize environment manager")?;

    match cli.command {
        Command::Create(args) => {
            let config = args.into_config()?;
            let created = manager
                .create(&config)
                .with_context(|| format!("failed to create environment {}", config.env_id))?;
            print_json(&created)
        }
        Command::Status { id } => {
            let status = manager.status(&id);
            print_json(&json!({ "id": id, "status": status }))
        }
        Command::Logs { id } => {
            let logs = manager.logs(&id);
            print_json(&json!({ "id": id, "logs": logs }))
        }
        Command::Stop { id } => {
            let stopped = manager.stop(&id);
            print_json(&json!({ "id": id, "stopped": stopped }))
        }
        Command::Remove { id } => {
            let removed = manager.remove(&id);
            print_json(&json!({ "id": id, "removed": removed }))
        }
        Command::List => print_json(&manager.list()),
        Command::Inspect { id } => {
            let info = manager.inspect(&id)?;
            print_json(&info)
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
