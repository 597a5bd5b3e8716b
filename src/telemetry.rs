//! Structured logging setup
//!
//! Console output goes to stderr so JSON results on stdout stay clean.
//! Level filtering follows `RUST_LOG`, defaulting to
//! `info,execspace=debug`.

use std::str::FromStr;
use std::sync::Once;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter when RUST_LOG is unset
const DEFAULT_FILTER: &str = "info,execspace=debug";

static INIT: Once = Once::new();

/// Console log format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format: {}", other)),
        }
    }
}

/// Install the global subscriber
///
/// Only the first call installs anything; later calls are no-ops.
///
/// # Example
/// ```ignore
/// execspace::telemetry::init_tracing(LogFormat::Json)?;
/// ```
pub fn init_tracing(format: LogFormat) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut result: Result<(), Box<dyn std::error::Error + Send + Sync>> = Ok(());

    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

        let registry = tracing_subscriber::registry().with(filter);
        let installed = match format {
            LogFormat::Pretty => registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(true),
                )
                .try_init(),
            LogFormat::Json => registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr)
                        .with_current_span(false),
                )
                .try_init(),
        };

        result = installed.map_err(|e| e.into());
    });

    if result.is_ok() {
        tracing::debug!(?format, "Tracing initialized");
    }
    result
}
