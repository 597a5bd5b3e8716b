//! Prometheus metrics for environment lifecycle operations
//!
//! Registered in the default registry; the embedding API layer exposes
//! them with [`encode_text`].

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, Encoder, Histogram,
    IntCounter, IntCounterVec, TextEncoder,
};

lazy_static! {
    // ─────────────────────────────────────────────────────────────────────────────
    // Creation
    // ─────────────────────────────────────────────────────────────────────────────

    /// Environments whose isolated process was launched.
    pub static ref ENVIRONMENTS_CREATED: IntCounter = register_int_counter!(
        "execspace_environments_created_total",
        "Environments launched successfully"
    ).expect("failed to register ENVIRONMENTS_CREATED metric");

    /// Failed `create` calls, by stage.
    ///
    /// Labels:
    /// - stage: "validate", "cgroup", "limits", "launch"
    pub static ref CREATE_FAILURES: IntCounterVec = register_int_counter_vec!(
        "execspace_environment_create_failures_total",
        "Environment creations that failed, by stage",
        &["stage"]
    ).expect("failed to register CREATE_FAILURES metric");

    /// Time from validation to persisted PID.
    pub static ref CREATE_DURATION: Histogram = register_histogram!(
        "execspace_environment_create_duration_seconds",
        "Time to create and launch an environment",
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    ).expect("failed to register CREATE_DURATION metric");

    // ─────────────────────────────────────────────────────────────────────────────
    // Teardown
    // ─────────────────────────────────────────────────────────────────────────────

    /// Successful `stop` calls.
    pub static ref ENVIRONMENTS_STOPPED: IntCounter = register_int_counter!(
        "execspace_environments_stopped_total",
        "Environments stopped"
    ).expect("failed to register ENVIRONMENTS_STOPPED metric");

    /// `remove` calls that found something to remove.
    pub static ref ENVIRONMENTS_REMOVED: IntCounter = register_int_counter!(
        "execspace_environments_removed_total",
        "Environments removed"
    ).expect("failed to register ENVIRONMENTS_REMOVED metric");
}

/// Render the default registry in the Prometheus text format
pub fn encode_text() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_contains_registered_metrics() {
        ENVIRONMENTS_CREATED.inc();
        CREATE_FAILURES.with_label_values(&["launch"]).inc();

        let text = encode_text();
        assert!(text.contains("execspace_environments_created_total"));
        assert!(text.contains("execspace_environment_create_failures_total{stage=\"launch\"}"));
    }
}
