//! Environment lifecycle: liveness, logs, stop and teardown
//!
//! - `process` - signal/wait wrappers (liveness probe, reaping)
//! - `tracker` - status, logs, stop, remove and list from on-disk artifacts

pub mod process;
pub mod tracker;

pub use process::{Delivery, Liveness};
pub use tracker::{Tracker, DEFAULT_SETTLE_INTERVAL, DEFAULT_STOP_GRACE, NO_LOGS};
