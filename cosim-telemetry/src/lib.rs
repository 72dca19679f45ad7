//! # Co-simulation Telemetry
//!
//! Crate for logging setup and per-link metrics.

pub mod logging;
pub mod metrics;

pub use logging::LinkLogger;
pub use metrics::{LinkMetrics, MetricsRecorder};
