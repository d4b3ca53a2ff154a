//! LogLens Telemetry
//!
//! Structured logging setup and the in-process metric primitives the
//! services report through their stats endpoints.

mod config;
mod metrics;
mod tracing_setup;

pub use config::TelemetryConfig;
pub use metrics::{Counter, Gauge, Histogram, HistogramSummary};
pub use tracing_setup::init_tracing;

/// Initialize logging for a service, reading the rest of the settings from the environment
pub fn init(service_name: &str) -> Result<(), TelemetryError> {
    let config = TelemetryConfig {
        service_name: service_name.to_string(),
        ..TelemetryConfig::from_env()
    };
    init_tracing(&config)
}

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("Tracing initialization failed: {0}")]
    TracingInit(String),

    #[error("Invalid log filter: {0}")]
    Filter(String),
}
