//! Logging infrastructure for the Bobolith appliance server.
//!
//! This crate provides:
//! - Structured JSON (or pretty) logging through `tracing-subscriber`
//! - Standard event names and `log_*!` macros for appliance lifecycle events
//!
//! # Usage
//!
//! ```ignore
//! use bobolith_telemetry::{LogFormat, Telemetry, TelemetryConfig};
//!
//! let config = TelemetryConfig::new()
//!     .with_log_level("debug")
//!     .with_log_format(LogFormat::Pretty);
//!
//! let telemetry = Telemetry::init(config)?;
//! ```

pub mod config;
pub mod logging;

pub use config::{LogFormat, TelemetryConfig};
pub use logging::events;

use thiserror::Error;

/// Telemetry errors.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Failed to initialize logging.
    #[error("failed to initialize logging: {0}")]
    LoggingInit(String),

    /// The configured level is not a valid filter directive.
    #[error("invalid log filter: {0}")]
    InvalidFilter(String),
}

/// Main telemetry handle.
pub struct Telemetry {
    config: TelemetryConfig,
}

impl Telemetry {
    /// Initialize telemetry with the given configuration.
    pub fn init(config: TelemetryConfig) -> Result<Self, TelemetryError> {
        logging::init_logging(&config)?;
        Ok(Self { config })
    }

    /// Get the telemetry configuration.
    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }
}
