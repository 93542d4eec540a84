//! Structured logging with JSON output.
//!
//! Implements 12-factor app logging: structured JSON to stdout.

use crate::{LogFormat, TelemetryConfig, TelemetryError};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Initialize the logging subsystem.
///
/// Sets up tracing-subscriber with either JSON or pretty format,
/// respecting the configured log level. `RUST_LOG` takes precedence.
pub fn init_logging(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let filter = build_filter(&config.log_level)?;

    match config.log_format {
        LogFormat::Json => init_json_logging(filter),
        LogFormat::Pretty => init_pretty_logging(filter),
    }
}

fn build_filter(log_level: &str) -> Result<EnvFilter, TelemetryError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(log_level)
            .map_err(|e| TelemetryError::InvalidFilter(format!("{}: {}", log_level, e))),
    }
}

/// Initialize JSON logging for production.
fn init_json_logging(filter: EnvFilter) -> Result<(), TelemetryError> {
    let json_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_current_span(true)
        .with_span_list(false)
        .with_file(false)
        .with_line_number(false)
        .flatten_event(true)
        .with_filter(filter);

    tracing_subscriber::registry()
        .with(json_layer)
        .try_init()
        .map_err(|e: tracing_subscriber::util::TryInitError| {
            TelemetryError::LoggingInit(e.to_string())
        })
}

/// Initialize pretty logging for development.
fn init_pretty_logging(filter: EnvFilter) -> Result<(), TelemetryError> {
    let pretty_layer = fmt::layer()
        .pretty()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_filter(filter);

    tracing_subscriber::registry()
        .with(pretty_layer)
        .try_init()
        .map_err(|e: tracing_subscriber::util::TryInitError| {
            TelemetryError::LoggingInit(e.to_string())
        })
}

/// Standard log event names.
pub mod events {
    /// Server is starting up.
    pub const STARTUP: &str = "startup";

    /// Server is shutting down.
    pub const SHUTDOWN: &str = "shutdown";

    /// Server is listening on a port.
    pub const LISTENING: &str = "listening";

    /// An appliance session started.
    pub const APPLIANCE_CONNECTED: &str = "appliance_connected";

    /// An appliance session ended.
    pub const APPLIANCE_DISCONNECTED: &str = "appliance_disconnected";

    /// An appliance changed liveness status.
    pub const STATUS_CHANGED: &str = "status_changed";

    /// An inbound frame could not be decoded and was dropped.
    pub const FRAME_REJECTED: &str = "frame_rejected";

    /// No heartbeat arrived within the timeout.
    pub const HEARTBEAT_TIMEOUT: &str = "heartbeat_timeout";

    /// A connection attempt was refused before a session existed.
    pub const CONNECTION_REFUSED: &str = "connection_refused";
}

/// Helper macros for structured logging with standard fields.
///
/// These wrap the tracing macros to ensure consistent field naming.
#[macro_export]
macro_rules! log_startup {
    ($($field:tt)*) => {
        tracing::info!(
            event = $crate::logging::events::STARTUP,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_shutdown {
    ($($field:tt)*) => {
        tracing::info!(
            event = $crate::logging::events::SHUTDOWN,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_listening {
    ($($field:tt)*) => {
        tracing::info!(
            event = $crate::logging::events::LISTENING,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_appliance_connected {
    ($($field:tt)*) => {
        tracing::info!(
            event = $crate::logging::events::APPLIANCE_CONNECTED,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_appliance_disconnected {
    ($($field:tt)*) => {
        tracing::info!(
            event = $crate::logging::events::APPLIANCE_DISCONNECTED,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_status_changed {
    ($($field:tt)*) => {
        tracing::info!(
            event = $crate::logging::events::STATUS_CHANGED,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_frame_rejected {
    ($($field:tt)*) => {
        tracing::warn!(
            event = $crate::logging::events::FRAME_REJECTED,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_heartbeat_timeout {
    ($($field:tt)*) => {
        tracing::warn!(
            event = $crate::logging::events::HEARTBEAT_TIMEOUT,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_connection_refused {
    ($($field:tt)*) => {
        tracing::warn!(
            event = $crate::logging::events::CONNECTION_REFUSED,
            $($field)*
        )
    };
}
