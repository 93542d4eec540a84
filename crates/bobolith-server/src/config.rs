//! Startup configuration errors.
//!
//! Everything here is detected before the listener is bound; none of these
//! conditions can arise while sessions are running.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    /// Heartbeat timeout is zero or too large to represent.
    #[error("invalid heartbeat timeout: {0}")]
    InvalidHeartbeatTimeout(String),

    /// Unknown `--log-format` value.
    #[error("invalid log format '{0}' (expected 'json' or 'pretty')")]
    InvalidLogFormat(String),

    /// Appliance seed file could not be read.
    #[error("failed to read appliance file {path}: {source}")]
    SeedFileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Appliance seed file has invalid contents.
    #[error("invalid appliance file: {0}")]
    InvalidSeedFile(String),

    /// Two behaviors registered under one name.
    #[error("behavior '{0}' is registered more than once")]
    DuplicateBehavior(String),
}
