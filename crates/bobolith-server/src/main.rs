//! Bobolith appliance server CLI.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use bobolith_protocol::DEFAULT_PROTOCOL_VERSION;
use bobolith_server::behavior::BehaviorRegistry;
use bobolith_server::config::ConfigError;
use bobolith_server::directory::{
    create_pool, run_migrations, ApplianceDirectory, MemoryDirectory, PgDirectory,
};
use bobolith_server::heartbeat::HeartbeatPolicy;
use bobolith_server::server::{self, ServerConfig};
use bobolith_telemetry::{log_startup, LogFormat, Telemetry, TelemetryConfig};

#[derive(Parser, Debug)]
#[command(
    name = "bobolith-server",
    about = "Bobolith appliance server",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the appliance server.
    Serve {
        /// Listen address.
        #[arg(long, env = "BOBOLITH_LISTEN", default_value = "127.0.0.1:8000")]
        listen: SocketAddr,

        /// PostgreSQL database URL. Without one, appliances are kept in memory.
        #[arg(long, env = "DATABASE_URL")]
        database_url: Option<String>,

        /// TOML file of appliances for the in-memory directory.
        #[arg(long, env = "BOBOLITH_APPLIANCES")]
        appliances: Option<PathBuf>,

        /// Run database migrations on startup.
        #[arg(long, default_value_t = true)]
        migrate: bool,

        /// Heartbeat timeout in seconds.
        #[arg(long, env = "BOBOLITH_HEARTBEAT_TIMEOUT_SECS", default_value_t = 10)]
        heartbeat_timeout_secs: u64,

        /// Protocol version expected in every frame.
        #[arg(long, env = "BOBOLITH_PROTOCOL_VERSION", default_value_t = DEFAULT_PROTOCOL_VERSION)]
        protocol_version: u32,

        /// Log level (trace, debug, info, warn, error).
        #[arg(long, default_value = "info")]
        log_level: String,

        /// Log format (json or pretty).
        #[arg(long, default_value = "json")]
        log_format: String,
    },
}

/// Startup settings that need no I/O to validate.
struct Settings {
    policy: HeartbeatPolicy,
    telemetry: TelemetryConfig,
}

fn validate(
    heartbeat_timeout_secs: u64,
    log_level: String,
    log_format: &str,
) -> Result<Settings, ConfigError> {
    let format = LogFormat::parse(log_format)
        .ok_or_else(|| ConfigError::InvalidLogFormat(log_format.to_string()))?;
    let policy = HeartbeatPolicy::new(Duration::from_secs(heartbeat_timeout_secs))?;

    Ok(Settings {
        policy,
        telemetry: TelemetryConfig::new()
            .with_service_name(env!("CARGO_PKG_NAME"))
            .with_log_level(log_level)
            .with_log_format(format),
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            listen,
            database_url,
            appliances,
            migrate,
            heartbeat_timeout_secs,
            protocol_version,
            log_level,
            log_format,
        } => {
            // Exit codes:
            // 1 = configuration error
            // 2 = runtime error
            let settings = match validate(heartbeat_timeout_secs, log_level, &log_format) {
                Ok(s) => s,
                Err(e) => {
                    eprintln!("error: {}", e);
                    return ExitCode::from(1);
                }
            };

            let telemetry = match Telemetry::init(settings.telemetry) {
                Ok(t) => t,
                Err(e) => {
                    eprintln!("error: {}", e);
                    return ExitCode::from(1);
                }
            };

            log_startup!(
                service = %telemetry.config().service_name,
                version = env!("CARGO_PKG_VERSION"),
                protocol_version,
                heartbeat_timeout_secs,
                "Starting appliance server"
            );

            let directory = match open_directory(database_url, appliances, migrate).await {
                Ok(d) => d,
                Err(DirectoryError::Config(e)) => {
                    eprintln!("error: {}", e);
                    return ExitCode::from(1);
                }
                Err(DirectoryError::Runtime(e)) => {
                    tracing::error!(error = %e, "Failed to open appliance directory");
                    return ExitCode::from(2);
                }
            };

            let config = ServerConfig {
                listen_addr: listen,
                directory,
                behaviors: BehaviorRegistry::builtin(),
                policy: settings.policy,
                protocol_version,
            };

            match server::run(config).await {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    tracing::error!(error = %e, "Server failed");
                    ExitCode::from(2)
                }
            }
        }
    }
}

enum DirectoryError {
    Config(ConfigError),
    Runtime(anyhow::Error),
}

async fn open_directory(
    database_url: Option<String>,
    appliances: Option<PathBuf>,
    migrate: bool,
) -> Result<Arc<dyn ApplianceDirectory>, DirectoryError> {
    let Some(database_url) = database_url else {
        let directory = match appliances {
            Some(path) => MemoryDirectory::from_seed_file(&path).map_err(DirectoryError::Config)?,
            None => MemoryDirectory::new(),
        };
        tracing::info!(count = directory.len(), "Using in-memory appliance directory");
        return Ok(Arc::new(directory));
    };

    if appliances.is_some() {
        tracing::warn!("Ignoring appliance file: a database is configured");
    }

    let pool = create_pool(&database_url)
        .await
        .map_err(|e| DirectoryError::Runtime(e.into()))?;

    if migrate {
        run_migrations(&pool)
            .await
            .map_err(|e| DirectoryError::Runtime(e.into()))?;
    }

    Ok(Arc::new(PgDirectory::new(pool)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults() {
        let cli = Cli::try_parse_from(["bobolith-server", "serve"]).unwrap();
        let Command::Serve {
            listen,
            heartbeat_timeout_secs,
            protocol_version,
            migrate,
            log_format,
            ..
        } = cli.command;
        assert_eq!(listen, "127.0.0.1:8000".parse::<SocketAddr>().unwrap());
        assert_eq!(heartbeat_timeout_secs, 10);
        assert_eq!(protocol_version, 0);
        assert!(migrate);
        assert_eq!(log_format, "json");
    }

    #[test]
    fn zero_timeout_is_a_config_error() {
        let err = validate(0, "info".into(), "json").err().unwrap();
        assert!(matches!(err, ConfigError::InvalidHeartbeatTimeout(_)));
    }

    #[test]
    fn unknown_log_format_is_a_config_error() {
        let err = validate(10, "info".into(), "xml").err().unwrap();
        assert!(matches!(err, ConfigError::InvalidLogFormat(f) if f == "xml"));
    }
}
