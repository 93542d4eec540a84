//! Appliance server: HTTP listener plus session lifecycle.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bobolith_protocol::MessageCodec;
use bobolith_telemetry::{log_listening, log_shutdown};
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::api::{create_router, AppState};
use crate::behavior::BehaviorRegistry;
use crate::directory::ApplianceDirectory;
use crate::heartbeat::{HeartbeatPolicy, SystemClock};
use crate::routing::ApplianceRouter;
use crate::session::{SessionContext, SessionRegistry};

/// How long live sessions get to write their final status on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Server configuration, validated before the server starts.
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub directory: Arc<dyn ApplianceDirectory>,
    pub behaviors: BehaviorRegistry,
    pub policy: HeartbeatPolicy,
    pub protocol_version: u32,
}

/// Run the server until Ctrl-C.
pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
    // No connection exists yet, so any status other than DOWN is left over
    // from a previous run.
    let marked = config.directory.mark_all_down().await?;
    if marked > 0 {
        tracing::info!(count = marked, "Marked stale appliances as down on startup");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sessions = Arc::new(SessionRegistry::new());

    let state = AppState {
        router: ApplianceRouter::new(Arc::clone(&config.directory), Arc::new(config.behaviors)),
        sessions: Arc::clone(&sessions),
        context: SessionContext {
            directory: config.directory,
            codec: MessageCodec::new(config.protocol_version),
            policy: config.policy,
            clock: Arc::new(SystemClock),
        },
        shutdown: shutdown_rx,
    };

    let app = create_router(state);

    let listener = TcpListener::bind(config.listen_addr).await?;
    log_listening!(addr = %config.listen_addr, "Appliance server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            wait_for_signal().await;
            let _ = shutdown_tx.send(true);
        })
        .await?;

    // Upgraded sockets outlive the HTTP server; let them write DOWN.
    if tokio::time::timeout(SHUTDOWN_GRACE, sessions.drain())
        .await
        .is_err()
    {
        tracing::warn!("Sessions still running after shutdown grace period");
    }

    log_shutdown!("Appliance server stopped");
    Ok(())
}

async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
