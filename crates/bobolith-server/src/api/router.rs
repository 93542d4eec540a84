//! Axum router configuration.

use std::sync::Arc;

use axum::{
    routing::{delete, get},
    Router,
};
use tokio::sync::watch;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::{appliances, health, ws};
use crate::routing::ApplianceRouter;
use crate::session::{SessionContext, SessionRegistry};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Resolves appliance ids before a socket is upgraded.
    pub router: ApplianceRouter,
    /// One live session per appliance.
    pub sessions: Arc<SessionRegistry>,
    /// Collaborators handed to every session.
    pub context: SessionContext,
    /// Flips to `true` when the server is shutting down.
    pub shutdown: watch::Receiver<bool>,
}

/// Create the router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/health", get(health::health_check))
        // Appliances
        .route("/appliances", get(appliances::list_appliances))
        .route("/appliances/{id}", get(appliances::get_appliance))
        .route(
            "/appliances/{id}/session",
            delete(appliances::disconnect_appliance),
        )
        // WebSocket for appliance connections
        .route("/ws/{appliance_id}", get(ws::ws_handler))
        .route("/ws/{appliance_id}/", get(ws::ws_handler))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
