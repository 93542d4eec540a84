//! Read-only appliance status endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use super::router::AppState;
use crate::directory::Appliance;
use crate::error::ProblemDetails;

/// An appliance record plus whether a session is live for it.
#[derive(Debug, Serialize)]
pub struct ApplianceView {
    #[serde(flatten)]
    pub appliance: Appliance,
    pub connected: bool,
}

impl ApplianceView {
    fn new(state: &AppState, appliance: Appliance) -> Self {
        let connected = state.sessions.is_connected(appliance.id);
        Self {
            appliance,
            connected,
        }
    }
}

/// GET /appliances - List appliances.
pub async fn list_appliances(
    State(state): State<AppState>,
) -> Result<Json<Vec<ApplianceView>>, ProblemDetails> {
    let appliances = state.context.directory.list().await?;

    Ok(Json(
        appliances
            .into_iter()
            .map(|appliance| ApplianceView::new(&state, appliance))
            .collect(),
    ))
}

/// GET /appliances/{id} - Get one appliance.
pub async fn get_appliance(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApplianceView>, ProblemDetails> {
    let appliance = state
        .context
        .directory
        .get(id)
        .await?
        .ok_or_else(|| ProblemDetails::not_found(format!("Appliance {} not found", id)))?;

    Ok(Json(ApplianceView::new(&state, appliance)))
}

/// DELETE /appliances/{id}/session - Close the appliance's live session.
pub async fn disconnect_appliance(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ProblemDetails> {
    if !state.sessions.evict(id) {
        return Err(ProblemDetails::not_found(format!(
            "Appliance {} has no live session",
            id
        )));
    }

    Ok(StatusCode::NO_CONTENT)
}
