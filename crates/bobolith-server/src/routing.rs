//! Resolves incoming connection requests to session configurations.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use uuid::Uuid;

use crate::behavior::{ApplianceBehavior, BehaviorRegistry};
use crate::directory::{ApplianceDirectory, PersistenceError};
use crate::heartbeat::StatusRecord;

/// What the transport layer knows about a connection before it is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionRequest {
    pub appliance_id: Uuid,
}

impl ConnectionRequest {
    pub fn new(appliance_id: Uuid) -> Self {
        Self { appliance_id }
    }
}

/// Everything needed to start a session for one appliance.
#[derive(Clone)]
pub struct SessionConfig {
    pub appliance_id: Uuid,
    pub name: String,
    pub behavior_name: String,
    pub behavior: Arc<dyn ApplianceBehavior>,
    /// Status as stored when the connection was resolved.
    pub initial: StatusRecord,
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("appliance_id", &self.appliance_id)
            .field("name", &self.name)
            .field("behavior_name", &self.behavior_name)
            .field("initial", &self.initial)
            .finish_non_exhaustive()
    }
}

/// Reasons a connection is refused before any session exists.
#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("appliance {0} not found")]
    ApplianceNotFound(Uuid),

    #[error("appliance {appliance_id} uses unknown behavior '{behavior}'")]
    UnknownHandler { appliance_id: Uuid, behavior: String },

    #[error("failed to resolve appliance: {0}")]
    Persistence(#[from] PersistenceError),
}

/// Maps appliance identifiers to session configurations.
#[derive(Clone)]
pub struct ApplianceRouter {
    directory: Arc<dyn ApplianceDirectory>,
    behaviors: Arc<BehaviorRegistry>,
}

impl ApplianceRouter {
    pub fn new(directory: Arc<dyn ApplianceDirectory>, behaviors: Arc<BehaviorRegistry>) -> Self {
        Self {
            directory,
            behaviors,
        }
    }

    /// Resolve a connection request. Never writes to the directory.
    pub async fn resolve(&self, request: ConnectionRequest) -> Result<SessionConfig, RoutingError> {
        let appliance = self
            .directory
            .get(request.appliance_id)
            .await?
            .ok_or(RoutingError::ApplianceNotFound(request.appliance_id))?;

        let behavior =
            self.behaviors
                .lookup(&appliance.behavior)
                .ok_or_else(|| RoutingError::UnknownHandler {
                    appliance_id: appliance.id,
                    behavior: appliance.behavior.clone(),
                })?;

        Ok(SessionConfig {
            appliance_id: appliance.id,
            name: appliance.name,
            behavior_name: appliance.behavior,
            behavior,
            initial: appliance.record,
        })
    }
}
