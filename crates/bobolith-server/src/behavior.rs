//! Per-appliance message handling behaviors.
//!
//! Appliances name their behavior in the directory; the name is resolved
//! against a table built once at startup. Ping/pong liveness is handled by
//! the session itself, so behaviors only see the remaining messages.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bobolith_protocol::Message;
use uuid::Uuid;

use crate::config::ConfigError;
use crate::session::SessionEnd;

/// Message handling attached to a session.
#[async_trait]
pub trait ApplianceBehavior: Send + Sync {
    /// Called once the session is up, before any frame is read.
    async fn on_connect(&self, _appliance_id: Uuid) {}

    /// Handle a decoded non-ping message. A returned message is sent back.
    async fn on_message(&self, appliance_id: Uuid, message: Message) -> Option<Message>;

    /// Called after the session has been torn down.
    async fn on_disconnect(&self, _appliance_id: Uuid, _end: SessionEnd) {}
}

/// Plain heartbeat protocol: nothing beyond ping/pong.
#[derive(Debug, Default)]
pub struct HeartbeatBehavior;

#[async_trait]
impl ApplianceBehavior for HeartbeatBehavior {
    async fn on_message(&self, appliance_id: Uuid, message: Message) -> Option<Message> {
        tracing::debug!(
            appliance_id = %appliance_id,
            kind = ?message.kind(),
            "Ignoring message"
        );
        None
    }
}

/// Logs the whole conversation. Useful when bringing up new hardware.
#[derive(Debug, Default)]
pub struct LoggingBehavior;

#[async_trait]
impl ApplianceBehavior for LoggingBehavior {
    async fn on_connect(&self, appliance_id: Uuid) {
        tracing::info!(appliance_id = %appliance_id, "Appliance session opened");
    }

    async fn on_message(&self, appliance_id: Uuid, message: Message) -> Option<Message> {
        tracing::info!(appliance_id = %appliance_id, message = ?message, "Received message");
        None
    }

    async fn on_disconnect(&self, appliance_id: Uuid, end: SessionEnd) {
        tracing::info!(appliance_id = %appliance_id, reason = %end, "Appliance session closed");
    }
}

/// Name -> behavior table, read-only once the server is running.
#[derive(Clone, Default)]
pub struct BehaviorRegistry {
    behaviors: HashMap<String, Arc<dyn ApplianceBehavior>>,
}

impl BehaviorRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in behaviors: `heartbeat` and `logging`.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.behaviors.insert(
            crate::directory::DEFAULT_BEHAVIOR.to_string(),
            Arc::new(HeartbeatBehavior),
        );
        registry
            .behaviors
            .insert("logging".to_string(), Arc::new(LoggingBehavior));
        registry
    }

    /// Register a behavior under a new name.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        behavior: Arc<dyn ApplianceBehavior>,
    ) -> Result<(), ConfigError> {
        let name = name.into();
        if self.behaviors.contains_key(&name) {
            return Err(ConfigError::DuplicateBehavior(name));
        }
        self.behaviors.insert(name, behavior);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<dyn ApplianceBehavior>> {
        self.behaviors.get(name).cloned()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.behaviors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
