//! Appliance directory: where appliance records and their status live.
//!
//! The server reads appliance identity and behavior from the directory and
//! writes back status fields. Creating and deleting appliances is done
//! elsewhere.

mod memory;
mod postgres;

pub use memory::MemoryDirectory;
pub use postgres::{create_pool, run_migrations, PgDirectory};

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::heartbeat::StatusRecord;

/// Behavior attached to appliances that do not name one.
pub const DEFAULT_BEHAVIOR: &str = "heartbeat";

/// An appliance record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Appliance {
    pub id: Uuid,
    pub name: String,
    /// Registered behavior name.
    pub behavior: String,
    #[serde(flatten)]
    pub record: StatusRecord,
}

impl Appliance {
    /// A never-connected appliance using the default behavior.
    pub fn new(id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            behavior: DEFAULT_BEHAVIOR.to_string(),
            record: StatusRecord::default(),
        }
    }

    pub fn with_behavior(mut self, behavior: impl Into<String>) -> Self {
        self.behavior = behavior.into();
        self
    }
}

/// Directory access failures.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// The appliance does not exist (e.g. deleted while connected).
    #[error("appliance {0} not found")]
    NotFound(Uuid),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored value could not be interpreted.
    #[error("corrupt appliance record: {0}")]
    Corrupt(String),
}

/// Storage of appliance records.
#[async_trait]
pub trait ApplianceDirectory: Send + Sync {
    /// Look up one appliance.
    async fn get(&self, id: Uuid) -> Result<Option<Appliance>, PersistenceError>;

    /// Overwrite the status fields of one appliance.
    async fn save_status(&self, id: Uuid, record: &StatusRecord) -> Result<(), PersistenceError>;

    /// List every appliance, ordered by name.
    async fn list(&self) -> Result<Vec<Appliance>, PersistenceError>;

    /// Mark every appliance that is not `Down` as `Down`.
    ///
    /// Called on startup: no connection exists yet, so any other status is
    /// left over from a previous run. Returns the number of records changed.
    async fn mark_all_down(&self) -> Result<u64, PersistenceError>;
}
