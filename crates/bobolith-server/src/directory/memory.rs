//! In-memory appliance directory, seeded from a TOML file.
//!
//! ```toml
//! [[appliance]]
//! id = "765d2c49-5d0a-4f4f-a1b2-0694be5b2e48"
//! name = "soda-machine"
//! behavior = "heartbeat"   # optional
//! ```

use std::collections::HashSet;
use std::path::Path;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use uuid::Uuid;

use super::{Appliance, ApplianceDirectory, PersistenceError, DEFAULT_BEHAVIOR};
use crate::config::ConfigError;
use crate::heartbeat::{ApplianceStatus, StatusRecord};

#[derive(Debug, Deserialize)]
struct SeedFile {
    #[serde(default, rename = "appliance")]
    appliances: Vec<SeedAppliance>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SeedAppliance {
    id: Uuid,
    name: String,
    #[serde(default = "default_behavior")]
    behavior: String,
}

fn default_behavior() -> String {
    DEFAULT_BEHAVIOR.to_string()
}

/// Directory held in process memory. Status does not survive a restart.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    appliances: DashMap<Uuid, Appliance>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an appliance.
    pub fn insert(&self, appliance: Appliance) {
        self.appliances.insert(appliance.id, appliance);
    }

    /// Build a directory from the contents of a seed file.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let seed: SeedFile =
            toml::from_str(contents).map_err(|e| ConfigError::InvalidSeedFile(e.to_string()))?;

        let directory = Self::new();
        let mut ids = HashSet::new();
        let mut names = HashSet::new();

        for entry in seed.appliances {
            if !ids.insert(entry.id) {
                return Err(ConfigError::InvalidSeedFile(format!(
                    "appliance id {} appears more than once",
                    entry.id
                )));
            }
            if !names.insert(entry.name.clone()) {
                return Err(ConfigError::InvalidSeedFile(format!(
                    "appliance name '{}' appears more than once",
                    entry.name
                )));
            }
            directory.insert(Appliance::new(entry.id, entry.name).with_behavior(entry.behavior));
        }

        Ok(directory)
    }

    /// Build a directory from a seed file on disk.
    pub fn from_seed_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::SeedFileRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn len(&self) -> usize {
        self.appliances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.appliances.is_empty()
    }
}

#[async_trait]
impl ApplianceDirectory for MemoryDirectory {
    async fn get(&self, id: Uuid) -> Result<Option<Appliance>, PersistenceError> {
        Ok(self.appliances.get(&id).map(|entry| entry.clone()))
    }

    async fn save_status(&self, id: Uuid, record: &StatusRecord) -> Result<(), PersistenceError> {
        let mut entry = self
            .appliances
            .get_mut(&id)
            .ok_or(PersistenceError::NotFound(id))?;
        entry.record = record.clone();
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Appliance>, PersistenceError> {
        let mut all: Vec<Appliance> = self
            .appliances
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(all)
    }

    async fn mark_all_down(&self) -> Result<u64, PersistenceError> {
        let mut changed = 0;
        for mut entry in self.appliances.iter_mut() {
            if entry.record.status != ApplianceStatus::Down {
                entry.record.status = ApplianceStatus::Down;
                changed += 1;
            }
        }
        Ok(changed)
    }
}
