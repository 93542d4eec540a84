//! Single-owner leases over appliance identifiers.
//!
//! At most one session may write an appliance's status at a time. A new
//! connection for an identifier evicts the current session and waits until
//! it has fully shut down (including its final `Down` write) before
//! starting. The newest connection always wins.

use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{watch, Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// A newer connection claimed the slot while this one was waiting.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("appliance {0} was claimed by a newer connection")]
pub struct Superseded(pub Uuid);

#[derive(Debug)]
struct Slot {
    lock: Arc<Mutex<()>>,
    /// Generation of the newest claimant.
    latest: watch::Sender<u64>,
}

impl Default for Slot {
    fn default() -> Self {
        Self {
            lock: Arc::new(Mutex::new(())),
            latest: watch::channel(0).0,
        }
    }
}

/// Exclusive right to run a session for one appliance.
#[derive(Debug)]
pub struct SessionLease {
    appliance_id: Uuid,
    generation: u64,
    latest: watch::Receiver<u64>,
    _guard: OwnedMutexGuard<()>,
}

impl SessionLease {
    pub fn appliance_id(&self) -> Uuid {
        self.appliance_id
    }

    /// Resolves once a newer connection or an eviction wants this slot.
    pub async fn superseded(&mut self) {
        loop {
            if *self.latest.borrow_and_update() != self.generation {
                return;
            }
            if self.latest.changed().await.is_err() {
                // Slots are never dropped while leases exist.
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Tracks which appliances have a live session.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    slots: DashMap<Uuid, Arc<Slot>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, appliance_id: Uuid) -> Arc<Slot> {
        self.slots.entry(appliance_id).or_default().clone()
    }

    /// Claim the slot for `appliance_id`, evicting any current holder.
    pub async fn acquire(&self, appliance_id: Uuid) -> Result<SessionLease, Superseded> {
        let slot = self.slot(appliance_id);

        let mut generation = 0;
        slot.latest.send_modify(|latest| {
            *latest += 1;
            generation = *latest;
        });

        let guard = Arc::clone(&slot.lock).lock_owned().await;

        if *slot.latest.borrow() != generation {
            tracing::debug!(appliance_id = %appliance_id, "Connection superseded while waiting");
            return Err(Superseded(appliance_id));
        }

        Ok(SessionLease {
            appliance_id,
            generation,
            latest: slot.latest.subscribe(),
            _guard: guard,
        })
    }

    /// Ask the live session for `appliance_id` to stop.
    ///
    /// Returns `false` if no session was live.
    pub fn evict(&self, appliance_id: Uuid) -> bool {
        let Some(slot) = self.slots.get(&appliance_id).map(|s| Arc::clone(s.value())) else {
            return false;
        };
        if !Self::slot_busy(&slot) {
            return false;
        }
        slot.latest.send_modify(|latest| *latest += 1);
        tracing::info!(appliance_id = %appliance_id, "Evicting appliance session");
        true
    }

    /// Whether a session currently holds the slot.
    pub fn is_connected(&self, appliance_id: Uuid) -> bool {
        self.slots
            .get(&appliance_id)
            .is_some_and(|slot| Self::slot_busy(slot.value()))
    }

    /// Wait until every session that holds or is waiting for a slot has
    /// released it. Callers signal shutdown first.
    pub async fn drain(&self) {
        let slots: Vec<Arc<Slot>> = self
            .slots
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for slot in slots {
            let _released = slot.lock.lock().await;
        }
    }

    fn slot_busy(slot: &Slot) -> bool {
        slot.lock.try_lock().is_err()
    }
}
