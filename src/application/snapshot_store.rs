// Snapshot store - Latest reading and rolling series per machine
use crate::domain::machine::{MachineId, MachineSnapshot, MachineStatus, RawSample};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

const UPDATE_CHANNEL_CAPACITY: usize = 64;

/// Where a machine is in its lifecycle inside the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MachinePhase {
    /// No sample seen yet
    Unknown,
    /// First sample applied, series bootstrapped
    Seeded,
    /// At least one change applied after seeding
    Updating,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushOutcome {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
}

impl FlushOutcome {
    pub fn changed(&self) -> usize {
        self.created + self.updated
    }
}

/// Published after every flush that changed at least one machine.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreUpdate {
    pub revision: u64,
    pub changed: Vec<MachineId>,
}

pub struct SnapshotStore {
    retention: usize,
    stale_after: chrono::Duration,
    snapshots: RwLock<HashMap<MachineId, MachineSnapshot>>,
    revision: AtomicU64,
    updates: broadcast::Sender<StoreUpdate>,
}

impl SnapshotStore {
    pub fn new(retention: usize, stale_after: chrono::Duration) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            retention: retention.max(1),
            stale_after,
            snapshots: RwLock::new(HashMap::new()),
            revision: AtomicU64::new(0),
            updates,
        }
    }

    pub fn apply_flush(&self, batch: HashMap<MachineId, RawSample>) -> FlushOutcome {
        self.apply_flush_at(batch, Utc::now())
    }

    /// Apply one drained batch. Machines whose change-detected fields are
    /// identical to their snapshot are skipped entirely.
    pub fn apply_flush_at(
        &self,
        batch: HashMap<MachineId, RawSample>,
        now: DateTime<Utc>,
    ) -> FlushOutcome {
        let mut outcome = FlushOutcome::default();
        let mut changed = Vec::new();

        {
            let Ok(mut snapshots) = self.snapshots.write() else {
                tracing::error!("Snapshot store lock poisoned; dropping flush");
                return outcome;
            };

            for (machine_id, sample) in batch {
                match snapshots.get_mut(&machine_id) {
                    Some(snapshot) if !snapshot.differs_from(&sample) => {
                        snapshot.touch(now);
                        outcome.unchanged += 1;
                    }
                    Some(snapshot) => {
                        snapshot.apply(sample, now);
                        outcome.updated += 1;
                        changed.push(machine_id);
                    }
                    None => {
                        tracing::info!("First telemetry from machine {}", machine_id);
                        let snapshot = MachineSnapshot::seed(sample, self.retention, now);
                        snapshots.insert(machine_id.clone(), snapshot);
                        outcome.created += 1;
                        changed.push(machine_id);
                    }
                }
            }
        }

        if !changed.is_empty() {
            changed.sort();
            let revision = self.revision.fetch_add(1, Ordering::Relaxed) + 1;
            // No receivers just means nobody is streaming right now
            let _ = self.updates.send(StoreUpdate { revision, changed });
        }

        tracing::debug!(
            "Flush applied: {} created, {} updated, {} unchanged",
            outcome.created,
            outcome.updated,
            outcome.unchanged
        );
        outcome
    }

    /// Snapshot for `machine_id`, or an unknown/zeroed placeholder.
    pub fn get(&self, machine_id: &str) -> MachineSnapshot {
        self.snapshots
            .read()
            .ok()
            .and_then(|snapshots| snapshots.get(machine_id).cloned())
            .unwrap_or_else(|| MachineSnapshot::placeholder(machine_id, self.retention))
    }

    /// Snapshots for the requested ids, in request order.
    pub fn get_many(&self, machine_ids: &[MachineId]) -> Vec<MachineSnapshot> {
        machine_ids.iter().map(|id| self.get(id)).collect()
    }

    /// Every known snapshot, ordered by machine id.
    pub fn all(&self) -> Vec<MachineSnapshot> {
        let mut all: Vec<MachineSnapshot> = self
            .snapshots
            .read()
            .map(|snapshots| snapshots.values().cloned().collect())
            .unwrap_or_default();
        all.sort_by(|a, b| a.machine_id.cmp(&b.machine_id));
        all
    }

    /// Status of every known machine plus whether it is stale at `now`.
    pub fn statuses(&self, now: DateTime<Utc>) -> Vec<(MachineStatus, bool)> {
        self.snapshots
            .read()
            .map(|snapshots| {
                snapshots
                    .values()
                    .map(|s| (s.status, s.is_stale(now, self.stale_after)))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn phase(&self, machine_id: &str) -> MachinePhase {
        let updates = self
            .snapshots
            .read()
            .ok()
            .and_then(|snapshots| snapshots.get(machine_id).map(|s| s.updates));
        match updates {
            None => MachinePhase::Unknown,
            Some(0) => MachinePhase::Seeded,
            Some(_) => MachinePhase::Updating,
        }
    }

    pub fn is_stale(&self, snapshot: &MachineSnapshot, now: DateTime<Utc>) -> bool {
        snapshot.is_stale(now, self.stale_after)
    }

    pub fn len(&self) -> usize {
        self.snapshots.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Relaxed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreUpdate> {
        self.updates.subscribe()
    }
}
