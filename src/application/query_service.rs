// Query service - Read-only view used by the presentation layer
use crate::application::connection_manager::ConnectionHandle;
use crate::application::ingestion_buffer::{BufferStats, IngestionBuffer};
use crate::application::snapshot_store::{MachinePhase, SnapshotStore, StoreUpdate};
use crate::application::status_reporter::StatusReporter;
use crate::domain::connection::ConnectionState;
use crate::domain::fleet::FleetSummary;
use crate::domain::machine::{MachineId, MachineSnapshot};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Pipeline internals for operators chasing a stuck dashboard
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostics {
    pub url: String,
    pub connection: ConnectionState,
    pub listeners: usize,
    pub machines: usize,
    pub store_revision: u64,
    pub buffer: BufferStats,
}

#[derive(Clone)]
pub struct QueryService {
    store: Arc<SnapshotStore>,
    buffer: Arc<IngestionBuffer>,
    reporter: StatusReporter,
    connection: ConnectionHandle,
}

impl QueryService {
    pub fn new(
        store: Arc<SnapshotStore>,
        buffer: Arc<IngestionBuffer>,
        reporter: StatusReporter,
        connection: ConnectionHandle,
    ) -> Self {
        Self {
            store,
            buffer,
            reporter,
            connection,
        }
    }

    /// Always a fully shaped snapshot; unknown ids get the placeholder.
    pub fn get(&self, machine_id: &str) -> MachineSnapshot {
        self.store.get(machine_id)
    }

    pub fn get_many(&self, machine_ids: &[MachineId]) -> Vec<MachineSnapshot> {
        self.store.get_many(machine_ids)
    }

    pub fn all(&self) -> Vec<MachineSnapshot> {
        self.store.all()
    }

    pub fn phase(&self, machine_id: &str) -> MachinePhase {
        self.store.phase(machine_id)
    }

    /// Whether the snapshot's last change is older than the freshness window.
    pub fn is_stale(&self, snapshot: &MachineSnapshot) -> bool {
        self.store.is_stale(snapshot, Utc::now())
    }

    pub fn summary(&self) -> FleetSummary {
        self.reporter.summary()
    }

    /// Current state; `Error` carries the failure reason.
    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            url: self.connection.url().to_string(),
            connection: self.connection.state(),
            listeners: self.connection.listener_count(),
            machines: self.store.len(),
            store_revision: self.store.revision(),
            buffer: self.buffer.stats(),
        }
    }

    pub fn subscribe_updates(&self) -> broadcast::Receiver<StoreUpdate> {
        self.store.subscribe()
    }
}
