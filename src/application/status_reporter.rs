// Status reporter - Fleet-wide counts derived from the store on demand
use crate::application::snapshot_store::SnapshotStore;
use crate::application::subscription_registry::SubscriptionRegistry;
use crate::domain::fleet::FleetSummary;
use crate::domain::machine::MachineStatus;
use chrono::{DateTime, Utc};
use std::sync::Arc;

#[derive(Clone)]
pub struct StatusReporter {
    store: Arc<SnapshotStore>,
    registry: Arc<SubscriptionRegistry>,
}

impl StatusReporter {
    pub fn new(store: Arc<SnapshotStore>, registry: Arc<SubscriptionRegistry>) -> Self {
        Self { store, registry }
    }

    pub fn summary(&self) -> FleetSummary {
        self.summary_at(Utc::now())
    }

    /// Recomputed from scratch on every call; fleets are small.
    pub fn summary_at(&self, now: DateTime<Utc>) -> FleetSummary {
        let mut summary = FleetSummary {
            active_connections: self.registry.active_count(),
            ..FleetSummary::default()
        };

        for (status, stale) in self.store.statuses(now) {
            summary.total += 1;
            match status {
                MachineStatus::Running => summary.running += 1,
                MachineStatus::Stopped => summary.stopped += 1,
                MachineStatus::Unknown => summary.unknown += 1,
            }
            if stale {
                summary.stale += 1;
            }
        }

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::connection_manager::ConnectionManager;
    use crate::application::ingestion_buffer::IngestionBuffer;
    use crate::application::test_support::ScriptedTransport;
    use crate::domain::machine::{MachineId, RawSample};
    use crate::infrastructure::config::ConnectionSettings;
    use std::collections::HashMap;

    fn sample(machine_id: &str, status: MachineStatus) -> (MachineId, RawSample) {
        let sample = RawSample {
            machine_id: machine_id.to_string(),
            current: 1.0,
            voltage: 1.0,
            gas_flow_rate: 1.0,
            machine_temp: 0.0,
            ambient_temp: 0.0,
            status,
            operator_id: String::new(),
            timestamp_ms: 1,
        };
        (machine_id.to_string(), sample)
    }

    #[tokio::test(start_paused = true)]
    async fn test_summary_counts_statuses() {
        let handle = ConnectionManager::new(
            Arc::new(ScriptedTransport::default()),
            ConnectionSettings::default(),
        )
        .open("http://weld-hub:3001");
        let store = Arc::new(SnapshotStore::new(250, chrono::Duration::seconds(30)));
        let registry = Arc::new(SubscriptionRegistry::new(
            handle.clone(),
            Arc::new(IngestionBuffer::new()),
        ));
        let reporter = StatusReporter::new(store.clone(), registry);

        let t0 = Utc::now();
        let batch: HashMap<MachineId, RawSample> = [
            sample("m1", MachineStatus::Running),
            sample("m2", MachineStatus::Running),
            sample("m3", MachineStatus::Stopped),
            sample("m4", MachineStatus::Unknown),
        ]
        .into_iter()
        .collect();
        store.apply_flush_at(batch, t0);

        let summary = reporter.summary_at(t0);
        assert_eq!(
            summary,
            FleetSummary {
                total: 4,
                running: 2,
                stopped: 1,
                unknown: 1,
                stale: 0,
                active_connections: 0,
            }
        );

        let later = reporter.summary_at(t0 + chrono::Duration::minutes(5));
        assert_eq!(later.stale, 4);
        assert_eq!(later.total, 4);

        handle.close().await;
    }
}
