// Telemetry session - Wires the ingestion pipeline with one lifecycle
use crate::application::connection_manager::{ConnectionHandle, ConnectionManager};
use crate::application::flush_scheduler::FlushScheduler;
use crate::application::ingestion_buffer::IngestionBuffer;
use crate::application::query_service::QueryService;
use crate::application::snapshot_store::SnapshotStore;
use crate::application::status_reporter::StatusReporter;
use crate::application::subscription_registry::SubscriptionRegistry;
use crate::application::telemetry_transport::TelemetryTransport;
use crate::infrastructure::config::TelemetryConfig;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// One connection, its subscriptions, buffer, store and flush timer.
/// Sessions are independent of each other; nothing here is process-global.
pub struct TelemetrySession {
    manager: ConnectionManager,
    connection: ConnectionHandle,
    registry: Arc<SubscriptionRegistry>,
    query: QueryService,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl TelemetrySession {
    /// Open the connection and start the registry and flush tasks.
    /// Must be called from within a Tokio runtime.
    pub fn start(config: &TelemetryConfig, transport: Arc<dyn TelemetryTransport>) -> Self {
        let manager = ConnectionManager::new(transport, config.connection.clone());
        let connection = manager.open(&config.server.url);

        let buffer = Arc::new(IngestionBuffer::new());
        let store = Arc::new(SnapshotStore::new(
            config.store.retention,
            config.store.stale_after(),
        ));
        let registry = Arc::new(SubscriptionRegistry::new(
            connection.clone(),
            buffer.clone(),
        ));
        registry.set_interest(config.interest.machine_ids.iter().cloned());

        let reporter = StatusReporter::new(store.clone(), registry.clone());
        let query = QueryService::new(store.clone(), buffer.clone(), reporter, connection.clone());

        let cancel = CancellationToken::new();
        let tasks = vec![
            registry.clone().spawn(cancel.child_token()),
            FlushScheduler::new(buffer.clone(), store, config.flush.interval())
                .spawn(cancel.child_token()),
        ];

        tracing::info!(
            "Telemetry session started for {} ({} machines of interest)",
            config.server.url,
            config.interest.machine_ids.len()
        );

        Self {
            manager,
            connection,
            registry,
            query,
            cancel,
            tasks,
        }
    }

    pub fn query(&self) -> &QueryService {
        &self.query
    }

    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// Stop the flush timer and registry, release every listener and close
    /// the connection. Nothing outlives this call.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::warn!("Session task ended abnormally: {}", e);
            }
        }
        self.manager.close(&self.connection).await;
        tracing::info!("Telemetry session for {} shut down", self.connection.url());
    }
}
