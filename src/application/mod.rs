// Application layer - Ingestion pipeline and the queries it serves
pub mod connection_manager;
pub mod flush_scheduler;
pub mod ingestion_buffer;
pub mod query_service;
pub mod session;
pub mod snapshot_store;
pub mod status_reporter;
pub mod subscription_registry;
pub mod telemetry_transport;

#[cfg(test)]
pub mod test_support;
