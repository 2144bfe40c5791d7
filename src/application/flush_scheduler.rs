// Flush scheduler - Periodic drain of the ingestion buffer into the store
use crate::application::ingestion_buffer::IngestionBuffer;
use crate::application::snapshot_store::{FlushOutcome, SnapshotStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct FlushScheduler {
    buffer: Arc<IngestionBuffer>,
    store: Arc<SnapshotStore>,
    interval: Duration,
}

impl FlushScheduler {
    pub fn new(buffer: Arc<IngestionBuffer>, store: Arc<SnapshotStore>, interval: Duration) -> Self {
        Self {
            buffer,
            store,
            interval,
        }
    }

    /// One tick: drain and, if anything was staged, apply it. Returns `None`
    /// for an empty drain.
    pub fn flush_once(&self) -> Option<FlushOutcome> {
        let batch = self.buffer.drain_all();
        if batch.is_empty() {
            return None;
        }
        Some(self.store.apply_flush(batch))
    }

    /// Run until `cancel` fires. The next tick is armed only after the
    /// current flush returns, so flushes never overlap.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::debug!("Flush scheduler started ({:?} period)", self.interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.interval) => {}
                }
                if let Some(outcome) = self.flush_once() {
                    tracing::trace!("Flush touched {} machines", outcome.changed());
                }
            }
            tracing::debug!("Flush scheduler stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::machine::{MachineStatus, RawSample};

    fn sample(machine_id: &str, current: f64, timestamp_ms: i64) -> RawSample {
        RawSample {
            machine_id: machine_id.to_string(),
            current,
            voltage: 0.0,
            gas_flow_rate: 0.0,
            machine_temp: 0.0,
            ambient_temp: 0.0,
            status: MachineStatus::Running,
            operator_id: String::new(),
            timestamp_ms,
        }
    }

    fn scheduler() -> FlushScheduler {
        FlushScheduler::new(
            Arc::new(IngestionBuffer::new()),
            Arc::new(SnapshotStore::new(250, chrono::Duration::seconds(30))),
            Duration::from_millis(100),
        )
    }

    #[test]
    fn test_empty_drain_skips_store() {
        let scheduler = scheduler();
        assert_eq!(scheduler.flush_once(), None);
        assert_eq!(scheduler.store.revision(), 0);
    }

    #[test]
    fn test_coalesced_window_applies_last_sample_only() {
        let scheduler = scheduler();
        scheduler.buffer.stage("m1", sample("m1", 5.0, 50));
        scheduler.flush_once();

        scheduler.buffer.stage("m1", sample("m1", 10.0, 100));
        scheduler.buffer.stage("m1", sample("m1", 12.0, 150));
        let outcome = scheduler.flush_once().unwrap();

        assert_eq!(outcome.updated, 1);
        let snapshot = scheduler.store.get("m1");
        assert_eq!(snapshot.current, 12.0);
        let times: Vec<i64> = snapshot.current_series.iter().map(|p| p.time_ms).collect();
        assert_eq!(times, vec![50, 150]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_flush_and_cancel() {
        let scheduler = scheduler();
        let buffer = scheduler.buffer.clone();
        let store = scheduler.store.clone();
        let cancel = CancellationToken::new();
        let task = scheduler.spawn(cancel.clone());

        buffer.stage("m1", sample("m1", 7.0, 10));
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(store.get("m1").current, 7.0);
        assert!(buffer.is_empty());

        cancel.cancel();
        task.await.unwrap();

        buffer.stage("m1", sample("m1", 8.0, 20));
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(store.get("m1").current, 7.0);
    }
}
