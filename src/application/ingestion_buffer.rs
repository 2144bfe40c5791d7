// Ingestion buffer - Coalescing staging area between the socket and the store
use crate::domain::machine::{MachineId, RawSample};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Holds at most one unflushed sample per machine. Staging a newer sample for
/// the same machine replaces the older one, so memory stays bounded by the
/// number of machines regardless of the inbound rate. Thread-safe.
#[derive(Debug, Default)]
pub struct IngestionBuffer {
    pending: Mutex<HashMap<MachineId, RawSample>>,
    staged: AtomicU64,
    coalesced: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BufferStats {
    pub pending: usize,
    pub staged: u64,
    pub coalesced: u64,
}

impl IngestionBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage `sample` under `machine_id`, overwriting any unflushed sample.
    pub fn stage(&self, machine_id: &str, sample: RawSample) {
        let replaced = match self.pending.lock() {
            Ok(mut pending) => pending.insert(machine_id.to_string(), sample).is_some(),
            Err(e) => {
                tracing::error!("Ingestion buffer lock poisoned: {}", e);
                return;
            }
        };

        self.staged.fetch_add(1, Ordering::Relaxed);
        if replaced {
            self.coalesced.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Take everything staged since the previous drain, leaving the buffer empty.
    pub fn drain_all(&self) -> HashMap<MachineId, RawSample> {
        self.pending
            .lock()
            .map(|mut pending| std::mem::take(&mut *pending))
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> BufferStats {
        BufferStats {
            pending: self.len(),
            staged: self.staged.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
        }
    }
}
