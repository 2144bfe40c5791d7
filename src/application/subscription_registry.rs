// Subscription registry - Keeps one listener per machine of interest
use crate::application::connection_manager::{ConnectionHandle, Listener};
use crate::application::ingestion_buffer::IngestionBuffer;
use crate::domain::machine::{MachineId, RawSample};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionDelta {
    pub attached: Vec<MachineId>,
    pub detached: Vec<MachineId>,
}

impl SubscriptionDelta {
    pub fn is_empty(&self) -> bool {
        self.attached.is_empty() && self.detached.is_empty()
    }
}

pub struct SubscriptionRegistry {
    connection: ConnectionHandle,
    buffer: Arc<IngestionBuffer>,
    interest: watch::Sender<BTreeSet<MachineId>>,
    attached: Mutex<BTreeSet<MachineId>>,
}

impl SubscriptionRegistry {
    pub fn new(connection: ConnectionHandle, buffer: Arc<IngestionBuffer>) -> Self {
        let (interest, _) = watch::channel(BTreeSet::new());
        Self {
            connection,
            buffer,
            interest,
            attached: Mutex::new(BTreeSet::new()),
        }
    }

    /// Replace the interest set. The running registry task picks the change
    /// up; callers driving the registry by hand follow with `reconcile`.
    pub fn set_interest<I>(&self, machine_ids: I)
    where
        I: IntoIterator<Item = MachineId>,
    {
        let next: BTreeSet<MachineId> = machine_ids
            .into_iter()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .collect();
        self.interest.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    pub fn interest(&self) -> BTreeSet<MachineId> {
        self.interest.borrow().clone()
    }

    /// Ids with a listener currently attached.
    pub fn attached(&self) -> Vec<MachineId> {
        self.attached
            .lock()
            .map(|a| a.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn active_count(&self) -> usize {
        self.attached.lock().map(|a| a.len()).unwrap_or(0)
    }

    /// Bring attached listeners in line with the interest set: everything of
    /// interest while connected, nothing otherwise. Only the difference is
    /// touched.
    pub fn reconcile(&self) -> SubscriptionDelta {
        let desired = if self.connection.state().is_connected() {
            self.interest()
        } else {
            BTreeSet::new()
        };

        let Ok(mut attached) = self.attached.lock() else {
            tracing::error!("Subscription registry lock poisoned");
            return SubscriptionDelta::default();
        };

        let mut delta = SubscriptionDelta::default();

        let stale: Vec<MachineId> = attached.difference(&desired).cloned().collect();
        for machine_id in stale {
            self.connection.off(&machine_id);
            attached.remove(&machine_id);
            delta.detached.push(machine_id);
        }

        let missing: Vec<MachineId> = desired.difference(&attached).cloned().collect();
        for machine_id in missing {
            if !self.connection.on(&machine_id, self.listener_for(&machine_id)) {
                tracing::error!(
                    "Listener for {} was attached behind the registry's back",
                    machine_id
                );
            }
            attached.insert(machine_id.clone());
            delta.attached.push(machine_id);
        }

        if !delta.is_empty() {
            tracing::debug!(
                "Subscriptions reconciled: +{:?} -{:?} ({} active)",
                delta.attached,
                delta.detached,
                attached.len()
            );
        }
        delta
    }

    /// Drop every listener this registry attached.
    pub fn detach_all(&self) -> Vec<MachineId> {
        let Ok(mut attached) = self.attached.lock() else {
            return Vec::new();
        };
        let detached: Vec<MachineId> = std::mem::take(&mut *attached).into_iter().collect();
        for machine_id in &detached {
            self.connection.off(machine_id);
        }
        detached
    }

    /// Reconcile on every interest change and connection-state transition
    /// until `cancel` fires, then detach everything.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let mut state_rx = self.connection.watch_state();
        let mut interest_rx = self.interest.subscribe();

        tokio::spawn(async move {
            self.reconcile();
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    changed = state_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    changed = interest_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
                self.reconcile();
            }

            let detached = self.detach_all();
            tracing::debug!("Subscription registry stopped; released {} listeners", detached.len());
        })
    }

    fn listener_for(&self, machine_id: &str) -> Listener {
        let buffer = self.buffer.clone();
        let machine_id = machine_id.to_string();
        Arc::new(move |sample: RawSample| buffer.stage(&machine_id, sample))
    }
}
