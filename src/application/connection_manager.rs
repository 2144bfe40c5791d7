// Connection manager - One persistent telemetry connection with reconnect
use crate::application::telemetry_transport::{
    ConnectionError, FeedEvent, TelemetryFeed, TelemetryTransport,
};
use crate::domain::connection::ConnectionState;
use crate::domain::machine::{MachineId, RawSample};
use crate::infrastructure::backoff::Backoff;
use crate::infrastructure::config::ConnectionSettings;
use crate::infrastructure::sample_mapper::payload_to_sample;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Upper bound on a close handshake before the socket is abandoned.
const FEED_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Callback receiving every sample for one machine id.
pub type Listener = Arc<dyn Fn(RawSample) + Send + Sync>;

#[derive(Clone)]
pub struct ConnectionManager {
    transport: Arc<dyn TelemetryTransport>,
    settings: ConnectionSettings,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn TelemetryTransport>, settings: ConnectionSettings) -> Self {
        Self {
            transport,
            settings,
        }
    }

    /// Start connecting to `url` in the background. The returned handle is
    /// live immediately; its state moves through `Connecting` on its own.
    pub fn open(&self, url: &str) -> ConnectionHandle {
        let handle = ConnectionHandle::new(url);
        let task = tokio::spawn(run_connection(
            self.transport.clone(),
            self.settings.clone(),
            handle.clone(),
        ));
        if let Ok(mut slot) = handle.inner.task.lock() {
            *slot = Some(task);
        }
        handle
    }

    pub async fn close(&self, handle: &ConnectionHandle) {
        handle.close().await;
    }
}

/// Shared handle to one managed connection.
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    url: String,
    state: watch::Sender<ConnectionState>,
    listeners: Mutex<HashMap<MachineId, Listener>>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionHandle {
    fn new(url: &str) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(HandleInner {
                url: url.to_string(),
                state,
                listeners: Mutex::new(HashMap::new()),
                cancel: CancellationToken::new(),
                task: Mutex::new(None),
            }),
        }
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.borrow().clone()
    }

    /// Watch connection state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Attach the listener for `machine_id`. Returns `false` and leaves the
    /// existing listener in place if one is already attached.
    pub fn on(&self, machine_id: &str, listener: Listener) -> bool {
        let Ok(mut listeners) = self.inner.listeners.lock() else {
            return false;
        };
        if listeners.contains_key(machine_id) {
            tracing::error!("Refusing duplicate listener for {}", machine_id);
            return false;
        }
        listeners.insert(machine_id.to_string(), listener);
        true
    }

    /// Detach the listener for `machine_id`. Returns whether one was attached.
    pub fn off(&self, machine_id: &str) -> bool {
        self.inner
            .listeners
            .lock()
            .map(|mut listeners| listeners.remove(machine_id).is_some())
            .unwrap_or(false)
    }

    pub fn listener_count(&self) -> usize {
        self.inner
            .listeners
            .lock()
            .map(|listeners| listeners.len())
            .unwrap_or(0)
    }

    /// Stop the connection task, drop every listener and settle on
    /// `Disconnected`. Safe to call more than once.
    pub async fn close(&self) {
        self.inner.cancel.cancel();

        let task = self.inner.task.lock().ok().and_then(|mut slot| slot.take());
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!("Connection task for {} ended abnormally: {}", self.url(), e);
            }
        }

        if let Ok(mut listeners) = self.inner.listeners.lock() {
            listeners.clear();
        }
        self.set_state(ConnectionState::Disconnected);
    }

    fn set_state(&self, next: ConnectionState) {
        let changed = self.inner.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next.clone();
                true
            }
        });
        if changed {
            tracing::info!("Telemetry connection {} is now {}", self.url(), next);
        }
    }

    fn dispatch(&self, event: FeedEvent) {
        // Clone the listener out so it runs without the table locked
        let listener = self
            .inner
            .listeners
            .lock()
            .ok()
            .and_then(|listeners| listeners.get(&event.event).cloned());

        match listener {
            Some(listener) => listener(payload_to_sample(&event.event, &event.payload, Utc::now())),
            None => tracing::trace!("No listener for event {}", event.event),
        }
    }
}

enum PumpOutcome {
    Cancelled,
    Closed,
    Failed(ConnectionError),
}

async fn run_connection(
    transport: Arc<dyn TelemetryTransport>,
    settings: ConnectionSettings,
    handle: ConnectionHandle,
) {
    let cancel = handle.inner.cancel.clone();
    let mut backoff = Backoff::new(settings.initial_backoff(), settings.max_backoff());
    let timeout = settings.connect_timeout();

    loop {
        handle.set_state(ConnectionState::Connecting);

        let attempt = tokio::select! {
            _ = cancel.cancelled() => break,
            attempt = tokio::time::timeout(timeout, transport.connect(handle.url())) => attempt,
        };

        let failure = match attempt {
            Ok(Ok(mut feed)) => {
                backoff.reset();
                handle.set_state(ConnectionState::Connected);
                let outcome = pump(&handle, feed.as_mut(), &cancel).await;
                if tokio::time::timeout(FEED_CLOSE_TIMEOUT, feed.close()).await.is_err() {
                    tracing::warn!(
                        "Close handshake with {} stalled; dropping the socket",
                        handle.url()
                    );
                }
                match outcome {
                    PumpOutcome::Cancelled => break,
                    PumpOutcome::Closed => {
                        handle.set_state(ConnectionState::Disconnected);
                        None
                    }
                    PumpOutcome::Failed(e) => Some(e),
                }
            }
            Ok(Err(e)) => Some(e),
            Err(_) => Some(ConnectionError::Timeout(timeout.as_millis() as u64)),
        };

        if let Some(e) = failure {
            tracing::warn!(
                "Telemetry connection to {} failed (attempt {}): {}",
                handle.url(),
                backoff.attempt() + 1,
                e
            );
            handle.set_state(ConnectionState::Error(e.to_string()));
        }

        let delay = backoff.next_delay();
        tracing::debug!("Reconnecting to {} in {:?}", handle.url(), delay);
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    handle.set_state(ConnectionState::Disconnected);
}

async fn pump(
    handle: &ConnectionHandle,
    feed: &mut dyn TelemetryFeed,
    cancel: &CancellationToken,
) -> PumpOutcome {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return PumpOutcome::Cancelled,
            next = feed.next_event() => next,
        };

        match next {
            Some(Ok(event)) => handle.dispatch(event),
            Some(Err(e)) => return PumpOutcome::Failed(e),
            None => return PumpOutcome::Closed,
        }
    }
}
