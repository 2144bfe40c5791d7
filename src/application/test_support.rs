// In-memory transport double for connection and session tests
use crate::application::connection_manager::ConnectionHandle;
use crate::application::telemetry_transport::{
    ConnectionError, FeedEvent, TelemetryFeed, TelemetryTransport,
};
use crate::domain::connection::ConnectionState;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

type FeedItem = Result<FeedEvent, ConnectionError>;

/// Transport that plays back a script of connect outcomes. Once the script
/// runs out, connect attempts hang until the caller's timeout fires.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<ScriptedFeed, ConnectionError>>>,
    attempts: AtomicUsize,
}

impl ScriptedTransport {
    /// Queue a successful connect; the returned control drives that feed.
    pub fn accept(&self) -> FeedControl {
        self.queue_feed(false)
    }

    /// Like `accept`, but the feed's close handshake never completes.
    pub fn accept_stalled_close(&self) -> FeedControl {
        self.queue_feed(true)
    }

    fn queue_feed(&self, stall_close: bool) -> FeedControl {
        let (tx, rx) = mpsc::unbounded_channel();
        self.script
            .lock()
            .unwrap()
            .push_back(Ok(ScriptedFeed { rx, stall_close }));
        FeedControl { tx }
    }

    pub fn refuse(&self, reason: &str) {
        self.script
            .lock()
            .unwrap()
            .push_back(Err(ConnectionError::Refused(reason.to_string())));
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TelemetryTransport for ScriptedTransport {
    async fn connect(&self, _url: &str) -> Result<Box<dyn TelemetryFeed>, ConnectionError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Ok(feed)) => Ok(Box::new(feed)),
            Some(Err(e)) => Err(e),
            None => futures::future::pending().await,
        }
    }
}

pub struct ScriptedFeed {
    rx: mpsc::UnboundedReceiver<FeedItem>,
    stall_close: bool,
}

#[async_trait]
impl TelemetryFeed for ScriptedFeed {
    async fn next_event(&mut self) -> Option<FeedItem> {
        self.rx.recv().await
    }

    async fn close(&mut self) {
        if self.stall_close {
            futures::future::pending::<()>().await;
        }
        self.rx.close();
    }
}

/// Server side of a scripted feed. Dropping it closes the feed cleanly.
pub struct FeedControl {
    tx: mpsc::UnboundedSender<FeedItem>,
}

impl FeedControl {
    pub fn emit(&self, machine_id: &str, payload: Value) {
        let _ = self.tx.send(Ok(FeedEvent::new(machine_id, payload)));
    }

    pub fn fail(&self, reason: &str) {
        let _ = self
            .tx
            .send(Err(ConnectionError::Transport(reason.to_string())));
    }
}

/// Wait (on the paused test clock) until the connection state matches.
pub async fn wait_for_state<F>(handle: &ConnectionHandle, predicate: F)
where
    F: Fn(&ConnectionState) -> bool,
{
    let mut rx = handle.watch_state();
    tokio::time::timeout(Duration::from_secs(120), rx.wait_for(|s| predicate(s)))
        .await
        .expect("timed out waiting for connection state")
        .expect("connection state channel closed");
}
