// Transport trait for the inbound telemetry feed
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// One event frame from the feed: the event name is the machine id.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedEvent {
    pub event: String,
    pub payload: Value,
}

impl FeedEvent {
    pub fn new(event: impl Into<String>, payload: Value) -> Self {
        Self {
            event: event.into(),
            payload,
        }
    }
}

/// Why a connection attempt or an established connection failed.
/// The `Display` text is what operators see as the connection reason.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConnectionError {
    #[error("connect timed out after {0} ms")]
    Timeout(u64),
    #[error("connection refused: {0}")]
    Refused(String),
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("transport failure: {0}")]
    Transport(String),
}

#[async_trait]
pub trait TelemetryTransport: Send + Sync {
    /// Open one multiplexed connection to the telemetry server at `url`.
    async fn connect(&self, url: &str) -> Result<Box<dyn TelemetryFeed>, ConnectionError>;
}

#[async_trait]
pub trait TelemetryFeed: Send {
    /// Next event frame. `None` once the server closed the connection cleanly.
    async fn next_event(&mut self) -> Option<Result<FeedEvent, ConnectionError>>;

    /// Close the connection; errors during close are ignored.
    async fn close(&mut self);
}
