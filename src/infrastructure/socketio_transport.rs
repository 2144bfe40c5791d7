// Socket.IO over WebSocket implementation of the telemetry transport
use crate::application::telemetry_transport::{
    ConnectionError, FeedEvent, TelemetryFeed, TelemetryTransport,
};
use crate::infrastructure::socketio::{self, EnginePacket, SocketPacket};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct SocketIoTransport {
    namespace: String,
}

impl SocketIoTransport {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }
}

impl Default for SocketIoTransport {
    fn default() -> Self {
        Self::new("/")
    }
}

#[async_trait]
impl TelemetryTransport for SocketIoTransport {
    async fn connect(&self, url: &str) -> Result<Box<dyn TelemetryFeed>, ConnectionError> {
        let endpoint =
            socketio::endpoint_url(url).map_err(|e| ConnectionError::Refused(e.to_string()))?;

        tracing::debug!("Opening telemetry socket {}", endpoint);
        let (mut ws, _) = connect_async(endpoint.as_str())
            .await
            .map_err(|e| ConnectionError::Refused(e.to_string()))?;

        // Engine handshake first, then join the namespace
        let handshake = loop {
            match read_packet(&mut ws).await? {
                Some(EnginePacket::Open(handshake)) => break handshake,
                Some(other) => tracing::debug!("Ignoring pre-handshake packet {:?}", other),
                None => {
                    return Err(ConnectionError::Handshake(
                        "closed before engine handshake".to_string(),
                    ));
                }
            }
        };

        send_text(&mut ws, socketio::encode_connect(&self.namespace)).await?;

        loop {
            match read_packet(&mut ws).await? {
                Some(EnginePacket::Message(SocketPacket::Connect { namespace, .. }))
                    if namespace == self.namespace =>
                {
                    break;
                }
                Some(EnginePacket::Message(SocketPacket::ConnectError { payload, .. })) => {
                    return Err(ConnectionError::Handshake(payload.to_string()));
                }
                Some(EnginePacket::Ping(data)) => {
                    send_text(&mut ws, format!("{}{}", socketio::PONG, data)).await?;
                }
                Some(EnginePacket::Close) | None => {
                    return Err(ConnectionError::Handshake(
                        "closed before namespace connect".to_string(),
                    ));
                }
                Some(_) => {}
            }
        }

        tracing::info!(
            "Telemetry socket connected (sid={}, namespace={})",
            handshake.sid,
            self.namespace
        );

        // Server pings every interval; silence past interval + timeout means a dead link
        let heartbeat = if handshake.ping_interval > 0 {
            Some(Duration::from_millis(
                handshake.ping_interval + handshake.ping_timeout,
            ))
        } else {
            None
        };

        Ok(Box::new(SocketIoFeed {
            ws,
            namespace: self.namespace.clone(),
            heartbeat,
        }))
    }
}

pub struct SocketIoFeed {
    ws: WsStream,
    namespace: String,
    heartbeat: Option<Duration>,
}

#[async_trait]
impl TelemetryFeed for SocketIoFeed {
    async fn next_event(&mut self) -> Option<Result<FeedEvent, ConnectionError>> {
        loop {
            let packet = match self.heartbeat {
                Some(limit) => match tokio::time::timeout(limit, read_packet(&mut self.ws)).await
                {
                    Ok(packet) => packet,
                    Err(_) => {
                        return Some(Err(ConnectionError::Transport(format!(
                            "no heartbeat within {} ms",
                            limit.as_millis()
                        ))));
                    }
                },
                None => read_packet(&mut self.ws).await,
            };

            match packet {
                Err(e) => return Some(Err(e)),
                Ok(None) | Ok(Some(EnginePacket::Close)) => return None,
                Ok(Some(EnginePacket::Ping(data))) => {
                    if let Err(e) =
                        send_text(&mut self.ws, format!("{}{}", socketio::PONG, data)).await
                    {
                        return Some(Err(e));
                    }
                }
                Ok(Some(EnginePacket::Message(SocketPacket::Event {
                    namespace,
                    event,
                    payload,
                }))) => {
                    if namespace == self.namespace {
                        return Some(Ok(FeedEvent::new(event, payload)));
                    }
                }
                Ok(Some(EnginePacket::Message(SocketPacket::Disconnect { namespace })))
                    if namespace == self.namespace =>
                {
                    tracing::info!("Server disconnected namespace {}", namespace);
                    return None;
                }
                Ok(Some(EnginePacket::Message(SocketPacket::ConnectError { payload, .. }))) => {
                    return Some(Err(ConnectionError::Handshake(payload.to_string())));
                }
                Ok(Some(_)) => {}
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.ws.close(None).await;
    }
}

/// Next Engine.IO packet, skipping non-text frames and undecodable packets.
/// `Ok(None)` when the socket closed.
async fn read_packet(ws: &mut WsStream) -> Result<Option<EnginePacket>, ConnectionError> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => match socketio::decode(&text) {
                Ok(packet) => return Ok(Some(packet)),
                Err(e) => tracing::warn!("Dropping undecodable packet {:?}: {}", text, e),
            },
            Some(Ok(Message::Close(_))) | None => return Ok(None),
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(ConnectionError::Transport(e.to_string())),
        }
    }
}

async fn send_text(ws: &mut WsStream, text: String) -> Result<(), ConnectionError> {
    ws.send(Message::Text(text))
        .await
        .map_err(|e| ConnectionError::Transport(e.to_string()))
}
