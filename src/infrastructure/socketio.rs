// Socket.IO v5 / Engine.IO v4 text packet codec
//
// Only the subset a subscribing client needs: the engine handshake,
// heartbeats, namespace connect/disconnect and event packets. Binary
// attachments are reported but not decoded.
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use url::Url;

pub const PONG: &str = "3";

#[derive(Debug, Error, PartialEq)]
pub enum WireError {
    #[error("empty packet")]
    Empty,
    #[error("unknown engine packet type {0:?}")]
    UnknownEngineType(char),
    #[error("unknown socket packet type {0:?}")]
    UnknownSocketType(char),
    #[error("malformed event packet: {0}")]
    MalformedEvent(String),
    #[error("malformed handshake: {0}")]
    MalformedHandshake(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenHandshake {
    pub sid: String,
    #[serde(default)]
    pub ping_interval: u64,
    #[serde(default)]
    pub ping_timeout: u64,
}

/// Engine.IO packet
#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(OpenHandshake),
    Close,
    Ping(String),
    Pong(String),
    Message(SocketPacket),
    Upgrade,
    Noop,
}

/// Socket.IO packet carried inside an Engine.IO message
#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect {
        namespace: String,
        payload: Option<Value>,
    },
    Disconnect {
        namespace: String,
    },
    Event {
        namespace: String,
        event: String,
        payload: Value,
    },
    ConnectError {
        namespace: String,
        payload: Value,
    },
    /// Acks and binary packets; not used by this client
    Unsupported(char),
}

pub fn decode(text: &str) -> Result<EnginePacket, WireError> {
    let mut chars = text.chars();
    let kind = chars.next().ok_or(WireError::Empty)?;
    let rest = chars.as_str();

    match kind {
        '0' => serde_json::from_str(rest)
            .map(EnginePacket::Open)
            .map_err(|e| WireError::MalformedHandshake(e.to_string())),
        '1' => Ok(EnginePacket::Close),
        '2' => Ok(EnginePacket::Ping(rest.to_string())),
        '3' => Ok(EnginePacket::Pong(rest.to_string())),
        '4' => decode_socket(rest).map(EnginePacket::Message),
        '5' => Ok(EnginePacket::Upgrade),
        '6' => Ok(EnginePacket::Noop),
        other => Err(WireError::UnknownEngineType(other)),
    }
}

fn decode_socket(text: &str) -> Result<SocketPacket, WireError> {
    let mut chars = text.chars();
    let kind = chars.next().ok_or(WireError::Empty)?;
    let (namespace, body) = split_namespace(chars.as_str());

    match kind {
        '0' => {
            let payload = if body.is_empty() {
                None
            } else {
                serde_json::from_str(body).ok()
            };
            Ok(SocketPacket::Connect { namespace, payload })
        }
        '1' => Ok(SocketPacket::Disconnect { namespace }),
        '2' => decode_event(namespace, body),
        '4' => Ok(SocketPacket::ConnectError {
            namespace,
            payload: serde_json::from_str(body).unwrap_or(Value::Null),
        }),
        '3' | '5' | '6' => Ok(SocketPacket::Unsupported(kind)),
        other => Err(WireError::UnknownSocketType(other)),
    }
}

/// `/admin,rest` -> ("/admin", "rest"); anything else is the default namespace.
fn split_namespace(text: &str) -> (String, &str) {
    if text.starts_with('/') {
        match text.find(',') {
            Some(idx) => (text[..idx].to_string(), &text[idx + 1..]),
            None => (text.to_string(), ""),
        }
    } else {
        ("/".to_string(), text)
    }
}

fn decode_event(namespace: String, body: &str) -> Result<SocketPacket, WireError> {
    // An optional ack id precedes the JSON array
    let json = body.trim_start_matches(|c: char| c.is_ascii_digit());
    let items: Vec<Value> =
        serde_json::from_str(json).map_err(|e| WireError::MalformedEvent(e.to_string()))?;

    let mut items = items.into_iter();
    let event = match items.next() {
        Some(Value::String(name)) => name,
        Some(other) => {
            return Err(WireError::MalformedEvent(format!(
                "event name is not a string: {}",
                other
            )));
        }
        None => return Err(WireError::MalformedEvent("empty event array".to_string())),
    };

    Ok(SocketPacket::Event {
        namespace,
        event,
        payload: items.next().unwrap_or(Value::Null),
    })
}

/// Namespace connect request (`40` for the default namespace).
pub fn encode_connect(namespace: &str) -> String {
    if namespace.is_empty() || namespace == "/" {
        "40".to_string()
    } else {
        format!("40{},", namespace)
    }
}

/// Turn a configured server address into the Engine.IO WebSocket endpoint.
///
/// `http://host:3001` -> `ws://host:3001/socket.io/?EIO=4&transport=websocket`
pub fn endpoint_url(server: &str) -> anyhow::Result<Url> {
    let mut url = Url::parse(server)?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => anyhow::bail!("unsupported telemetry server scheme: {}", other),
    };
    url.set_scheme(scheme)
        .map_err(|_| anyhow::anyhow!("cannot switch {} to {}", server, scheme))?;

    if url.path().is_empty() || url.path() == "/" {
        url.set_path("/socket.io/");
    }
    url.query_pairs_mut()
        .append_pair("EIO", "4")
        .append_pair("transport", "websocket");

    Ok(url)
}
