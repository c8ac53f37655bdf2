//! Engine.IO v4 / Socket.IO v4 text framing, WebSocket transport only.
//!
//! Every WebSocket text frame is one Engine.IO packet. The first character is the packet
//! type; message packets (`4`) carry a Socket.IO packet:
//!
//! ```text
//! 0{"sid":"…","pingInterval":25000,"pingTimeout":20000}   open
//! 2 / 3                                                    ping / pong
//! 40                                                       connect to "/"
//! 42["sensor-data",{"temperature":23.1,…}]                 event
//! 42/admin,7["name",…]                                     event on a namespace with ack id
//! 44{"message":"not authorized"}                           connect error
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Engine.IO protocol revision requested in the URL.
pub const ENGINE_IO_VERSION: u8 = 4;

/// Path the Socket.IO server is mounted on.
pub const SOCKET_IO_PATH: &str = "/socket.io/";

pub const DEFAULT_NAMESPACE: &str = "/";

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ProtocolError {
    #[error("Empty frame")]
    Empty,

    #[error("Unknown Engine.IO packet type: {0:?}")]
    UnknownPacketType(char),

    #[error("Unknown Socket.IO packet type: {0:?}")]
    UnknownMessageType(char),

    #[error("Invalid handshake: {0}")]
    Handshake(String),

    #[error("Invalid payload: {0}")]
    Payload(String),

    #[error("Unsupported URL scheme: {0}")]
    Scheme(String),
}

/// Open packet payload sent by the server right after the WebSocket upgrade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    /// Milliseconds between server pings
    pub ping_interval: u64,
    /// Milliseconds the server waits for a pong
    pub ping_timeout: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_payload: Option<u64>,
}

impl Handshake {
    /// How long the connection may stay silent before it is considered dead.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_interval.saturating_add(self.ping_timeout))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Open(Handshake),
    Close,
    Ping,
    Pong,
    Message(SocketPacket),
    Upgrade,
    Noop,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect {
        namespace: String,
        data: Option<Value>,
    },
    Disconnect {
        namespace: String,
    },
    Event {
        namespace: String,
        id: Option<u64>,
        name: String,
        args: Vec<Value>,
    },
    Ack {
        namespace: String,
        id: u64,
        args: Vec<Value>,
    },
    ConnectError {
        namespace: String,
        message: String,
    },
}

impl SocketPacket {
    pub fn connect() -> Self {
        SocketPacket::Connect {
            namespace: DEFAULT_NAMESPACE.to_string(),
            data: None,
        }
    }

    pub fn disconnect() -> Self {
        SocketPacket::Disconnect {
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }

    /// Event on the default namespace carrying a single argument.
    pub fn event(name: &str, data: Value) -> Self {
        SocketPacket::Event {
            namespace: DEFAULT_NAMESPACE.to_string(),
            id: None,
            name: name.to_string(),
            args: vec![data],
        }
    }
}

impl Packet {
    pub fn encode(&self) -> String {
        match self {
            Packet::Open(handshake) => {
                // Handshake only holds strings and integers, serializing cannot fail.
                let body = serde_json::to_string(handshake).unwrap_or_default();
                format!("0{}", body)
            }
            Packet::Close => "1".to_string(),
            Packet::Ping => "2".to_string(),
            Packet::Pong => "3".to_string(),
            Packet::Message(packet) => format!("4{}", encode_socket_packet(packet)),
            Packet::Upgrade => "5".to_string(),
            Packet::Noop => "6".to_string(),
        }
    }

    pub fn decode(frame: &str) -> Result<Packet, ProtocolError> {
        let mut chars = frame.chars();
        let kind = chars.next().ok_or(ProtocolError::Empty)?;
        let rest = chars.as_str();

        match kind {
            '0' => serde_json::from_str(rest)
                .map(Packet::Open)
                .map_err(|e| ProtocolError::Handshake(e.to_string())),
            '1' => Ok(Packet::Close),
            // Probe pings carry a payload ("2probe"), it is irrelevant here.
            '2' => Ok(Packet::Ping),
            '3' => Ok(Packet::Pong),
            '4' => decode_socket_packet(rest).map(Packet::Message),
            '5' => Ok(Packet::Upgrade),
            '6' => Ok(Packet::Noop),
            other => Err(ProtocolError::UnknownPacketType(other)),
        }
    }
}

fn encode_socket_packet(packet: &SocketPacket) -> String {
    let mut out = String::new();
    match packet {
        SocketPacket::Connect { namespace, data } => {
            out.push('0');
            push_namespace(&mut out, namespace);
            if let Some(data) = data {
                out.push_str(&data.to_string());
            }
        }
        SocketPacket::Disconnect { namespace } => {
            out.push('1');
            push_namespace(&mut out, namespace);
        }
        SocketPacket::Event {
            namespace,
            id,
            name,
            args,
        } => {
            out.push('2');
            push_namespace(&mut out, namespace);
            if let Some(id) = id {
                out.push_str(&id.to_string());
            }
            let mut array = Vec::with_capacity(args.len() + 1);
            array.push(Value::String(name.clone()));
            array.extend(args.iter().cloned());
            out.push_str(&Value::Array(array).to_string());
        }
        SocketPacket::Ack {
            namespace,
            id,
            args,
        } => {
            out.push('3');
            push_namespace(&mut out, namespace);
            out.push_str(&id.to_string());
            out.push_str(&Value::Array(args.clone()).to_string());
        }
        SocketPacket::ConnectError { namespace, message } => {
            out.push('4');
            push_namespace(&mut out, namespace);
            out.push_str(&serde_json::json!({ "message": message }).to_string());
        }
    }
    out
}

/// The default namespace is implicit; any other one is written as `/name,`.
fn push_namespace(out: &mut String, namespace: &str) {
    if namespace != DEFAULT_NAMESPACE {
        out.push_str(namespace);
        out.push(',');
    }
}

fn decode_socket_packet(body: &str) -> Result<SocketPacket, ProtocolError> {
    let mut chars = body.chars();
    let kind = chars.next().ok_or(ProtocolError::Empty)?;
    let rest = chars.as_str();

    let (namespace, rest) = split_namespace(rest);
    let (id, payload) = split_ack_id(rest);

    match kind {
        '0' => Ok(SocketPacket::Connect {
            namespace,
            data: parse_optional(payload)?,
        }),
        '1' => Ok(SocketPacket::Disconnect { namespace }),
        '2' => {
            let mut args = parse_array(payload)?;
            if args.is_empty() {
                return Err(ProtocolError::Payload("event without a name".to_string()));
            }
            let name = match args.remove(0) {
                Value::String(name) => name,
                other => {
                    return Err(ProtocolError::Payload(format!(
                        "event name is not a string: {}",
                        other
                    )))
                }
            };
            Ok(SocketPacket::Event {
                namespace,
                id,
                name,
                args,
            })
        }
        '3' => {
            let id = id.ok_or_else(|| ProtocolError::Payload("ack without an id".to_string()))?;
            Ok(SocketPacket::Ack {
                namespace,
                id,
                args: parse_array(payload)?,
            })
        }
        '4' => {
            let message = match parse_optional(payload)? {
                Some(Value::Object(map)) => map
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("connection refused")
                    .to_string(),
                Some(Value::String(message)) => message,
                _ => "connection refused".to_string(),
            };
            Ok(SocketPacket::ConnectError { namespace, message })
        }
        other => Err(ProtocolError::UnknownMessageType(other)),
    }
}

fn split_namespace(rest: &str) -> (String, &str) {
    if rest.starts_with('/') {
        match rest.split_once(',') {
            Some((namespace, tail)) => (namespace.to_string(), tail),
            None => (rest.to_string(), ""),
        }
    } else {
        (DEFAULT_NAMESPACE.to_string(), rest)
    }
}

fn split_ack_id(rest: &str) -> (Option<u64>, &str) {
    let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return (None, rest);
    }
    (rest[..digits].parse().ok(), &rest[digits..])
}

fn parse_optional(payload: &str) -> Result<Option<Value>, ProtocolError> {
    if payload.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(payload)
        .map(Some)
        .map_err(|e| ProtocolError::Payload(e.to_string()))
}

fn parse_array(payload: &str) -> Result<Vec<Value>, ProtocolError> {
    match parse_optional(payload)? {
        Some(Value::Array(items)) => Ok(items),
        Some(other) => Err(ProtocolError::Payload(format!(
            "expected an array, got {}",
            other
        ))),
        None => Err(ProtocolError::Payload("missing payload".to_string())),
    }
}

/// Builds the WebSocket URL of the Socket.IO endpoint from the server's base URL.
pub fn socket_url(base_url: &str) -> Result<reqwest::Url, ProtocolError> {
    let mut url =
        reqwest::Url::parse(base_url).map_err(|e| ProtocolError::Scheme(e.to_string()))?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(ProtocolError::Scheme(other.to_string())),
    };
    url.set_scheme(scheme)
        .map_err(|_| ProtocolError::Scheme(scheme.to_string()))?;

    let path = format!("{}{}", url.path().trim_end_matches('/'), SOCKET_IO_PATH);
    url.set_path(&path);
    url.set_query(Some(&format!(
        "EIO={}&transport=websocket",
        ENGINE_IO_VERSION
    )));

    Ok(url)
}
