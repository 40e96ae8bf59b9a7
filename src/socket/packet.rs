//! Engine.IO v4 / Socket.IO v5 text packet codec.
//!
//! Engine.IO frames carry a one-digit type prefix. Type `4` (message) wraps a
//! Socket.IO packet of the form `<type>[<nsp>,][<ack id>][<json>]`.
//! Binary attachments are not used by either namespace and are rejected.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    #[error("empty packet")]
    Empty,

    #[error("unknown {layer} packet type {kind:?}")]
    UnknownType { layer: &'static str, kind: char },

    #[error("invalid JSON in packet: {0}")]
    InvalidJson(String),

    #[error("malformed packet: {0}")]
    Malformed(&'static str),

    #[error("binary packets are not supported")]
    Binary,
}

/// Payload of the Engine.IO `open` packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    pub ping_interval: u64,
    pub ping_timeout: u64,
    #[serde(default)]
    pub max_payload: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(Handshake),
    Close,
    Ping(String),
    Pong(String),
    Message(String),
    Upgrade,
    Noop,
}

impl EnginePacket {
    pub fn decode(frame: &str) -> Result<Self, PacketError> {
        let mut chars = frame.chars();
        let kind = chars.next().ok_or(PacketError::Empty)?;
        let rest = chars.as_str();
        match kind {
            '0' => serde_json::from_str(rest)
                .map(EnginePacket::Open)
                .map_err(|e| PacketError::InvalidJson(e.to_string())),
            '1' => Ok(EnginePacket::Close),
            '2' => Ok(EnginePacket::Ping(rest.to_string())),
            '3' => Ok(EnginePacket::Pong(rest.to_string())),
            '4' => Ok(EnginePacket::Message(rest.to_string())),
            '5' => Ok(EnginePacket::Upgrade),
            '6' => Ok(EnginePacket::Noop),
            'b' => Err(PacketError::Binary),
            other => Err(PacketError::UnknownType {
                layer: "engine.io",
                kind: other,
            }),
        }
    }

    pub fn encode(&self) -> String {
        match self {
            EnginePacket::Open(handshake) => format!(
                "0{}",
                serde_json::to_string(handshake).unwrap_or_else(|_| "{}".to_string())
            ),
            EnginePacket::Close => "1".to_string(),
            EnginePacket::Ping(data) => format!("2{}", data),
            EnginePacket::Pong(data) => format!("3{}", data),
            EnginePacket::Message(data) => format!("4{}", data),
            EnginePacket::Upgrade => "5".to_string(),
            EnginePacket::Noop => "6".to_string(),
        }
    }
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
        payload: Value,
    },
    Ack {
        namespace: String,
        id: u64,
        data: Value,
    },
    ConnectError {
        namespace: String,
        message: String,
    },
}

impl SocketPacket {
    pub fn namespace(&self) -> &str {
        match self {
            SocketPacket::Connect { namespace, .. }
            | SocketPacket::Disconnect { namespace }
            | SocketPacket::Event { namespace, .. }
            | SocketPacket::Ack { namespace, .. }
            | SocketPacket::ConnectError { namespace, .. } => namespace,
        }
    }

    /// Decode the body of an Engine.IO message packet.
    pub fn decode(body: &str) -> Result<Self, PacketError> {
        let mut chars = body.chars();
        let kind = chars.next().ok_or(PacketError::Empty)?;
        let mut rest = chars.as_str();

        if matches!(kind, '5' | '6') {
            return Err(PacketError::Binary);
        }

        let namespace = if rest.starts_with('/') {
            match rest.find(',') {
                Some(idx) => {
                    let ns = &rest[..idx];
                    rest = &rest[idx + 1..];
                    ns.to_string()
                }
                None => {
                    let ns = rest.to_string();
                    rest = "";
                    ns
                }
            }
        } else {
            "/".to_string()
        };

        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        let id = if digits > 0 {
            let parsed = rest[..digits]
                .parse::<u64>()
                .map_err(|_| PacketError::Malformed("ack id out of range"))?;
            rest = &rest[digits..];
            Some(parsed)
        } else {
            None
        };

        let data = if rest.is_empty() {
            None
        } else {
            Some(
                serde_json::from_str::<Value>(rest)
                    .map_err(|e| PacketError::InvalidJson(e.to_string()))?,
            )
        };

        match kind {
            '0' => Ok(SocketPacket::Connect { namespace, data }),
            '1' => Ok(SocketPacket::Disconnect { namespace }),
            '2' => {
                let mut args = match data {
                    Some(Value::Array(args)) => args.into_iter(),
                    _ => return Err(PacketError::Malformed("event data must be an array")),
                };
                let name = match args.next() {
                    Some(Value::String(name)) => name,
                    _ => return Err(PacketError::Malformed("event name must be a string")),
                };
                Ok(SocketPacket::Event {
                    namespace,
                    id,
                    name,
                    payload: args.next().unwrap_or(Value::Null),
                })
            }
            '3' => Ok(SocketPacket::Ack {
                namespace,
                id: id.ok_or(PacketError::Malformed("ack without id"))?,
                data: data.unwrap_or(Value::Null),
            }),
            '4' => {
                let message = match &data {
                    Some(Value::Object(obj)) => obj
                        .get("message")
                        .and_then(Value::as_str)
                        .map(String::from),
                    Some(Value::String(s)) => Some(s.clone()),
                    _ => None,
                };
                Ok(SocketPacket::ConnectError {
                    namespace,
                    message: message.unwrap_or_default(),
                })
            }
            other => Err(PacketError::UnknownType {
                layer: "socket.io",
                kind: other,
            }),
        }
    }

    /// Encode as a full Engine.IO frame, ready for the wire.
    pub fn encode(&self) -> String {
        let mut out = String::from("4");
        let (kind, namespace) = match self {
            SocketPacket::Connect { namespace, .. } => ('0', namespace),
            SocketPacket::Disconnect { namespace } => ('1', namespace),
            SocketPacket::Event { namespace, .. } => ('2', namespace),
            SocketPacket::Ack { namespace, .. } => ('3', namespace),
            SocketPacket::ConnectError { namespace, .. } => ('4', namespace),
        };
        out.push(kind);
        if namespace != "/" {
            out.push_str(namespace);
            out.push(',');
        }
        match self {
            SocketPacket::Connect { data, .. } => {
                if let Some(data) = data {
                    out.push_str(&data.to_string());
                }
            }
            SocketPacket::Disconnect { .. } => {}
            SocketPacket::Event {
                id, name, payload, ..
            } => {
                if let Some(id) = id {
                    out.push_str(&id.to_string());
                }
                let args = if payload.is_null() {
                    Value::Array(vec![Value::String(name.clone())])
                } else {
                    Value::Array(vec![Value::String(name.clone()), payload.clone()])
                };
                out.push_str(&args.to_string());
            }
            SocketPacket::Ack { id, data, .. } => {
                out.push_str(&id.to_string());
                out.push_str(&Value::Array(vec![data.clone()]).to_string());
            }
            SocketPacket::ConnectError { message, .. } => {
                out.push_str(&serde_json::json!({ "message": message }).to_string());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_engine_open() {
        let packet = EnginePacket::decode(
            r#"0{"sid":"abc","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#,
        )
        .unwrap();
        match packet {
            EnginePacket::Open(h) => {
                assert_eq!(h.sid, "abc");
                assert_eq!(h.ping_interval, 25000);
                assert_eq!(h.ping_timeout, 20000);
            }
            other => panic!("unexpected packet: {:?}", other),
        }
    }

    #[test]
    fn test_engine_ping_pong() {
        assert_eq!(EnginePacket::decode("2").unwrap(), EnginePacket::Ping(String::new()));
        assert_eq!(EnginePacket::Pong(String::new()).encode(), "3");
        assert_eq!(
            EnginePacket::decode("2probe").unwrap(),
            EnginePacket::Ping("probe".into())
        );
        assert_eq!(EnginePacket::decode(""), Err(PacketError::Empty));
        assert!(matches!(
            EnginePacket::decode("9"),
            Err(PacketError::UnknownType { .. })
        ));
    }

    #[test]
    fn test_connect_encoding() {
        let packet = SocketPacket::Connect {
            namespace: "/rides".into(),
            data: Some(json!({"token": "abc"})),
        };
        assert_eq!(packet.encode(), r#"40/rides,{"token":"abc"}"#);
    }

    #[test]
    fn test_event_encoding() {
        let packet = SocketPacket::Event {
            namespace: "/planner".into(),
            id: None,
            name: "planner:subscribe".into(),
            payload: json!({"session_id": "s1"}),
        };
        assert_eq!(
            packet.encode(),
            r#"42/planner,["planner:subscribe",{"session_id":"s1"}]"#
        );
    }

    #[test]
    fn test_decode_event_with_ack_id() {
        let packet =
            SocketPacket::decode(r#"2/rides,17["ride:status_changed",{"ride":{"id":"r1"}}]"#)
                .unwrap();
        assert_eq!(
            packet,
            SocketPacket::Event {
                namespace: "/rides".into(),
                id: Some(17),
                name: "ride:status_changed".into(),
                payload: json!({"ride": {"id": "r1"}}),
            }
        );
    }

    #[test]
    fn test_decode_default_namespace_and_bare_event() {
        let packet = SocketPacket::decode(r#"2["hello"]"#).unwrap();
        assert_eq!(packet.namespace(), "/");
        match packet {
            SocketPacket::Event { payload, .. } => assert!(payload.is_null()),
            other => panic!("unexpected packet: {:?}", other),
        }
    }

    #[test]
    fn test_decode_connect_ack_and_error() {
        let ack = SocketPacket::decode(r#"0/rides,{"sid":"xyz"}"#).unwrap();
        assert!(matches!(ack, SocketPacket::Connect { ref namespace, .. } if namespace == "/rides"));

        let err = SocketPacket::decode(r#"4/rides,{"message":"Not authorized"}"#).unwrap();
        assert_eq!(
            err,
            SocketPacket::ConnectError {
                namespace: "/rides".into(),
                message: "Not authorized".into(),
            }
        );

        let disconnect = SocketPacket::decode("1/planner,").unwrap();
        assert_eq!(
            disconnect,
            SocketPacket::Disconnect {
                namespace: "/planner".into()
            }
        );
    }

    #[test]
    fn test_decode_rejects_bad_input() {
        assert!(matches!(
            SocketPacket::decode(r#"2/rides,{"not":"array"}"#),
            Err(PacketError::Malformed(_))
        ));
        assert!(matches!(
            SocketPacket::decode(r#"2/rides,[1]"#),
            Err(PacketError::Malformed(_))
        ));
        assert!(matches!(
            SocketPacket::decode(r#"2/rides,["x",{"#),
            Err(PacketError::InvalidJson(_))
        ));
        assert_eq!(
            SocketPacket::decode(r#"51-/rides,["x",{"_placeholder":true,"num":0}]"#),
            Err(PacketError::Binary)
        );
    }
}
