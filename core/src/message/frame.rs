// Frame codec — named events over a WebSocket text channel
//
// Every frame is a JSON array `[eventName, payload]`.

use super::types::Message;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

const EVENT_WHOAMI: &str = "whoami";
const EVENT_DISCOVER: &str = "discover";
const EVENT_SEND: &str = "send";
const EVENT_RECEIVE: &str = "receive";

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Malformed frame: {0}")]
    Malformed(String),
    #[error("Unknown event: {0}")]
    UnknownEvent(String),
}

/// What a peer says about itself when a link opens
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Whoami {
    /// A relay, listening on `port`; `address` is its own `host:port` if it
    /// announced one
    Server { port: u16, address: Option<String> },
    /// A client owning `public_key` (base58)
    Client { public_key: String },
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WhoamiWire {
    is_server: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    public_key: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct DiscoverWire {
    list: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Whoami(Whoami),
    /// Newline-separated node list
    Discover { list: String },
    /// Message travelling towards its residence relay
    Send(Message),
    /// Message handed to its recipient
    Receive(Message),
}

impl Frame {
    pub fn event_name(&self) -> &'static str {
        match self {
            Frame::Whoami(_) => EVENT_WHOAMI,
            Frame::Discover { .. } => EVENT_DISCOVER,
            Frame::Send(_) => EVENT_SEND,
            Frame::Receive(_) => EVENT_RECEIVE,
        }
    }

    pub fn encode(&self) -> String {
        let payload = match self {
            Frame::Whoami(Whoami::Server { port, address }) => to_value(&WhoamiWire {
                is_server: true,
                port: Some(*port),
                address: address.clone(),
                public_key: None,
            }),
            Frame::Whoami(Whoami::Client { public_key }) => to_value(&WhoamiWire {
                is_server: false,
                port: None,
                address: None,
                public_key: Some(public_key.clone()),
            }),
            Frame::Discover { list } => to_value(&DiscoverWire { list: list.clone() }),
            Frame::Send(msg) | Frame::Receive(msg) => to_value(msg),
        };

        Value::Array(vec![Value::String(self.event_name().to_string()), payload]).to_string()
    }

    pub fn decode(text: &str) -> Result<Frame, FrameError> {
        let (event, payload): (String, Value) =
            serde_json::from_str(text).map_err(|e| FrameError::Malformed(e.to_string()))?;

        match event.as_str() {
            EVENT_WHOAMI => {
                let wire: WhoamiWire = from_value(payload)?;
                if wire.is_server {
                    let port = wire
                        .port
                        .ok_or_else(|| FrameError::Malformed("server whoami without port".into()))?;
                    Ok(Frame::Whoami(Whoami::Server {
                        port,
                        address: wire.address,
                    }))
                } else {
                    let public_key = wire.public_key.ok_or_else(|| {
                        FrameError::Malformed("client whoami without publicKey".into())
                    })?;
                    Ok(Frame::Whoami(Whoami::Client { public_key }))
                }
            }
            EVENT_DISCOVER => {
                let wire: DiscoverWire = from_value(payload)?;
                Ok(Frame::Discover { list: wire.list })
            }
            EVENT_SEND => Ok(Frame::Send(from_value(payload)?)),
            EVENT_RECEIVE => Ok(Frame::Receive(from_value(payload)?)),
            other => Err(FrameError::UnknownEvent(other.to_string())),
        }
    }
}

fn to_value<T: Serialize>(value: &T) -> Value {
    // Plain structs with string keys always serialize
    serde_json::to_value(value).unwrap_or(Value::Null)
}

fn from_value<T: for<'de> Deserialize<'de>>(payload: Value) -> Result<T, FrameError> {
    serde_json::from_value(payload).map_err(|e| FrameError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_whoami_wire_shape() {
        let frame = Frame::Whoami(Whoami::Server {
            port: 3000,
            address: Some("localhost:3000".into()),
        });
        let json: Value = serde_json::from_str(&frame.encode()).unwrap();
        assert_eq!(json[0], "whoami");
        assert_eq!(json[1]["isServer"], true);
        assert_eq!(json[1]["port"], 3000);
        assert_eq!(json[1]["address"], "localhost:3000");
        assert!(json[1].get("publicKey").is_none());
    }

    #[test]
    fn test_decode_client_whoami() {
        let frame = Frame::decode(r#"["whoami",{"isServer":false,"publicKey":"abc"}]"#).unwrap();
        assert_eq!(
            frame,
            Frame::Whoami(Whoami::Client {
                public_key: "abc".into()
            })
        );
    }

    #[test]
    fn test_decode_server_whoami_without_address() {
        let frame = Frame::decode(r#"["whoami",{"isServer":true,"port":3001}]"#).unwrap();
        assert_eq!(
            frame,
            Frame::Whoami(Whoami::Server {
                port: 3001,
                address: None
            })
        );
    }

    #[test]
    fn test_send_frame_carries_message() {
        let msg = Message::new("alice", "bob", "sealed".into(), false);
        let decoded = Frame::decode(&Frame::Send(msg.clone()).encode()).unwrap();
        assert_eq!(decoded, Frame::Send(msg));
    }

    #[test]
    fn test_discover_frame() {
        let decoded = Frame::decode(r#"["discover",{"list":"a:1\nb:2"}]"#).unwrap();
        assert_eq!(
            decoded,
            Frame::Discover {
                list: "a:1\nb:2".into()
            }
        );
    }

    #[test]
    fn test_malformed_frames() {
        assert!(matches!(Frame::decode("not json"), Err(FrameError::Malformed(_))));
        assert!(matches!(Frame::decode(r#"{"event":"send"}"#), Err(FrameError::Malformed(_))));
        assert!(matches!(
            Frame::decode(r#"["whoami",{"isServer":true}]"#),
            Err(FrameError::Malformed(_))
        ));
        assert!(matches!(
            Frame::decode(r#"["send",{"id":"1"}]"#),
            Err(FrameError::Malformed(_))
        ));
    }

    #[test]
    fn test_unknown_event() {
        assert!(matches!(
            Frame::decode(r#"["typing",{}]"#),
            Err(FrameError::UnknownEvent(name)) if name == "typing"
        ));
    }
}
