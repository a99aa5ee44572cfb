//! SignalR JSON hub protocol types
//!
//! Every record is a JSON object terminated by the ASCII record separator
//! (`0x1E`). A WebSocket text frame may carry several records.

use peerlink_core::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Record terminator
pub const RECORD_SEPARATOR: char = '\u{1e}';

/// Hub protocol negotiated in the handshake
pub const PROTOCOL_NAME: &str = "json";
pub const PROTOCOL_VERSION: u32 = 1;

/// Message type discriminators
pub mod message_types {
    pub const INVOCATION: u8 = 1;
    pub const STREAM_ITEM: u8 = 2;
    pub const COMPLETION: u8 = 3;
    pub const STREAM_INVOCATION: u8 = 4;
    pub const CANCEL_INVOCATION: u8 = 5;
    pub const PING: u8 = 6;
    pub const CLOSE: u8 = 7;
}

/// Handshake request, sent once right after the socket opens
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HandshakeRequest {
    pub protocol: String,
    pub version: u32,
}

/// Handshake response; an empty object on success
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HandshakeResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Decoded hub message
#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
    /// Call `target(arguments...)`; a call without id expects no completion
    Invocation {
        invocation_id: Option<String>,
        target: String,
        arguments: Vec<Value>,
    },
    /// Outcome of a call that carried an invocation id
    Completion {
        invocation_id: String,
        result: Option<Value>,
        error: Option<String>,
    },
    Ping,
    /// Server is closing the connection
    Close {
        error: Option<String>,
        allow_reconnect: bool,
    },
    /// Streaming messages; this client never starts streams
    Unsupported(u8),
}

/// Flat wire form shared by every message type
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    #[serde(rename = "type")]
    message_type: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    invocation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    arguments: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    allow_reconnect: Option<bool>,
}

impl HubMessage {
    /// Invocation of `target` with string arguments
    pub fn invocation(invocation_id: Option<String>, target: &str, arguments: &[&str]) -> Self {
        HubMessage::Invocation {
            invocation_id,
            target: target.to_string(),
            arguments: arguments
                .iter()
                .map(|a| Value::String((*a).to_string()))
                .collect(),
        }
    }

    fn into_wire(self) -> WireMessage {
        match self {
            HubMessage::Invocation {
                invocation_id,
                target,
                arguments,
            } => WireMessage {
                message_type: message_types::INVOCATION,
                invocation_id,
                target: Some(target),
                arguments: Some(arguments),
                ..Default::default()
            },
            HubMessage::Completion {
                invocation_id,
                result,
                error,
            } => WireMessage {
                message_type: message_types::COMPLETION,
                invocation_id: Some(invocation_id),
                result,
                error,
                ..Default::default()
            },
            HubMessage::Ping => WireMessage {
                message_type: message_types::PING,
                ..Default::default()
            },
            HubMessage::Close {
                error,
                allow_reconnect,
            } => WireMessage {
                message_type: message_types::CLOSE,
                error,
                allow_reconnect: Some(allow_reconnect),
                ..Default::default()
            },
            HubMessage::Unsupported(message_type) => WireMessage {
                message_type,
                ..Default::default()
            },
        }
    }

    fn from_wire(wire: WireMessage) -> Result<Self> {
        match wire.message_type {
            message_types::INVOCATION => Ok(HubMessage::Invocation {
                invocation_id: wire.invocation_id,
                target: wire.target.ok_or_else(|| {
                    Error::SerializationError("invocation without target".to_string())
                })?,
                arguments: wire.arguments.unwrap_or_default(),
            }),
            message_types::COMPLETION => Ok(HubMessage::Completion {
                invocation_id: wire.invocation_id.ok_or_else(|| {
                    Error::SerializationError("completion without invocationId".to_string())
                })?,
                result: wire.result,
                error: wire.error,
            }),
            message_types::PING => Ok(HubMessage::Ping),
            message_types::CLOSE => Ok(HubMessage::Close {
                error: wire.error,
                allow_reconnect: wire.allow_reconnect.unwrap_or(false),
            }),
            other => Ok(HubMessage::Unsupported(other)),
        }
    }
}

/// Handshake record for the JSON protocol
pub fn handshake_request() -> Result<String> {
    let request = HandshakeRequest {
        protocol: PROTOCOL_NAME.to_string(),
        version: PROTOCOL_VERSION,
    };
    let mut text =
        serde_json::to_string(&request).map_err(|e| Error::SerializationError(e.to_string()))?;
    text.push(RECORD_SEPARATOR);
    Ok(text)
}

/// Check the server's handshake record
pub fn parse_handshake_response(record: &str) -> Result<()> {
    let response: HandshakeResponse = serde_json::from_str(record).map_err(|e| {
        Error::SignalingUnavailable(format!("Invalid handshake response: {}", e))
    })?;
    match response.error {
        Some(error) => Err(Error::SignalingUnavailable(format!(
            "Handshake rejected: {}",
            error
        ))),
        None => Ok(()),
    }
}

/// Encode one message as a terminated record
pub fn encode(message: HubMessage) -> Result<String> {
    let mut text = serde_json::to_string(&message.into_wire())
        .map_err(|e| Error::SerializationError(e.to_string()))?;
    text.push(RECORD_SEPARATOR);
    Ok(text)
}

/// Decode one record (without its terminator)
pub fn decode(record: &str) -> Result<HubMessage> {
    let wire: WireMessage = serde_json::from_str(record)
        .map_err(|e| Error::SerializationError(format!("Invalid hub message: {}", e)))?;
    HubMessage::from_wire(wire)
}

/// Records carried in one text frame
pub fn split_records(text: &str) -> Vec<String> {
    text.split(RECORD_SEPARATOR)
        .filter(|record| !record.trim().is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_handshake_request_is_terminated() {
        let text = handshake_request().unwrap();
        assert!(text.ends_with(RECORD_SEPARATOR));
        let value: Value = serde_json::from_str(text.trim_end_matches(RECORD_SEPARATOR)).unwrap();
        assert_eq!(value, json!({"protocol": "json", "version": 1}));
    }

    #[test]
    fn test_handshake_response() {
        assert!(parse_handshake_response("{}").is_ok());
        let err = parse_handshake_response(r#"{"error":"Requested protocol 'json' is not available."}"#)
            .unwrap_err();
        assert!(matches!(err, Error::SignalingUnavailable(_)));
        assert!(parse_handshake_response("nope").is_err());
    }

    #[test]
    fn test_invocation_wire_format() {
        let message =
            HubMessage::invocation(Some("3".to_string()), "SendOffer", &["conn-2", "{\"type\":\"offer\"}"]);
        let text = encode(message).unwrap();
        let value: Value = serde_json::from_str(text.trim_end_matches(RECORD_SEPARATOR)).unwrap();
        assert_eq!(
            value,
            json!({
                "type": 1,
                "invocationId": "3",
                "target": "SendOffer",
                "arguments": ["conn-2", "{\"type\":\"offer\"}"]
            })
        );
    }

    #[test]
    fn test_ping_has_only_type() {
        let text = encode(HubMessage::Ping).unwrap();
        assert_eq!(text, format!("{{\"type\":6}}{}", RECORD_SEPARATOR));
    }

    #[test]
    fn test_decode_server_messages() {
        let message = decode(r#"{"type":1,"target":"ReceiveIce","arguments":["conn-1","{}"]}"#).unwrap();
        assert_eq!(
            message,
            HubMessage::Invocation {
                invocation_id: None,
                target: "ReceiveIce".to_string(),
                arguments: vec![json!("conn-1"), json!("{}")],
            }
        );

        let message = decode(r#"{"type":3,"invocationId":"0","result":"conn-7"}"#).unwrap();
        assert_eq!(
            message,
            HubMessage::Completion {
                invocation_id: "0".to_string(),
                result: Some(json!("conn-7")),
                error: None,
            }
        );

        let message = decode(r#"{"type":7,"error":"shutting down","allowReconnect":true}"#).unwrap();
        assert_eq!(
            message,
            HubMessage::Close {
                error: Some("shutting down".to_string()),
                allow_reconnect: true,
            }
        );

        assert_eq!(decode(r#"{"type":2,"invocationId":"1","item":5}"#).unwrap(), HubMessage::Unsupported(2));
        assert!(decode(r#"{"type":3}"#).is_err());
    }

    #[test]
    fn test_split_records() {
        let text = format!("{{}}{sep}{{\"type\":6}}{sep}", sep = RECORD_SEPARATOR);
        assert_eq!(split_records(&text), vec!["{}".to_string(), "{\"type\":6}".to_string()]);
        assert!(split_records("").is_empty());
    }
}
