//! Data-channel wire envelopes
//!
//! ```json
//! {"type":"MESSAGE","content":"hi","senderId":"conn-1"}
//! {"type":"CAMERA_STATUS","enabled":false}
//! ```
//!
//! The `type` set is open: anything else decodes to [`Envelope::Unknown`]
//! so newer peers never break older ones.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Envelope {
    /// Chat text
    #[serde(rename = "MESSAGE")]
    Message {
        content: String,
        #[serde(
            rename = "senderId",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        sender_id: Option<String>,
    },

    /// Sender's camera was switched on or off
    #[serde(rename = "CAMERA_STATUS")]
    CameraStatus { enabled: bool },

    /// Any `type` this build does not understand
    #[serde(other)]
    Unknown,
}

impl Envelope {
    pub fn message(content: impl Into<String>, sender_id: impl Into<String>) -> Self {
        Envelope::Message {
            content: content.into(),
            sender_id: Some(sender_id.into()),
        }
    }

    pub fn camera_status(enabled: bool) -> Self {
        Envelope::CameraStatus { enabled }
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a frame; undecodable input is [`Error::MalformedEnvelope`]
    pub fn decode(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| Error::MalformedEnvelope(e.to_string()))
    }
}
