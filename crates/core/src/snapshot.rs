//! UI-facing read model

use crate::history::Message;
use crate::media::LocalMediaState;
use crate::registry::{RemotePeerRecord, TransportStatus};
use crate::PeerId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Which side of the call the local user picked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AppRole {
    Host,
    Client,
}

/// Aggregate connection status shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConnectionStatus {
    #[default]
    Idle,
    Connecting,
    Connected,
    Error,
}

/// One established connection as listed in the UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionInfo {
    pub id: PeerId,
    /// Path classification, e.g. `lan` or `turn-udp`
    #[serde(rename = "type")]
    pub kind: String,
}

impl ConnectionInfo {
    /// Connected records only
    pub fn from_record(record: &RemotePeerRecord) -> Option<Self> {
        if record.status != TransportStatus::Connected {
            return None;
        }
        Some(Self {
            id: record.id.clone(),
            kind: record
                .path
                .as_ref()
                .map(|p| p.to_string())
                .unwrap_or_else(|| "Connecting...".to_string()),
        })
    }
}

/// Immutable point-in-time view of the orchestrator
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerSnapshot {
    pub my_identity: Option<PeerId>,
    pub role: Option<AppRole>,
    pub connections: Vec<ConnectionInfo>,
    /// Every known peer, including ones still negotiating
    pub peers: Vec<RemotePeerRecord>,
    pub connection_status: ConnectionStatus,
    pub error: Option<String>,
    pub messages: Vec<Message>,
    pub peer_video_status: HashMap<PeerId, bool>,
    pub local_media: LocalMediaState,
    pub remote_streams: HashMap<PeerId, String>,
}
