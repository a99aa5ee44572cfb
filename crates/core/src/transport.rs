//! Transport engine boundary
//!
//! The orchestrator never touches ICE, DTLS or codecs directly. It drives a
//! [`PeerTransport`] per remote peer and receives the engine's callbacks as
//! [`TransportEvent`]s through a [`TransportEventSink`].

use crate::config::DataChannelMode;
use crate::media::{LocalTrack, MediaKind};
use crate::{PeerId, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// ICE candidate type as reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CandidateType {
    Host,
    ServerReflexive,
    PeerReflexive,
    Relay,
    Unknown,
}

impl CandidateType {
    /// Parse the SDP / stats name (`host`, `srflx`, `prflx`, `relay`)
    pub fn from_sdp_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "host" => CandidateType::Host,
            "srflx" => CandidateType::ServerReflexive,
            "prflx" => CandidateType::PeerReflexive,
            "relay" => CandidateType::Relay,
            _ => CandidateType::Unknown,
        }
    }
}

/// Local half of the nominated candidate pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedPath {
    pub candidate_type: CandidateType,
    /// Protocol between us and the TURN server (relay candidates only)
    pub relay_protocol: Option<String>,
}

impl SelectedPath {
    pub fn new(candidate_type: CandidateType) -> Self {
        Self {
            candidate_type,
            relay_protocol: None,
        }
    }

    pub fn relayed(protocol: impl Into<String>) -> Self {
        Self {
            candidate_type: CandidateType::Relay,
            relay_protocol: Some(protocol.into()),
        }
    }
}

/// Connection state reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransportState::New => "new",
            TransportState::Connecting => "connecting",
            TransportState::Connected => "connected",
            TransportState::Disconnected => "disconnected",
            TransportState::Failed => "failed",
            TransportState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Application data channel handle
#[async_trait]
pub trait DataChannel: Send + Sync + fmt::Debug {
    fn label(&self) -> String;

    fn is_open(&self) -> bool;

    /// Write one text frame; fails unless the channel is open
    async fn send_text(&self, text: &str) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Engine callback, posted into the owning session's queue
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Locally discovered candidate, already serialized for the wire
    LocalCandidate(String),
    StateChanged(TransportState),
    /// Responder side: the initiator's data channel arrived
    DataChannel(Arc<dyn DataChannel>),
    ChannelOpen,
    ChannelClosed,
    ChannelMessage(String),
    RemoteTrack {
        track_id: String,
        stream_id: String,
        kind: MediaKind,
    },
}

/// Callback handed to the engine for one session
#[derive(Clone)]
pub struct TransportEventSink {
    emit: Arc<dyn Fn(TransportEvent) + Send + Sync>,
}

impl TransportEventSink {
    pub fn new<F>(emit: F) -> Self
    where
        F: Fn(TransportEvent) + Send + Sync + 'static,
    {
        Self {
            emit: Arc::new(emit),
        }
    }

    pub fn emit(&self, event: TransportEvent) {
        (self.emit)(event)
    }
}

impl fmt::Debug for TransportEventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportEventSink").finish_non_exhaustive()
    }
}

/// One peer-to-peer connection in the engine
///
/// Payloads are the opaque wire texts relayed through signaling: session
/// descriptions as `{"type":..,"sdp":..}` and candidates as
/// `{"candidate":..,"sdpMid":..,"sdpMLineIndex":..}`.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Open the application data channel (initiator only)
    async fn create_data_channel(
        &self,
        label: &str,
        mode: DataChannelMode,
    ) -> Result<Arc<dyn DataChannel>>;

    /// Create an offer and set it as local description
    async fn create_offer(&self) -> Result<String>;

    /// Create an answer to the applied remote offer and set it as local description
    async fn create_answer(&self) -> Result<String>;

    /// Withdraw the local offer that has not been answered yet
    async fn rollback_local_offer(&self) -> Result<()>;

    async fn apply_offer(&self, payload: &str) -> Result<()>;

    async fn apply_answer(&self, payload: &str) -> Result<()>;

    async fn add_ice_candidate(&self, payload: &str) -> Result<()>;

    async fn add_local_track(&self, track: &LocalTrack) -> Result<()>;

    /// Local side of the nominated pair, once connected
    async fn selected_path(&self) -> Option<SelectedPath>;

    async fn close(&self) -> Result<()>;
}

/// Builds a transport per remote peer
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(&self, remote: &PeerId, sink: TransportEventSink)
        -> Result<Arc<dyn PeerTransport>>;
}
