//! WebRTC peer connection management

use crate::channels::WebRtcDataChannel;
use crate::ice;
use crate::media::TrackStore;
use crate::peer::stats;
use async_trait::async_trait;
use parking_lot::Mutex;
use peerlink_core::config::DataChannelMode;
use peerlink_core::media::{LocalTrack, MediaKind};
use peerlink_core::transport::{
    DataChannel, PeerTransport, SelectedPath, TransportEvent, TransportEventSink, TransportFactory,
    TransportState,
};
use peerlink_core::{Error, PeerId, PeerlinkConfig, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Session description as relayed through signaling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct DescriptionPayload {
    #[serde(rename = "type")]
    kind: String,
    sdp: String,
}

impl DescriptionPayload {
    fn parse(payload: &str, expected: &str) -> Result<String> {
        let description: DescriptionPayload = serde_json::from_str(payload)
            .map_err(|e| Error::SdpError(format!("Failed to parse {}: {}", expected, e)))?;
        if description.kind != expected {
            return Err(Error::SdpError(format!(
                "Expected {} but got {}",
                expected, description.kind
            )));
        }
        Ok(description.sdp)
    }

    fn encode(kind: &str, sdp: String) -> Result<String> {
        serde_json::to_string(&DescriptionPayload {
            kind: kind.to_string(),
            sdp,
        })
        .map_err(|e| Error::SerializationError(e.to_string()))
    }
}

/// Engine connection state to transport state; `None` for `Unspecified`
pub fn map_connection_state(state: RTCPeerConnectionState) -> Option<TransportState> {
    match state {
        RTCPeerConnectionState::New => Some(TransportState::New),
        RTCPeerConnectionState::Connecting => Some(TransportState::Connecting),
        RTCPeerConnectionState::Connected => Some(TransportState::Connected),
        RTCPeerConnectionState::Disconnected => Some(TransportState::Disconnected),
        RTCPeerConnectionState::Failed => Some(TransportState::Failed),
        RTCPeerConnectionState::Closed => Some(TransportState::Closed),
        RTCPeerConnectionState::Unspecified => None,
    }
}

fn media_kind(codec: RTPCodecType) -> Option<MediaKind> {
    match codec {
        RTPCodecType::Audio => Some(MediaKind::Audio),
        RTPCodecType::Video => Some(MediaKind::Video),
        RTPCodecType::Unspecified => None,
    }
}

/// Builds one `RTCPeerConnection` per remote peer
pub struct WebRtcTransportFactory {
    config: Arc<PeerlinkConfig>,
    tracks: Arc<TrackStore>,
}

impl WebRtcTransportFactory {
    /// `tracks` must be the store the media devices register their tracks in
    pub fn new(config: &PeerlinkConfig, tracks: Arc<TrackStore>) -> Self {
        Self {
            config: Arc::new(config.clone()),
            tracks,
        }
    }
}

#[async_trait]
impl TransportFactory for WebRtcTransportFactory {
    #[instrument(skip(self, remote, sink), fields(peer_id = %remote))]
    async fn create(
        &self,
        remote: &PeerId,
        sink: TransportEventSink,
    ) -> Result<Arc<dyn PeerTransport>> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::TransportError(format!("Failed to register codecs: {}", e)))?;

        let interceptor_registry =
            register_default_interceptors(Default::default(), &mut media_engine).map_err(|e| {
                Error::TransportError(format!("Failed to register interceptors: {}", e))
            })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        let peer_connection = Arc::new(
            api.new_peer_connection(ice::rtc_configuration(&self.config))
                .await
                .map_err(|e| {
                    Error::TransportError(format!("Failed to create peer connection: {}", e))
                })?,
        );

        info!("Created peer connection for {}", remote);

        let transport = WebRtcPeerTransport {
            peer_id: remote.clone(),
            peer_connection,
            sink,
            tracks: self.tracks.clone(),
            senders: Mutex::new(Vec::new()),
        };
        transport.install_handlers();
        Ok(Arc::new(transport) as Arc<dyn PeerTransport>)
    }
}

/// One remote peer's connection
pub struct WebRtcPeerTransport {
    peer_id: PeerId,
    peer_connection: Arc<RTCPeerConnection>,
    sink: TransportEventSink,
    tracks: Arc<TrackStore>,
    /// Retained so the tracks stay attached
    senders: Mutex<Vec<Arc<RTCRtpSender>>>,
}

impl WebRtcPeerTransport {
    fn install_handlers(&self) {
        let sink = self.sink.clone();
        self.peer_connection
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let sink = sink.clone();
                Box::pin(async move {
                    // `None` marks the end of gathering
                    let Some(candidate) = candidate else {
                        return;
                    };
                    let encoded = candidate
                        .to_json()
                        .map_err(|e| e.to_string())
                        .and_then(|init| serde_json::to_string(&init).map_err(|e| e.to_string()));
                    match encoded {
                        Ok(json) => sink.emit(TransportEvent::LocalCandidate(json)),
                        Err(e) => warn!("Dropping local candidate: {}", e),
                    }
                })
            }));

        let sink = self.sink.clone();
        let peer_id = self.peer_id.clone();
        self.peer_connection
            .on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
                let sink = sink.clone();
                let peer_id = peer_id.clone();
                Box::pin(async move {
                    debug!("Peer {} connection state: {}", peer_id, s);
                    if let Some(state) = map_connection_state(s) {
                        sink.emit(TransportEvent::StateChanged(state));
                    }
                })
            }));

        let sink = self.sink.clone();
        self.peer_connection
            .on_data_channel(Box::new(move |rtc_channel: Arc<RTCDataChannel>| {
                let sink = sink.clone();
                Box::pin(async move {
                    debug!("Remote announced data channel '{}'", rtc_channel.label());
                    let channel = WebRtcDataChannel::attach(rtc_channel, sink.clone());
                    sink.emit(TransportEvent::DataChannel(channel));
                })
            }));

        let sink = self.sink.clone();
        self.peer_connection.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let sink = sink.clone();
                Box::pin(async move {
                    let Some(kind) = media_kind(track.kind()) else {
                        warn!("Ignoring remote track with unspecified kind");
                        return;
                    };
                    sink.emit(TransportEvent::RemoteTrack {
                        track_id: track.id().to_string(),
                        stream_id: track.stream_id().to_string(),
                        kind,
                    });

                    // Nothing decodes remote media yet; keep the receive
                    // buffer drained until the track ends.
                    tokio::spawn(async move {
                        let mut packets = 0u64;
                        while track.read_rtp().await.is_ok() {
                            packets += 1;
                        }
                        debug!("Remote {} track ended after {} packets", kind, packets);
                    });
                })
            },
        ));
    }
}

#[async_trait]
impl PeerTransport for WebRtcPeerTransport {
    async fn create_data_channel(
        &self,
        label: &str,
        mode: DataChannelMode,
    ) -> Result<Arc<dyn DataChannel>> {
        let channel =
            WebRtcDataChannel::create(&self.peer_connection, label, mode, self.sink.clone())
                .await?;
        Ok(channel as Arc<dyn DataChannel>)
    }

    async fn create_offer(&self) -> Result<String> {
        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create offer: {}", e)))?;

        self.peer_connection
            .set_local_description(offer)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set local description: {}", e)))?;

        let local_desc = self.peer_connection.local_description().await.ok_or_else(|| {
            Error::SdpError("No local description after setting offer".to_string())
        })?;

        debug!("Created SDP offer for peer {}", self.peer_id);
        DescriptionPayload::encode("offer", local_desc.sdp)
    }

    async fn create_answer(&self) -> Result<String> {
        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create answer: {}", e)))?;

        self.peer_connection
            .set_local_description(answer)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set local description: {}", e)))?;

        let local_desc = self.peer_connection.local_description().await.ok_or_else(|| {
            Error::SdpError("No local description after setting answer".to_string())
        })?;

        debug!("Created SDP answer for peer {}", self.peer_id);
        DescriptionPayload::encode("answer", local_desc.sdp)
    }

    async fn rollback_local_offer(&self) -> Result<()> {
        let pending = self
            .peer_connection
            .pending_local_description()
            .await
            .ok_or_else(|| Error::SdpError("No local offer to roll back".to_string()))?;
        // The engine insists on a non-empty sdp even for a rollback
        let rollback: RTCSessionDescription = serde_json::from_value(serde_json::json!({
            "type": "rollback",
            "sdp": pending.sdp,
        }))?;

        debug!(peer_id = %self.peer_id, "Rolling back local offer");
        self.peer_connection
            .set_local_description(rollback)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to roll back local offer: {}", e)))
    }

    async fn apply_offer(&self, payload: &str) -> Result<()> {
        let sdp = DescriptionPayload::parse(payload, "offer")?;
        let offer = RTCSessionDescription::offer(sdp)
            .map_err(|e| Error::SdpError(format!("Failed to parse offer: {}", e)))?;

        self.peer_connection
            .set_remote_description(offer)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set remote description: {}", e)))
    }

    async fn apply_answer(&self, payload: &str) -> Result<()> {
        let sdp = DescriptionPayload::parse(payload, "answer")?;
        let answer = RTCSessionDescription::answer(sdp)
            .map_err(|e| Error::SdpError(format!("Failed to parse answer: {}", e)))?;

        self.peer_connection
            .set_remote_description(answer)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set remote description: {}", e)))
    }

    async fn add_ice_candidate(&self, payload: &str) -> Result<()> {
        let candidate: RTCIceCandidateInit = serde_json::from_str(payload).map_err(|e| {
            Error::IceCandidateError(format!("Failed to parse ICE candidate: {}", e))
        })?;

        self.peer_connection
            .add_ice_candidate(candidate)
            .await
            .map_err(|e| Error::IceCandidateError(format!("Failed to add ICE candidate: {}", e)))
    }

    async fn add_local_track(&self, track: &LocalTrack) -> Result<()> {
        let rtc_track = self.tracks.get_or_create(track);
        let sender = self
            .peer_connection
            .add_track(rtc_track as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| {
                Error::MediaTrackError(format!("Failed to add {} track: {}", track.kind, e))
            })?;

        // RTCP has to be read for the interceptors to run
        let rtcp_sender = Arc::clone(&sender);
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while rtcp_sender.read(&mut rtcp_buf).await.is_ok() {}
        });

        self.senders.lock().push(sender);
        info!("Added {} track {} for peer {}", track.kind, track.id, self.peer_id);
        Ok(())
    }

    async fn selected_path(&self) -> Option<SelectedPath> {
        stats::selected_path(&self.peer_connection).await
    }

    async fn close(&self) -> Result<()> {
        info!("Closing peer connection for peer {}", self.peer_id);
        self.senders.lock().clear();
        self.peer_connection
            .close()
            .await
            .map_err(|e| Error::TransportError(format!("Failed to close connection: {}", e)))
    }
}
