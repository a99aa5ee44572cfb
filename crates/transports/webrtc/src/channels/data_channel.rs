//! WebRTC data channel wrapper

use peerlink_core::config::DataChannelMode;
use peerlink_core::transport::{DataChannel, TransportEvent, TransportEventSink};
use peerlink_core::{Error, Result};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, warn};
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::peer_connection::RTCPeerConnection;

/// Largest text frame accepted for sending (SCTP default message size)
pub const MAX_TEXT_FRAME: usize = 64 * 1024;

/// Data channel init for a delivery mode
pub(crate) fn channel_init(mode: DataChannelMode) -> RTCDataChannelInit {
    RTCDataChannelInit {
        ordered: Some(mode.ordered()),
        max_retransmits: mode.max_retransmits(),
        ..Default::default()
    }
}

pub struct WebRtcDataChannel {
    label: String,
    rtc_channel: Arc<RTCDataChannel>,
}

impl WebRtcDataChannel {
    /// Create the channel on the initiator side
    pub async fn create(
        peer_connection: &RTCPeerConnection,
        label: &str,
        mode: DataChannelMode,
        sink: TransportEventSink,
    ) -> Result<Arc<Self>> {
        let rtc_channel = peer_connection
            .create_data_channel(label, Some(channel_init(mode)))
            .await
            .map_err(|e| {
                Error::DataChannelError(format!("Failed to create data channel: {}", e))
            })?;
        Ok(Self::attach(rtc_channel, sink))
    }

    /// Wrap a channel (created locally or announced by the remote) and wire
    /// its callbacks into `sink`
    pub fn attach(rtc_channel: Arc<RTCDataChannel>, sink: TransportEventSink) -> Arc<Self> {
        let label = rtc_channel.label().to_string();

        let open_sink = sink.clone();
        let open_label = label.clone();
        rtc_channel.on_open(Box::new(move || {
            let sink = open_sink.clone();
            let label = open_label.clone();
            Box::pin(async move {
                debug!("Data channel '{}' opened", label);
                sink.emit(TransportEvent::ChannelOpen);
            })
        }));

        let close_sink = sink.clone();
        let close_label = label.clone();
        rtc_channel.on_close(Box::new(move || {
            let sink = close_sink.clone();
            let label = close_label.clone();
            Box::pin(async move {
                debug!("Data channel '{}' closed", label);
                sink.emit(TransportEvent::ChannelClosed);
            })
        }));

        let message_label = label.clone();
        rtc_channel.on_message(Box::new(move |msg| {
            let sink = sink.clone();
            let label = message_label.clone();
            Box::pin(async move {
                if !msg.is_string {
                    debug!("Dropping {} byte binary frame on '{}'", msg.data.len(), label);
                    return;
                }
                match String::from_utf8(msg.data.to_vec()) {
                    Ok(text) => sink.emit(TransportEvent::ChannelMessage(text)),
                    Err(e) => warn!("Non UTF-8 text frame on '{}': {}", label, e),
                }
            })
        }));

        let error_label = label.clone();
        rtc_channel.on_error(Box::new(move |err| {
            let label = error_label.clone();
            Box::pin(async move {
                error!("Data channel '{}' error: {}", label, err);
            })
        }));

        Arc::new(Self { label, rtc_channel })
    }

    pub fn ready_state(&self) -> RTCDataChannelState {
        self.rtc_channel.ready_state()
    }
}

impl fmt::Debug for WebRtcDataChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebRtcDataChannel")
            .field("label", &self.label)
            .field("state", &self.ready_state())
            .finish()
    }
}

#[async_trait]
impl DataChannel for WebRtcDataChannel {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn is_open(&self) -> bool {
        self.ready_state() == RTCDataChannelState::Open
    }

    async fn send_text(&self, text: &str) -> Result<()> {
        if text.len() > MAX_TEXT_FRAME {
            return Err(Error::DataChannelError(format!(
                "Frame size {} exceeds maximum {} bytes",
                text.len(),
                MAX_TEXT_FRAME
            )));
        }

        let state = self.ready_state();
        if state != RTCDataChannelState::Open {
            return Err(Error::DataChannelError(format!(
                "Data channel is not open (state: {})",
                state
            )));
        }

        self.rtc_channel
            .send_text(text.to_string())
            .await
            .map_err(|e| Error::DataChannelError(format!("Failed to send message: {}", e)))?;
        debug!("Sent {} bytes on data channel '{}'", text.len(), self.label);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.rtc_channel
            .close()
            .await
            .map_err(|e| Error::DataChannelError(format!("Failed to close channel: {}", e)))
    }
}
