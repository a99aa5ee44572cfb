//! Application message bus
//!
//! Fans chat text out to every open data channel and folds inbound frames
//! back into history. A local send is echoed into history exactly once no
//! matter how many channels it went out on.

use crate::envelope::Envelope;
use crate::history::{ChatHistory, Direction, Message};
use crate::transport::DataChannel;
use crate::{PeerId, Result};
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of a fan-out send
#[derive(Debug, Default)]
pub struct SendReport {
    /// Peers whose channel accepted the frame
    pub delivered: Vec<PeerId>,
    /// Peers whose channel rejected it, with the reason
    pub failed: Vec<(PeerId, String)>,
    /// Local echo appended to history; `None` for blank input
    pub message: Option<Message>,
}

/// What an inbound frame turned into
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    Message(Message),
    CameraStatus { peer: PeerId, enabled: bool },
    /// Unknown `type`, no state changed
    Ignored,
}

pub struct MessageBus {
    history: Arc<ChatHistory>,
}

impl MessageBus {
    pub fn new(history: Arc<ChatHistory>) -> Self {
        Self { history }
    }

    pub fn history(&self) -> &Arc<ChatHistory> {
        &self.history
    }

    /// Send chat text to every open channel
    ///
    /// Blank text is ignored. Channels that are not open are skipped.
    pub async fn send(
        &self,
        text: &str,
        sender_id: &str,
        channels: &[(PeerId, Arc<dyn DataChannel>)],
    ) -> Result<SendReport> {
        if text.trim().is_empty() {
            return Ok(SendReport::default());
        }

        let frame = Envelope::message(text, sender_id).encode()?;
        let mut report = self.fan_out(&frame, channels).await;

        let message = Message::new(sender_id, Direction::SelfSent, text);
        self.history.append(message.clone());
        report.message = Some(message);
        Ok(report)
    }

    /// Send a control envelope to every open channel; returns the delivery count
    pub async fn broadcast(
        &self,
        envelope: &Envelope,
        channels: &[(PeerId, Arc<dyn DataChannel>)],
    ) -> Result<usize> {
        let frame = envelope.encode()?;
        Ok(self.fan_out(&frame, channels).await.delivered.len())
    }

    async fn fan_out(&self, frame: &str, channels: &[(PeerId, Arc<dyn DataChannel>)]) -> SendReport {
        let mut report = SendReport::default();
        for (peer, channel) in channels {
            if !channel.is_open() {
                continue;
            }
            match channel.send_text(frame).await {
                Ok(()) => report.delivered.push(peer.clone()),
                Err(e) => {
                    warn!(peer_id = %peer, "Failed to send on data channel: {}", e);
                    report.failed.push((peer.clone(), e.to_string()));
                }
            }
        }
        report
    }

    /// Decode a frame received from `remote`
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::MalformedEnvelope`] when the frame is not a
    /// valid envelope; nothing is recorded in that case.
    pub fn receive(&self, remote: &PeerId, raw: &str) -> Result<Received> {
        match Envelope::decode(raw)? {
            Envelope::Message { content, .. } => {
                let message = Message::new(remote.clone(), Direction::Remote, content);
                self.history.append(message.clone());
                Ok(Received::Message(message))
            }
            Envelope::CameraStatus { enabled } => Ok(Received::CameraStatus {
                peer: remote.clone(),
                enabled,
            }),
            Envelope::Unknown => {
                debug!(peer_id = %remote, "Dropping envelope of unknown type");
                Ok(Received::Ignored)
            }
        }
    }
}
