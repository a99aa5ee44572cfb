//! Peer session orchestrator
//!
//! Turns an unordered stream of signaling messages (identity assignment,
//! offers, answers, network-path candidates) into one live transport session
//! per remote peer, and carries chat and camera-status envelopes over the
//! sessions' data channels.
//!
//! # Architecture
//!
//! ```text
//! SignalingClient ──inbound──> SignalRouter ──> SessionRegistry ──> session actor (per peer)
//!        ^                                                                │
//!        └──────────────── outbound offer / answer / candidate ───────────┘
//!
//! LocalMediaController ──AttachMedia──> every session (renegotiation)
//! MessageBus ──> open DataChannels (direct, never through a session queue)
//! ```
//!
//! The transport engine sits behind [`transport::TransportFactory`]; the
//! `peerlink-webrtc` crate provides the webrtc-rs implementation and a
//! SignalR hub client.
//!
//! # Example
//!
//! ```no_run
//! use peerlink_core::{
//!     config::PeerlinkConfig, media::NoMediaDevices, signaling::MemoryRelay, PeerOrchestrator,
//! };
//! # use peerlink_core::transport::TransportFactory;
//! # use std::sync::Arc;
//! # async fn run(factory: Arc<dyn TransportFactory>) -> peerlink_core::Result<()> {
//! let relay = MemoryRelay::new();
//! let peer = PeerOrchestrator::new(
//!     PeerlinkConfig::default(),
//!     Arc::new(relay.client()),
//!     factory,
//!     Arc::new(NoMediaDevices),
//! )?;
//! let identity = peer.start().await?;
//! println!("connection id: {}", identity);
//! peer.connect_to_host("conn-2").await?;
//! peer.send_message("hello").await?;
//! peer.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod config;
pub mod envelope;
pub mod error;
pub mod history;
pub mod media;
pub mod orchestrator;
pub mod reconnect;
pub mod registry;
pub mod router;
pub mod session;
pub mod signaling;
pub mod snapshot;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

/// Opaque identity assigned by the signaling relay
pub type PeerId = String;

pub use config::PeerlinkConfig;
pub use error::{Error, Result};
pub use orchestrator::{PeerOrchestrator, PeerUpdate};
pub use registry::{RemotePeerRecord, SessionRegistry, TransportStatus};
pub use session::{PathClassification, SessionRole, SessionState};
pub use snapshot::{AppRole, ConnectionStatus, PeerSnapshot};

/// Crate version
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
