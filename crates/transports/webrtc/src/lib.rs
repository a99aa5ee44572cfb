//! webrtc-rs engine and SignalR signaling for peerlink
//!
//! Plugs into [`peerlink_core`] at its two network seams:
//!
//! - [`WebRtcTransportFactory`] implements
//!   [`TransportFactory`](peerlink_core::transport::TransportFactory): one
//!   `RTCPeerConnection` per remote peer, with ICE candidates, data channel
//!   and track callbacks translated into core transport events.
//! - [`HubSignalingClient`] implements
//!   [`SignalingClient`](peerlink_core::signaling::SignalingClient) over the
//!   SignalR JSON hub protocol on a WebSocket.
//!
//! [`SampleMediaDevices`] is a capture backend with no hardware behind it:
//! it hands out sample-fed tracks that applications write encoded frames to.
//!
//! # Example
//!
//! ```no_run
//! use peerlink_core::{PeerOrchestrator, PeerlinkConfig};
//! use peerlink_webrtc::{HubSignalingClient, SampleMediaDevices, WebRtcTransportFactory};
//! use std::sync::Arc;
//!
//! # async fn run() -> peerlink_core::Result<()> {
//! let config = PeerlinkConfig::new("http://localhost:5000/signalrhub");
//! let devices = SampleMediaDevices::new();
//! let peer = PeerOrchestrator::new(
//!     config.clone(),
//!     Arc::new(HubSignalingClient::new(&config)?),
//!     Arc::new(WebRtcTransportFactory::new(&config, devices.tracks())),
//!     Arc::new(devices),
//! )?;
//! let identity = peer.start().await?;
//! println!("share this id: {}", identity);
//! # Ok(())
//! # }
//! ```

pub mod channels;
pub mod ice;
pub mod media;
pub mod peer;
pub mod signaling;

pub use channels::WebRtcDataChannel;
pub use media::{SampleMediaDevices, SampleWriter, TrackStore};
pub use peer::{WebRtcPeerTransport, WebRtcTransportFactory};
pub use signaling::HubSignalingClient;
