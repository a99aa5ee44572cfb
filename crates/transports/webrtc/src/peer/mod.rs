//! Peer connections
//!
//! One [`WebRtcPeerTransport`] per remote peer, created by
//! [`WebRtcTransportFactory`] when the session registry opens a session.

mod connection;
pub mod stats;

pub use connection::{map_connection_state, WebRtcPeerTransport, WebRtcTransportFactory};
