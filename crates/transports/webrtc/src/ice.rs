//! ICE server list from peerlink configuration

use peerlink_core::PeerlinkConfig;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;

/// STUN entries first, then TURN entries with their credentials
pub fn ice_servers(config: &PeerlinkConfig) -> Vec<RTCIceServer> {
    config
        .stun_servers
        .iter()
        .map(|url| RTCIceServer {
            urls: vec![url.clone()],
            ..Default::default()
        })
        .chain(config.turn_servers.iter().map(|turn| {
            #[allow(clippy::needless_update)]
            RTCIceServer {
                urls: vec![turn.url.clone()],
                username: turn.username.clone(),
                credential: turn.credential.clone(),
                ..Default::default()
            }
        }))
        .collect()
}

/// Peer connection configuration for one session
pub fn rtc_configuration(config: &PeerlinkConfig) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: ice_servers(config),
        ..Default::default()
    }
}
